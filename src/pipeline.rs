//! Ordered whole-collection passes over the collected documents.
//!
//! Every pass sees the full document set, because fragment and identity
//! resolution span documents. Passes report errors instead of failing fast:
//! the runner appends each pass's errors to the run-wide list and keeps
//! going, then fails the run as a whole if anything was reported.
use crate::compiler::Cancellation;
use crate::config::Config;
use crate::document::CollectedDocument;
use crate::errors::{CompileError, ErrorSet};
use crate::resolver::TypeResolver;
use std::sync::Arc;
use std::time::Instant;

mod conformance;
pub(crate) mod directives;
pub(crate) mod fragments;
mod identity;
pub(crate) mod pagination;
mod scalar_usage;
pub(crate) mod visit;

pub use conformance::SchemaConformance;
pub use directives::{
    DirectiveValidation, CACHE_DIRECTIVE, INLINED_FRAGMENT_DIRECTIVE, LIST_DIRECTIVE, PAGINATE_DIRECTIVE,
};
pub use fragments::{FragmentInlining, FragmentRegistry};
pub use identity::IdentityKeys;
pub use pagination::{
    analyze_field, PaginationArguments, PaginationMode, PaginationShape, Refetch, PAGINATION_ARGUMENTS,
};
pub use scalar_usage::ScalarUsage;

/// Read-only inputs every pass may consult.
pub struct PassContext<'r> {
    pub config: &'r Config,
    pub resolver: &'r TypeResolver<'r>,
    /// Fragment definitions as they stood when the pass started.
    pub fragments: &'r FragmentRegistry,
}

/// One stage of the document pipeline.
///
/// A pass receives the entire collection, may rewrite documents through
/// [`CollectedDocument::rewrite`], and returns every error it found.
pub trait Pass: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, ctx: &PassContext<'_>, documents: &mut [CollectedDocument]) -> Vec<CompileError>;
}

/// Fixed, ordered list of passes.
#[derive(Clone)]
pub struct Pipeline {
    passes: Vec<Arc<dyn Pass>>,
}

impl Pipeline {
    pub fn new(passes: Vec<Arc<dyn Pass>>) -> Self {
        Self { passes }
    }

    /// The built-in passes, followed by plugin passes registered in the config.
    pub fn standard(config: &Config) -> Self {
        let mut passes: Vec<Arc<dyn Pass>> = vec![
            Arc::new(SchemaConformance),
            Arc::new(DirectiveValidation),
            Arc::new(ScalarUsage),
            Arc::new(PaginationArguments),
            Arc::new(FragmentInlining),
            Arc::new(IdentityKeys),
        ];
        passes.extend(config.plugins.iter().cloned());
        Self { passes }
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// Run every pass in order; fail if any pass reported an error.
    pub fn run(
        &self,
        config: &Config,
        documents: Vec<CollectedDocument>,
    ) -> Result<Vec<CollectedDocument>, ErrorSet> {
        self.run_with_cancellation(config, documents, &Cancellation::default())
    }

    pub fn run_with_cancellation(
        &self,
        config: &Config,
        mut documents: Vec<CollectedDocument>,
        cancel: &Cancellation,
    ) -> Result<Vec<CollectedDocument>, ErrorSet> {
        let resolver = TypeResolver::new(config);
        let mut errors = ErrorSet::new();

        for pass in &self.passes {
            if cancel.is_cancelled() {
                return Err(CompileError::cancelled().into());
            }
            let start = Instant::now();
            // snapshot before the pass so per-document work never sees a half-rewritten registry
            let fragments = FragmentRegistry::build(&documents);
            let ctx = PassContext {
                config,
                resolver: &resolver,
                fragments: &fragments,
            };
            let found = pass.run(&ctx, &mut documents);
            tracing::debug!(
                pass = pass.name(),
                documents = documents.len(),
                errors = found.len(),
                elapsed_ms = start.elapsed().as_millis(),
                "pass complete"
            );
            errors.extend(found);
        }

        if !errors.is_empty() {
            tracing::info!(errors = errors.len(), "pipeline failed");
        }
        errors.into_result(documents)
    }
}

/// Run the standard pipeline for a config.
pub fn run_pipeline(
    config: &Config,
    documents: Vec<CollectedDocument>,
) -> Result<Vec<CollectedDocument>, ErrorSet> {
    Pipeline::standard(config).run(config, documents)
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
