//! One compilation run: collect, run the pipeline, generate, emit.
//!
//! A run is all-or-nothing. Any error from any stage fails the whole run and
//! no output is returned for any document.
use crate::artifact::{generate_all, Artifact};
use crate::collector::collect;
use crate::config::Config;
use crate::document::{CollectedDocument, DocumentSource};
use crate::emit::{emit_all, OutputFile};
use crate::errors::{CompileError, ErrorKind, ErrorSet};
use crate::pipeline::Pipeline;
use crate::resolver::TypeResolver;
use crate::sources::SourceBatch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared flag that aborts a run between stages.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ErrorSet> {
        if self.is_cancelled() {
            return Err(CompileError::cancelled().into());
        }
        Ok(())
    }
}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub documents: Vec<CollectedDocument>,
    pub artifacts: Vec<Artifact>,
    pub files: Vec<OutputFile>,
}

pub struct Compiler<'c> {
    config: &'c Config,
    pipeline: Pipeline,
    cancel: Cancellation,
}

impl<'c> Compiler<'c> {
    pub fn new(config: &'c Config) -> Self {
        Self {
            config,
            pipeline: Pipeline::standard(config),
            cancel: Cancellation::default(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn compile(&self, sources: Vec<DocumentSource>) -> Result<CompileOutput, ErrorSet> {
        self.compile_batch(SourceBatch {
            sources,
            errors: ErrorSet::new(),
        })
    }

    /// Compile sources along with read failures reported by the source provider.
    pub fn compile_batch(&self, batch: SourceBatch) -> Result<CompileOutput, ErrorSet> {
        let start = Instant::now();
        let SourceBatch {
            sources,
            errors: mut run_errors,
        } = batch;

        let collection = collect(sources);
        run_errors.extend(collection.errors);
        if collection.fatal {
            return Err(run_errors);
        }
        self.cancel.check()?;

        let documents = match self
            .pipeline
            .run_with_cancellation(self.config, collection.documents, &self.cancel)
        {
            Ok(documents) => documents,
            Err(errors) => {
                if errors.iter().any(|err| err.kind == ErrorKind::Cancelled) {
                    return Err(errors);
                }
                run_errors.extend(errors);
                return Err(run_errors);
            }
        };
        if !run_errors.is_empty() {
            return Err(run_errors);
        }
        self.cancel.check()?;

        let resolver = TypeResolver::new(self.config);
        let artifacts = generate_all(&resolver, &documents)?;
        self.cancel.check()?;

        let with_store: BTreeSet<String> = documents
            .iter()
            .filter(|document| document.generate_store && document.generate_artifact)
            .map(|document| document.name.clone())
            .collect();
        let files = emit_all(&artifacts, &with_store, &self.config.stores)?;
        self.cancel.check()?;

        tracing::info!(
            documents = documents.len(),
            artifacts = artifacts.len(),
            files = files.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "compile complete"
        );
        Ok(CompileOutput {
            documents,
            artifacts,
            files,
        })
    }
}

/// Compile with the standard pipeline.
pub fn compile(config: &Config, sources: Vec<DocumentSource>) -> Result<CompileOutput, ErrorSet> {
    Compiler::new(config).compile(sources)
}

/// Machine-readable summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub succeeded: bool,
    pub documents: Vec<String>,
    pub files: Vec<String>,
    pub errors: Vec<CompileError>,
}

impl RunReport {
    pub fn from_result(result: &Result<CompileOutput, ErrorSet>) -> Self {
        match result {
            Ok(output) => Self {
                succeeded: true,
                documents: output.documents.iter().map(|doc| doc.name.clone()).collect(),
                files: output.files.iter().map(|file| file.path.clone()).collect(),
                errors: Vec::new(),
            },
            Err(errors) => Self {
                succeeded: false,
                documents: Vec::new(),
                files: Vec::new(),
                errors: errors.iter().cloned().collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn config() -> Config {
        Config::builder(
            Schema::parse("type User { id: ID! name: String! } type Query { user: User! version: Int! }")
                .expect("schema"),
        )
        .build()
        .expect("config")
    }

    #[test]
    fn cancelled_run_produces_nothing() {
        let config = config();
        let cancel = Cancellation::new();
        cancel.cancel();
        let result = Compiler::new(&config)
            .with_cancellation(cancel)
            .compile(vec![DocumentSource::new("query A { version }")]);
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors.iter().next().map(|err| err.kind),
            Some(ErrorKind::Cancelled)
        );
    }

    #[test]
    fn report_lists_outputs_on_success() {
        let config = config();
        let result = compile(&config, vec![DocumentSource::new("query A { user { name } }")]);
        let report = RunReport::from_result(&result);
        assert!(report.succeeded, "{:?}", report.errors);
        assert_eq!(report.documents, ["A"]);
        assert_eq!(report.files, ["artifacts/A.json", "stores/A.js"]);
    }

    #[test]
    fn source_read_failures_fail_the_run() {
        let config = config();
        let batch = SourceBatch {
            sources: vec![DocumentSource::new("query A { version }")],
            errors: CompileError::collection("read b.graphql: permission denied")
                .in_document("b.graphql")
                .into(),
        };
        let errors = Compiler::new(&config).compile_batch(batch).unwrap_err();
        assert_eq!(errors.len(), 1);
    }
}
