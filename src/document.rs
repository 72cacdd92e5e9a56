//! Collected documents and their classification.
//!
//! Each document keeps its pristine parse next to a copy-on-write working
//! version. Passes rewrite the working copy through [`CollectedDocument::rewrite`],
//! which bumps a revision counter so later stages can tell what changed.
use crate::errors::SourceLocation;
use graphql_parser::query::{Definition, Document, OperationDefinition, SelectionSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub type ExecutableDocument = Document<'static, String>;

/// Parse executable GraphQL text into an owned document.
pub fn parse_executable(text: &str) -> Result<ExecutableDocument, graphql_parser::query::ParseError> {
    Ok(graphql_parser::query::parse_query::<String>(text)?.into_static())
}

/// Kind of a document, inferred from its single top-level definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Query,
    Mutation,
    Subscription,
    Fragment,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Query => "query",
            DocumentKind::Mutation => "mutation",
            DocumentKind::Subscription => "subscription",
            DocumentKind::Fragment => "fragment",
        }
    }

    pub fn is_operation(&self) -> bool {
        !matches!(self, DocumentKind::Fragment)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying a parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Valid { kind: DocumentKind, name: String },
    Invalid(String),
}

/// Classify a document by its top-level definitions.
///
/// Exactly one named operation or exactly one fragment is accepted.
pub fn classify(document: &ExecutableDocument) -> Classification {
    let definition = match document.definitions.as_slice() {
        [definition] => definition,
        [] => return Classification::Invalid("document has no definitions".to_string()),
        many => {
            return Classification::Invalid(format!(
                "document must contain exactly one operation or fragment, found {}",
                many.len()
            ))
        }
    };
    let (kind, name) = match definition {
        Definition::Fragment(fragment) => (DocumentKind::Fragment, Some(&fragment.name)),
        Definition::Operation(OperationDefinition::Query(query)) => {
            (DocumentKind::Query, query.name.as_ref())
        }
        Definition::Operation(OperationDefinition::Mutation(mutation)) => {
            (DocumentKind::Mutation, mutation.name.as_ref())
        }
        Definition::Operation(OperationDefinition::Subscription(subscription)) => {
            (DocumentKind::Subscription, subscription.name.as_ref())
        }
        Definition::Operation(OperationDefinition::SelectionSet(_)) => {
            (DocumentKind::Query, None)
        }
    };
    match name {
        Some(name) => Classification::Valid {
            kind,
            name: name.clone(),
        },
        None => Classification::Invalid("operations must have a name".to_string()),
    }
}

/// Raw input handed over by a source provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSource {
    /// Where the text came from (file path or other identifier).
    pub path: Option<String>,
    pub text: String,
    pub generate_artifact: bool,
    pub generate_store: bool,
}

impl DocumentSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            path: None,
            text: text.into(),
            generate_artifact: true,
            generate_store: true,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn without_store(mut self) -> Self {
        self.generate_store = false;
        self
    }

    /// Label used in reports when the document has no name yet.
    pub fn label(&self, index: usize) -> String {
        match &self.path {
            Some(path) => path.clone(),
            None => format!("<document #{index}>"),
        }
    }
}

/// A document as it moves through the pipeline.
#[derive(Debug, Clone)]
pub struct CollectedDocument {
    pub name: String,
    pub kind: DocumentKind,
    pub source: DocumentSource,
    original: Arc<ExecutableDocument>,
    document: Arc<ExecutableDocument>,
    revision: u32,
    pub generate_artifact: bool,
    pub generate_store: bool,
}

impl CollectedDocument {
    pub fn new(
        name: String,
        kind: DocumentKind,
        source: DocumentSource,
        parsed: ExecutableDocument,
    ) -> Self {
        let original = Arc::new(parsed);
        Self {
            name,
            kind,
            generate_artifact: source.generate_artifact,
            generate_store: source.generate_store,
            source,
            document: Arc::clone(&original),
            original,
            revision: 0,
        }
    }

    /// Current working version.
    pub fn document(&self) -> &ExecutableDocument {
        &self.document
    }

    /// Pristine parse, never touched by passes.
    pub fn original_document(&self) -> &ExecutableDocument {
        &self.original
    }

    /// Number of rewrites applied to the working version.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn is_rewritten(&self) -> bool {
        !Arc::ptr_eq(&self.original, &self.document)
    }

    /// Rewrite the working version; the original stays shared and untouched.
    ///
    /// The closure returns whether it changed anything; the revision only
    /// moves when it did.
    pub fn rewrite<F>(&mut self, edit: F) -> bool
    where
        F: FnOnce(&mut ExecutableDocument) -> bool,
    {
        let mut working = (*self.document).clone();
        if !edit(&mut working) {
            return false;
        }
        self.document = Arc::new(working);
        self.revision += 1;
        true
    }

    /// The single top-level definition of the working version.
    pub fn definition(&self) -> Option<&Definition<'static, String>> {
        self.document.definitions.first()
    }

    pub fn selection_set(&self) -> Option<&SelectionSet<'static, String>> {
        self.definition().map(definition_selection_set)
    }

    pub fn location(&self) -> Option<SourceLocation> {
        self.definition().map(|definition| match definition {
            Definition::Fragment(fragment) => fragment.position.into(),
            Definition::Operation(OperationDefinition::Query(query)) => query.position.into(),
            Definition::Operation(OperationDefinition::Mutation(mutation)) => {
                mutation.position.into()
            }
            Definition::Operation(OperationDefinition::Subscription(subscription)) => {
                subscription.position.into()
            }
            Definition::Operation(OperationDefinition::SelectionSet(set)) => set.span.0.into(),
        })
    }

    /// Text of the pristine source.
    pub fn original_text(&self) -> &str {
        &self.source.text
    }
}

pub fn definition_selection_set<'d>(
    definition: &'d Definition<'static, String>,
) -> &'d SelectionSet<'static, String> {
    match definition {
        Definition::Fragment(fragment) => &fragment.selection_set,
        Definition::Operation(OperationDefinition::Query(query)) => &query.selection_set,
        Definition::Operation(OperationDefinition::Mutation(mutation)) => &mutation.selection_set,
        Definition::Operation(OperationDefinition::Subscription(subscription)) => {
            &subscription.selection_set
        }
        Definition::Operation(OperationDefinition::SelectionSet(set)) => set,
    }
}

pub fn definition_selection_set_mut<'d>(
    definition: &'d mut Definition<'static, String>,
) -> &'d mut SelectionSet<'static, String> {
    match definition {
        Definition::Fragment(fragment) => &mut fragment.selection_set,
        Definition::Operation(OperationDefinition::Query(query)) => &mut query.selection_set,
        Definition::Operation(OperationDefinition::Mutation(mutation)) => {
            &mut mutation.selection_set
        }
        Definition::Operation(OperationDefinition::Subscription(subscription)) => {
            &mut subscription.selection_set
        }
        Definition::Operation(OperationDefinition::SelectionSet(set)) => set,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ExecutableDocument {
        parse_executable(text).expect("parse")
    }

    #[test]
    fn classifies_each_operation_kind() {
        let cases = [
            ("query A { version }", DocumentKind::Query),
            ("mutation B { updateUser { id } }", DocumentKind::Mutation),
            ("subscription C { newUser { user { id } } }", DocumentKind::Subscription),
            ("fragment D on User { id }", DocumentKind::Fragment),
        ];
        for (text, expected) in cases {
            match classify(&parse(text)) {
                Classification::Valid { kind, .. } => assert_eq!(kind, expected, "{text}"),
                Classification::Invalid(reason) => panic!("{text}: {reason}"),
            }
        }
    }

    #[test]
    fn anonymous_operations_are_invalid() {
        assert!(matches!(
            classify(&parse("{ version }")),
            Classification::Invalid(_)
        ));
        assert!(matches!(
            classify(&parse("query { version }")),
            Classification::Invalid(_)
        ));
    }

    #[test]
    fn multiple_definitions_are_invalid() {
        let doc = parse("fragment A on User { id } fragment B on User { name }");
        assert!(matches!(classify(&doc), Classification::Invalid(_)));
    }

    #[test]
    fn rewrite_keeps_original_and_bumps_revision() {
        let text = "query A { version }";
        let mut doc = CollectedDocument::new(
            "A".to_string(),
            DocumentKind::Query,
            DocumentSource::new(text),
            parse(text),
        );
        assert!(!doc.rewrite(|_| false));
        assert_eq!(doc.revision(), 0);
        assert!(!doc.is_rewritten());

        assert!(doc.rewrite(|working| {
            working.definitions.clear();
            true
        }));
        assert_eq!(doc.revision(), 1);
        assert!(doc.is_rewritten());
        assert!(doc.definition().is_none());
        assert_eq!(doc.original_document().definitions.len(), 1);
    }
}
