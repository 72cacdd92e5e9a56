//! Turn raw document sources into collected documents.
//!
//! Parse and classification failures are reported per document; the remaining
//! documents still collect. Duplicate names are fatal and stop the run before
//! any pass executes.
use crate::document::{classify, parse_executable, Classification, CollectedDocument, DocumentSource};
use crate::errors::{CompileError, ErrorSet};
use std::collections::BTreeMap;

/// Documents that collected cleanly plus per-document failures.
#[derive(Debug, Default)]
pub struct Collection {
    pub documents: Vec<CollectedDocument>,
    pub errors: ErrorSet,
    /// Set when a name collision makes the run unrecoverable.
    pub fatal: bool,
}

impl Collection {
    pub fn into_result(self) -> Result<Vec<CollectedDocument>, ErrorSet> {
        self.errors.into_result(self.documents)
    }
}

/// Collect sources in order, preserving first-registration order.
pub fn collect(sources: Vec<DocumentSource>) -> Collection {
    let mut collection = Collection::default();
    let mut seen: BTreeMap<String, String> = BTreeMap::new();

    for (index, source) in sources.into_iter().enumerate() {
        let label = source.label(index);
        let parsed = match parse_executable(&source.text) {
            Ok(parsed) => parsed,
            Err(err) => {
                collection.errors.push(
                    CompileError::collection(format!("parse {label}: {err}")).in_document(label),
                );
                continue;
            }
        };
        let (kind, name) = match classify(&parsed) {
            Classification::Valid { kind, name } => (kind, name),
            Classification::Invalid(reason) => {
                collection
                    .errors
                    .push(CompileError::collection(reason).in_document(label));
                continue;
            }
        };
        if let Some(first) = seen.get(&name) {
            collection.errors.push(
                CompileError::collection(format!(
                    "document name \"{name}\" is declared by both {first} and {label}"
                ))
                .in_document(name.clone())
                .with_hint("rename one of the documents; names must be unique across the project"),
            );
            collection.fatal = true;
            continue;
        }
        seen.insert(name.clone(), label);
        collection
            .documents
            .push(CollectedDocument::new(name, kind, source, parsed));
    }

    tracing::debug!(
        documents = collection.documents.len(),
        errors = collection.errors.len(),
        "documents collected"
    );
    collection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentKind;
    use crate::errors::ErrorKind;

    fn sources(texts: &[&str]) -> Vec<DocumentSource> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| DocumentSource::new(*text).with_path(format!("doc{i}.graphql")))
            .collect()
    }

    #[test]
    fn collects_in_source_order() {
        let collection = collect(sources(&[
            "query B { version }",
            "fragment A on User { id }",
        ]));
        assert!(collection.errors.is_empty());
        let names: Vec<_> = collection.documents.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["B", "A"]);
        assert_eq!(collection.documents[1].kind, DocumentKind::Fragment);
    }

    #[test]
    fn parse_failure_is_isolated() {
        let collection = collect(sources(&["query A { version }", "query B {"]));
        assert_eq!(collection.documents.len(), 1);
        assert_eq!(collection.errors.len(), 1);
        assert!(!collection.fatal);
        let error = collection.errors.iter().next().expect("error");
        assert_eq!(error.kind, ErrorKind::Collection);
        assert_eq!(error.document.as_deref(), Some("doc1.graphql"));
    }

    #[test]
    fn duplicate_names_are_fatal_and_cite_both_sources() {
        let collection = collect(sources(&["query A { version }", "query A { user { id } }"]));
        assert!(collection.fatal);
        let error = collection.errors.iter().next().expect("error");
        assert!(error.message.contains("doc0.graphql"));
        assert!(error.message.contains("doc1.graphql"));
        assert_eq!(error.document.as_deref(), Some("A"));
    }

    #[test]
    fn anonymous_operation_is_a_collection_error() {
        let collection = collect(sources(&["{ version }"]));
        assert!(collection.documents.is_empty());
        assert_eq!(collection.errors.len(), 1);
        assert!(collection.into_result().is_err());
    }
}
