//! Source provider: loads `.graphql` / `.gql` documents from disk.
use crate::document::DocumentSource;
use crate::errors::{CompileError, ErrorSet};
use crate::staging::files_under;
use anyhow::{anyhow, Result};
use std::fs;
use std::path::Path;

const DOCUMENT_EXTENSIONS: [&str; 2] = ["graphql", "gql"];

/// Sources in a stable order, plus files that could not be read.
#[derive(Debug, Default)]
pub struct SourceBatch {
    pub sources: Vec<DocumentSource>,
    pub errors: ErrorSet,
}

/// Load every document below `root`, sorted by path.
///
/// A missing root is an error; an unreadable file becomes a collection error
/// for that file only.
pub fn load_documents(root: &Path) -> Result<SourceBatch> {
    if !root.is_dir() {
        return Err(anyhow!("documents directory {} does not exist", root.display()));
    }
    let mut batch = SourceBatch::default();
    for path in files_under(root)? {
        let is_document = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| DOCUMENT_EXTENSIONS.contains(&ext));
        if !is_document {
            continue;
        }
        let label = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .display()
            .to_string();
        match fs::read_to_string(&path) {
            Ok(text) => batch.sources.push(DocumentSource::new(text).with_path(label)),
            Err(err) => batch.errors.push(
                CompileError::collection(format!("read {label}: {err}")).in_document(label),
            ),
        }
    }
    tracing::debug!(
        root = %root.display(),
        sources = batch.sources.len(),
        unreadable = batch.errors.len(),
        "documents loaded"
    );
    Ok(batch)
}
