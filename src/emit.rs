//! Generated store sources and artifact files.
//!
//! The emitter only produces `(path, content)` pairs; writing them is the
//! caller's job (see [`crate::staging`]).
use crate::artifact::Artifact;
use crate::config::StoreNaming;
use crate::document::DocumentKind;
use crate::errors::{CompileError, ErrorSet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Words that can never be used as an exported binding.
const RESERVED_WORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete",
    "do", "else", "enum", "export", "extends", "false", "finally", "for", "function", "if", "import",
    "in", "instanceof", "let", "new", "null", "return", "static", "super", "switch", "this", "throw",
    "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

/// Local name the generated module binds the imported artifact to.
const ARTIFACT_BINDING: &str = "artifact";

/// A generated file, relative to the output root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputFile {
    pub path: String,
    pub content: String,
}

/// Runtime constructor a store of this kind extends.
pub fn store_constructor(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Query => "QueryStore",
        DocumentKind::Mutation => "MutationStore",
        DocumentKind::Subscription => "SubscriptionStore",
        DocumentKind::Fragment => "FragmentStore",
    }
}

pub fn store_class_name(document_name: &str) -> String {
    format!("{document_name}Store")
}

pub fn artifact_path(naming: &StoreNaming, document_name: &str) -> String {
    format!("{}/{document_name}.json", naming.artifact_directory)
}

pub fn store_path(naming: &StoreNaming, document_name: &str) -> String {
    format!("{}/{document_name}.js", naming.store_directory)
}

/// Serialize an artifact as its output file.
pub fn emit_artifact(artifact: &Artifact, naming: &StoreNaming) -> Result<OutputFile, CompileError> {
    let mut content = serde_json::to_string_pretty(artifact).map_err(|err| {
        CompileError::emission(format!("serialize artifact: {err}")).in_document(&artifact.name)
    })?;
    content.push('\n');
    Ok(OutputFile {
        path: artifact_path(naming, &artifact.name),
        content,
    })
}

/// Generate the store module bound to an artifact.
pub fn emit_store(artifact: &Artifact, naming: &StoreNaming) -> Result<OutputFile, CompileError> {
    let constructor = store_constructor(artifact.kind);
    let class_name = store_class_name(&artifact.name);
    let binding = naming.binding_name(&artifact.name);
    let conflict = |message: String| CompileError::emission(message).in_document(&artifact.name);

    if RESERVED_WORDS.contains(&binding.as_str()) {
        return Err(conflict(format!("store binding \"{binding}\" is a reserved word"))
            .with_hint("rename the document or set stores.prefix"));
    }
    for taken in [constructor, class_name.as_str(), ARTIFACT_BINDING] {
        if binding == taken {
            return Err(conflict(format!(
                "store binding \"{binding}\" collides with the generated name \"{taken}\""
            ))
            .with_hint("rename the document or set stores.prefix"));
        }
    }
    if class_name == constructor {
        return Err(conflict(format!(
            "store class \"{class_name}\" collides with the imported constructor"
        )));
    }

    let relative_artifact = format!("../{}", artifact_path(naming, &artifact.name));
    let content = format!(
        "import {{ {constructor} }} from '{runtime}'\n\
         import {ARTIFACT_BINDING} from '{relative_artifact}'\n\
         \n\
         export class {class_name} extends {constructor} {{\n\
         \tconstructor() {{\n\
         \t\tsuper({{ {ARTIFACT_BINDING} }})\n\
         \t}}\n\
         }}\n\
         \n\
         export const {binding} = new {class_name}()\n\
         \n\
         export default {binding}\n",
        runtime = naming.runtime_path,
    );
    Ok(OutputFile {
        path: store_path(naming, &artifact.name),
        content,
    })
}

/// Emit artifact files for every artifact and stores for the named documents.
///
/// Output is sorted by path so identical runs produce identical file lists.
pub fn emit_all(
    artifacts: &[Artifact],
    with_store: &BTreeSet<String>,
    naming: &StoreNaming,
) -> Result<Vec<OutputFile>, ErrorSet> {
    let results: Vec<Vec<Result<OutputFile, CompileError>>> = artifacts
        .par_iter()
        .map(|artifact| {
            let mut files = vec![emit_artifact(artifact, naming)];
            if with_store.contains(&artifact.name) {
                files.push(emit_store(artifact, naming));
            }
            files
        })
        .collect();

    let mut files = Vec::new();
    let mut errors = ErrorSet::new();
    for result in results.into_iter().flatten() {
        match result {
            Ok(file) => files.push(file),
            Err(err) => errors.push(err),
        }
    }
    files.sort();
    errors.into_result(files)
}
