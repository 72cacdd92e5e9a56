//! Run-scoped error types.
//!
//! Every problem found while collecting, validating, generating or emitting is
//! captured as a [`CompileError`] and appended to an [`ErrorSet`]. A run fails
//! as a whole when the set is non-empty, so one report carries every
//! independent problem the run could find.
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stage that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Collection,
    Validation,
    Generation,
    Emission,
    Cancelled,
}

impl ErrorKind {
    /// Return the stable string identifier used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Collection => "collection",
            ErrorKind::Validation => "validation",
            ErrorKind::Generation => "generation",
            ErrorKind::Emission => "emission",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1-based position inside a document's source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl From<graphql_parser::Pos> for SourceLocation {
    fn from(pos: graphql_parser::Pos) -> Self {
        Self {
            line: pos.line,
            column: pos.column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A single problem attributed to a document (when one is known).
///
/// # Display format
///
/// ```text
/// [validation] TestQuery (3:7): unknown field "nope" on type "User"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("[{kind}] {}: {message}", origin(.document, .location))]
pub struct CompileError {
    pub kind: ErrorKind,

    /// Name of the originating document, when the error belongs to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,

    /// Optional suggestion for how to fix the problem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            document: None,
            message: message.into(),
            location: None,
            hint: None,
        }
    }

    pub fn collection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Collection, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Generation, message)
    }

    pub fn emission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Emission, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "run cancelled before completion")
    }

    /// Attribute the error to a document.
    pub fn in_document(mut self, name: impl Into<String>) -> Self {
        self.document = Some(name.into());
        self
    }

    pub fn at(mut self, location: impl Into<SourceLocation>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

fn origin(document: &Option<String>, location: &Option<SourceLocation>) -> String {
    let name = document.as_deref().unwrap_or("<run>");
    match location {
        Some(location) => format!("{name} ({location})"),
        None => name.to_string(),
    }
}

/// Ordered collection of errors gathered over one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(transparent)]
#[error("{}", render(.errors))]
pub struct ErrorSet {
    errors: Vec<CompileError>,
}

impl ErrorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: CompileError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CompileError> {
        self.errors.iter()
    }

    /// Errors attributed to the named document.
    pub fn for_document<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a CompileError> {
        self.errors
            .iter()
            .filter(move |error| error.document.as_deref() == Some(name))
    }

    pub fn into_vec(self) -> Vec<CompileError> {
        self.errors
    }

    /// Turn the set into a run result: `Ok(value)` only when nothing was reported.
    pub fn into_result<T>(self, value: T) -> Result<T, ErrorSet> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

/// One line per error, each followed by its hint when there is one.
fn render(errors: &[CompileError]) -> String {
    let mut out = format!("{} error(s):\n", errors.len());
    for error in errors {
        out.push_str(&format!("  {error}\n"));
        if let Some(hint) = &error.hint {
            out.push_str(&format!("    hint: {hint}\n"));
        }
    }
    out
}

impl From<CompileError> for ErrorSet {
    fn from(error: CompileError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl From<Vec<CompileError>> for ErrorSet {
    fn from(errors: Vec<CompileError>) -> Self {
        Self { errors }
    }
}

impl Extend<CompileError> for ErrorSet {
    fn extend<I: IntoIterator<Item = CompileError>>(&mut self, iter: I) {
        self.errors.extend(iter);
    }
}

impl IntoIterator for ErrorSet {
    type Item = CompileError;
    type IntoIter = std::vec::IntoIter<CompileError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<'a> IntoIterator for &'a ErrorSet {
    type Item = &'a CompileError;
    type IntoIter = std::slice::Iter<'a, CompileError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}
