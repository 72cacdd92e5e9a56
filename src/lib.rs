//! GraphQL document compiler: collects operation and fragment documents,
//! validates and rewrites them through a pass pipeline, and generates cache
//! artifacts plus the store modules that bind them.
pub mod artifact;
pub mod collector;
pub mod compiler;
pub mod config;
pub mod document;
pub mod emit;
pub mod errors;
pub mod pipeline;
pub mod resolver;
pub mod scalars;
pub mod schema;
pub mod sources;
pub mod staging;

pub use compiler::{compile, Cancellation, CompileOutput, Compiler, RunReport};
pub use config::{Config, ConfigBuilder};
pub use document::{CollectedDocument, DocumentKind, DocumentSource};
pub use errors::{CompileError, ErrorKind, ErrorSet};
pub use pipeline::{Pass, PassContext, Pipeline};
