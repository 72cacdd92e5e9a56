//! Project configuration.
//!
//! A [`ConfigFile`] mirrors the JSON config users write; [`Config`] is the
//! resolved, validated form built once per run and shared read-only by every
//! stage. Nothing mutates a `Config` after construction.
use crate::pipeline::Pass;
use crate::scalars::{CodecName, ScalarSpec};
use crate::schema::{Schema, TypeKind};
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Default import path for the runtime store constructors.
pub const DEFAULT_RUNTIME_PATH: &str = "$storegen/runtime/stores";
pub const DEFAULT_ARTIFACT_DIRECTORY: &str = "artifacts";
pub const DEFAULT_STORE_DIRECTORY: &str = "stores";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("scalars.{0}: schema does not declare a scalar with this name")]
    UnknownScalar(String),
    #[error("scalars.{0}: built-in scalars cannot be overridden")]
    BuiltinScalar(String),
    #[error("types.{0}: schema does not declare this type")]
    UnknownType(String),
    #[error("types.{type_name}.keys: \"{field}\" is not a field of {type_name}")]
    UnknownKeyField { type_name: String, field: String },
    #[error("types.{0}.keys must not be empty")]
    EmptyKeys(String),
    #[error("types.{type_name}.resolve.queryField: \"{field}\" is not a field of the query root")]
    UnknownQueryField { type_name: String, field: String },
    #[error("stores.prefix {0:?} cannot start a valid binding name")]
    InvalidPrefix(String),
}

/// Cache policy applied when a query store loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CachePolicy {
    CacheOnly,
    NetworkOnly,
    #[default]
    CacheOrNetwork,
    CacheAndNetwork,
}

impl CachePolicy {
    pub const ALL: [CachePolicy; 4] = [
        CachePolicy::CacheOnly,
        CachePolicy::NetworkOnly,
        CachePolicy::CacheOrNetwork,
        CachePolicy::CacheAndNetwork,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CachePolicy::CacheOnly => "CacheOnly",
            CachePolicy::NetworkOnly => "NetworkOnly",
            CachePolicy::CacheOrNetwork => "CacheOrNetwork",
            CachePolicy::CacheAndNetwork => "CacheAndNetwork",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|policy| policy.as_str() == value)
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether fragment fields are hidden from the operations that spread them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentMasking {
    #[default]
    Enable,
    Disable,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeResolve {
    pub query_field: String,
}

/// Per-type cache identity rules.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeConfig {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve: Option<TypeResolve>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalarEntry {
    /// Runtime type label used by generated bindings.
    #[serde(rename = "type")]
    pub runtime_type: String,
    #[serde(default)]
    pub codec: CodecName,
}

/// Naming applied to emitted store bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreNaming {
    pub prefix: String,
    pub runtime_path: String,
    pub artifact_directory: String,
    pub store_directory: String,
}

impl Default for StoreNaming {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            runtime_path: DEFAULT_RUNTIME_PATH.to_string(),
            artifact_directory: DEFAULT_ARTIFACT_DIRECTORY.to_string(),
            store_directory: DEFAULT_STORE_DIRECTORY.to_string(),
        }
    }
}

impl StoreNaming {
    /// Binding name exported for a document.
    pub fn binding_name(&self, document_name: &str) -> String {
        format!("{}{}", self.prefix, document_name)
    }
}

/// On-disk config (`storegen.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    /// Inline SDL; takes precedence over `schemaPath`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_path: Option<PathBuf>,
    #[serde(default)]
    pub scalars: BTreeMap<String, ScalarEntry>,
    #[serde(default)]
    pub types: BTreeMap<String, TypeConfig>,
    #[serde(default)]
    pub default_cache_policy: CachePolicy,
    #[serde(default)]
    pub default_partial: bool,
    #[serde(default)]
    pub default_fragment_masking: FragmentMasking,
    #[serde(default)]
    pub stores: StoreNaming,
}

/// Resolved settings for one compilation run.
#[derive(Clone)]
pub struct Config {
    pub schema: Schema,
    pub scalars: BTreeMap<String, ScalarSpec>,
    pub types: BTreeMap<String, TypeConfig>,
    pub default_cache_policy: CachePolicy,
    pub default_partial: bool,
    pub default_fragment_masking: FragmentMasking,
    pub stores: StoreNaming,
    /// Extra passes appended after the built-in pipeline.
    pub plugins: Vec<Arc<dyn Pass>>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("scalars", &self.scalars.keys().collect::<Vec<_>>())
            .field("types", &self.types)
            .field("default_cache_policy", &self.default_cache_policy)
            .field("default_partial", &self.default_partial)
            .field("default_fragment_masking", &self.default_fragment_masking)
            .field("stores", &self.stores)
            .field(
                "plugins",
                &self.plugins.iter().map(|pass| pass.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Config {
    pub fn builder(schema: Schema) -> ConfigBuilder {
        ConfigBuilder::new(schema)
    }

    /// Resolve a parsed config file against an already parsed schema.
    pub fn from_file(file: ConfigFile, schema: Schema) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::new(schema)
            .default_cache_policy(file.default_cache_policy)
            .default_partial(file.default_partial)
            .fragment_masking(file.default_fragment_masking)
            .stores(file.stores);
        for (name, entry) in file.scalars {
            let mut spec = match entry.codec {
                CodecName::Passthrough => ScalarSpec::passthrough(&entry.runtime_type),
                CodecName::EpochMillis => ScalarSpec::epoch_millis(),
                CodecName::Rfc3339 => ScalarSpec::rfc3339(),
            };
            spec.runtime_type = entry.runtime_type;
            builder = builder.scalar(name, spec);
        }
        for (name, type_config) in file.types {
            builder = builder.type_config(name, type_config);
        }
        builder.build()
    }

    pub fn type_config(&self, name: &str) -> Option<&TypeConfig> {
        self.types.get(name)
    }
}

/// Incremental construction of a [`Config`]; validation runs in [`ConfigBuilder::build`].
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new(schema: Schema) -> Self {
        Self {
            config: Config {
                schema,
                scalars: BTreeMap::new(),
                types: BTreeMap::new(),
                default_cache_policy: CachePolicy::default(),
                default_partial: false,
                default_fragment_masking: FragmentMasking::default(),
                stores: StoreNaming::default(),
                plugins: Vec::new(),
            },
        }
    }

    pub fn scalar(mut self, name: impl Into<String>, spec: ScalarSpec) -> Self {
        self.config.scalars.insert(name.into(), spec);
        self
    }

    pub fn type_config(mut self, name: impl Into<String>, config: TypeConfig) -> Self {
        self.config.types.insert(name.into(), config);
        self
    }

    pub fn keys<I, S>(self, name: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let config = TypeConfig {
            keys: keys.into_iter().map(Into::into).collect(),
            resolve: None,
        };
        self.type_config(name, config)
    }

    pub fn default_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.config.default_cache_policy = policy;
        self
    }

    pub fn default_partial(mut self, partial: bool) -> Self {
        self.config.default_partial = partial;
        self
    }

    pub fn fragment_masking(mut self, masking: FragmentMasking) -> Self {
        self.config.default_fragment_masking = masking;
        self
    }

    pub fn stores(mut self, stores: StoreNaming) -> Self {
        self.config.stores = stores;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.stores.prefix = prefix.into();
        self
    }

    /// Append an external pass to run after the built-in passes.
    pub fn plugin(mut self, pass: Arc<dyn Pass>) -> Self {
        self.config.plugins.push(pass);
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        validate_config(&self.config)?;
        Ok(self.config)
    }
}

fn binding_prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Za-z_$][A-Za-z0-9_$]*)?$").expect("valid regex"))
}

/// Validate scalars, type rules and naming against the schema.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let schema = &config.schema;
    for name in config.scalars.keys() {
        if Schema::is_builtin_scalar(name) {
            return Err(ConfigError::BuiltinScalar(name.clone()));
        }
        if schema.kind_of(name) != Some(TypeKind::Scalar) {
            return Err(ConfigError::UnknownScalar(name.clone()));
        }
    }
    for (name, type_config) in &config.types {
        let def = schema
            .get(name)
            .filter(|def| def.kind.is_composite())
            .ok_or_else(|| ConfigError::UnknownType(name.clone()))?;
        if type_config.keys.is_empty() {
            return Err(ConfigError::EmptyKeys(name.clone()));
        }
        for key in &type_config.keys {
            if def.field(key).is_none() {
                return Err(ConfigError::UnknownKeyField {
                    type_name: name.clone(),
                    field: key.clone(),
                });
            }
        }
        if let Some(resolve) = &type_config.resolve {
            if schema.field(schema.query_type(), &resolve.query_field).is_none() {
                return Err(ConfigError::UnknownQueryField {
                    type_name: name.clone(),
                    field: resolve.query_field.clone(),
                });
            }
        }
    }
    if !binding_prefix_pattern().is_match(&config.stores.prefix) {
        return Err(ConfigError::InvalidPrefix(config.stores.prefix.clone()));
    }
    Ok(())
}

/// Read a config file from disk.
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let file: ConfigFile = serde_json::from_slice(&bytes).context("parse config JSON")?;
    Ok(file)
}

/// Load the config file, its schema, and resolve both into a [`Config`].
///
/// `schemaPath` is resolved relative to the config file's directory.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut file = load_config_file(path)?;
    let sdl = match (file.schema.take(), file.schema_path.as_ref()) {
        (Some(inline), _) => inline,
        (None, Some(schema_path)) => {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            let resolved = base.join(schema_path);
            fs::read_to_string(&resolved)
                .with_context(|| format!("read schema {}", resolved.display()))?
        }
        (None, None) => return Err(anyhow!("config must set either schema or schemaPath")),
    };
    let schema = Schema::parse(&sdl).context("parse schema")?;
    let config = Config::from_file(file, schema).context("validate config")?;
    tracing::debug!(
        scalars = config.scalars.len(),
        types = config.types.len(),
        "config loaded"
    );
    Ok(config)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
