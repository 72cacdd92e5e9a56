//! Cache identity keys and scalar specs, resolved once per run.
//!
//! Precedence for identity keys: an explicit `types[T].keys` override, then
//! `["id"]` when the type (or an interface it implements) declares `id`,
//! otherwise the type is embedded and has no identity of its own.
use crate::config::{Config, TypeResolve};
use crate::scalars::ScalarSpec;
use crate::schema::{Schema, TypeKind};
use std::collections::BTreeMap;
use thiserror::Error;

pub const DEFAULT_KEY_FIELD: &str = "id";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("scalar \"{0}\" has no registered conversion")]
pub struct MissingScalarError(pub String);

/// How a type participates in cache identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity<'a> {
    Keyed(&'a [String]),
    Embedded,
}

impl<'a> Identity<'a> {
    pub fn keys(&self) -> &'a [String] {
        match self {
            Identity::Keyed(keys) => keys,
            Identity::Embedded => &[],
        }
    }
}

/// Read-only lookup tables shared by passes and artifact generation.
#[derive(Debug)]
pub struct TypeResolver<'c> {
    config: &'c Config,
    keys: BTreeMap<String, Vec<String>>,
    builtin_scalars: BTreeMap<&'static str, ScalarSpec>,
}

impl<'c> TypeResolver<'c> {
    pub fn new(config: &'c Config) -> Self {
        let schema = &config.schema;
        let mut keys = BTreeMap::new();
        for def in schema.types() {
            if !def.kind.is_composite() {
                continue;
            }
            if let Some(type_config) = config.type_config(&def.name) {
                keys.insert(def.name.clone(), type_config.keys.clone());
            } else if declares_id(schema, &def.name) {
                keys.insert(def.name.clone(), vec![DEFAULT_KEY_FIELD.to_string()]);
            }
        }
        let builtin_scalars = crate::schema::BUILTIN_SCALARS
            .into_iter()
            .filter_map(|name| ScalarSpec::builtin(name).map(|spec| (name, spec)))
            .collect();
        Self {
            config,
            keys,
            builtin_scalars,
        }
    }

    pub fn config(&self) -> &'c Config {
        self.config
    }

    pub fn schema(&self) -> &'c Schema {
        &self.config.schema
    }

    pub fn identity(&self, type_name: &str) -> Identity<'_> {
        match self.keys.get(type_name) {
            Some(keys) => Identity::Keyed(keys),
            None => Identity::Embedded,
        }
    }

    /// Ordered identity key fields; empty for embedded types.
    pub fn identity_key(&self, type_name: &str) -> &[String] {
        self.identity(type_name).keys()
    }

    pub fn is_embedded(&self, type_name: &str) -> bool {
        matches!(self.identity(type_name), Identity::Embedded)
    }

    /// How to refetch an instance of this type from the query root.
    pub fn resolve_field(&self, type_name: &str) -> Option<&'c TypeResolve> {
        self.config
            .type_config(type_name)
            .and_then(|config| config.resolve.as_ref())
    }

    /// Registered spec, then built-in default, else a missing-scalar error.
    pub fn scalar_spec(&self, scalar: &str) -> Result<&ScalarSpec, MissingScalarError> {
        self.config
            .scalars
            .get(scalar)
            .or_else(|| self.builtin_scalars.get(scalar))
            .ok_or_else(|| MissingScalarError(scalar.to_string()))
    }

    /// Whether the named type is a scalar that needs a runtime conversion.
    pub fn needs_marshal(&self, type_name: &str) -> bool {
        self.schema().kind_of(type_name) == Some(TypeKind::Scalar)
            && self
                .scalar_spec(type_name)
                .is_ok_and(ScalarSpec::needs_conversion)
    }
}

fn declares_id(schema: &Schema, type_name: &str) -> bool {
    let Some(def) = schema.get(type_name) else {
        return false;
    };
    if def.field(DEFAULT_KEY_FIELD).is_some() {
        return true;
    }
    def.interfaces.iter().any(|iface| {
        schema
            .get(iface)
            .is_some_and(|iface| iface.field(DEFAULT_KEY_FIELD).is_some())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::schema::Schema;

    const SDL: &str = r#"
        scalar DateTime
        scalar Cursor
        interface Node { id: ID! }
        type User implements Node { id: ID! name: String! birthday: DateTime }
        type Ghost { id: ID name: String! aka: String! }
        type PageInfo { hasNextPage: Boolean! }
        type Query { user: User! ghost: Ghost! }
    "#;

    fn config() -> Config {
        Config::builder(Schema::parse(SDL).expect("parse schema"))
            .keys("Ghost", ["name", "aka"])
            .scalar("DateTime", ScalarSpec::epoch_millis())
            .build()
            .expect("build config")
    }

    #[test]
    fn override_wins_over_id_field() {
        let config = config();
        let resolver = TypeResolver::new(&config);
        assert_eq!(resolver.identity_key("Ghost"), ["name", "aka"]);
    }

    #[test]
    fn id_field_is_the_default_key() {
        let config = config();
        let resolver = TypeResolver::new(&config);
        assert_eq!(resolver.identity_key("User"), ["id"]);
        assert_eq!(resolver.identity_key("Node"), ["id"]);
    }

    #[test]
    fn types_without_id_are_embedded() {
        let config = config();
        let resolver = TypeResolver::new(&config);
        assert!(resolver.is_embedded("PageInfo"));
        assert!(resolver.identity_key("PageInfo").is_empty());
    }

    #[test]
    fn scalar_lookup_falls_back_to_builtins() {
        let config = config();
        let resolver = TypeResolver::new(&config);
        assert!(resolver.scalar_spec("DateTime").is_ok());
        assert!(resolver.scalar_spec("Int").is_ok());
        assert_eq!(
            resolver.scalar_spec("Cursor").unwrap_err(),
            MissingScalarError("Cursor".to_string())
        );
        assert!(resolver.needs_marshal("DateTime"));
        assert!(!resolver.needs_marshal("String"));
    }
}
