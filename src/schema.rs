//! Owned type-system model built from SDL.
//!
//! The schema is parsed once per run and treated as already validated: this
//! module only records what documents and config are checked against.
use graphql_parser::schema::{self as sdl, Definition, TypeDefinition, TypeExtension};
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Scalars every schema carries without declaring them.
pub const BUILTIN_SCALARS: [&str; 5] = ["Boolean", "Float", "ID", "Int", "String"];

/// Meta field selectable on every composite type.
pub const TYPENAME_FIELD: &str = "__typename";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("parse schema: {0}")]
    Parse(String),
    #[error("type \"{0}\" is declared more than once")]
    DuplicateType(String),
    #[error("schema declares no query root type")]
    MissingQueryRoot,
    #[error("root operation type \"{0}\" is not an object type")]
    InvalidRoot(String),
    #[error("cannot extend undeclared type \"{0}\"")]
    UnknownExtension(String),
    #[error("extension of \"{name}\" does not match its {kind:?} definition")]
    ExtensionKind { name: String, kind: TypeKind },
    #[error("extension redeclares \"{type_name}.{member}\"")]
    DuplicateMember { type_name: String, member: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

impl TypeKind {
    pub fn is_composite(self) -> bool {
        matches!(self, TypeKind::Object | TypeKind::Interface | TypeKind::Union)
    }

    pub fn is_abstract(self) -> bool {
        matches!(self, TypeKind::Interface | TypeKind::Union)
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, TypeKind::Scalar | TypeKind::Enum)
    }

    pub fn is_input(self) -> bool {
        matches!(self, TypeKind::Scalar | TypeKind::Enum | TypeKind::InputObject)
    }
}

/// A (possibly wrapped) reference to a named type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    /// The innermost named type.
    pub fn named(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.named(),
        }
    }

    pub fn is_nullable(&self) -> bool {
        !matches!(self, TypeRef::NonNull(_))
    }

    pub fn is_list(&self) -> bool {
        match self {
            TypeRef::Named(_) => false,
            TypeRef::List(_) => true,
            TypeRef::NonNull(inner) => inner.is_list(),
        }
    }

    /// Convert a parsed type annotation from either SDL or an executable document.
    pub fn from_ast<'a, T: sdl::Text<'a>>(ty: &sdl::Type<'a, T>) -> Self {
        match ty {
            sdl::Type::NamedType(name) => TypeRef::Named(name.as_ref().to_string()),
            sdl::Type::ListType(inner) => TypeRef::List(Box::new(TypeRef::from_ast(inner))),
            sdl::Type::NonNullType(inner) => TypeRef::NonNull(Box::new(TypeRef::from_ast(inner))),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::List(inner) => write!(f, "[{inner}]"),
            TypeRef::NonNull(inner) => write!(f, "{inner}!"),
        }
    }
}

/// Argument or input-object field.
#[derive(Debug, Clone)]
pub struct InputValueDef {
    pub name: String,
    pub ty: TypeRef,
    pub has_default: bool,
}

impl InputValueDef {
    /// A non-null argument without a default must always be provided.
    pub fn is_required(&self) -> bool {
        !self.ty.is_nullable() && !self.has_default
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeRef,
    pub arguments: IndexMap<String, InputValueDef>,
}

#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,
    pub fields: IndexMap<String, FieldDef>,
    pub interfaces: Vec<String>,
    /// Union members, or the implementors of an interface.
    pub possible_types: BTreeSet<String>,
    pub enum_values: Vec<String>,
    pub input_fields: IndexMap<String, InputValueDef>,
}

impl TypeDef {
    fn new(name: &str, kind: TypeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            fields: IndexMap::new(),
            interfaces: Vec::new(),
            possible_types: BTreeSet::new(),
            enum_values: Vec::new(),
            input_fields: IndexMap::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }
}

/// Parsed type system shared read-only by every stage of a run.
#[derive(Debug, Clone)]
pub struct Schema {
    types: BTreeMap<String, TypeDef>,
    query_type: String,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
    directives: BTreeSet<String>,
}

impl Schema {
    /// Parse SDL into the owned model.
    pub fn parse(source: &str) -> Result<Self, SchemaError> {
        let document = sdl::parse_schema::<String>(source)
            .map_err(|err| SchemaError::Parse(err.to_string()))?;

        let mut types: BTreeMap<String, TypeDef> = BTreeMap::new();
        for name in BUILTIN_SCALARS {
            types.insert(name.to_string(), TypeDef::new(name, TypeKind::Scalar));
        }

        let mut roots = (None, None, None);
        let mut directives = BTreeSet::new();
        let mut extensions = Vec::new();
        for definition in &document.definitions {
            match definition {
                Definition::SchemaDefinition(schema) => {
                    roots = (
                        schema.query.clone(),
                        schema.mutation.clone(),
                        schema.subscription.clone(),
                    );
                }
                Definition::TypeDefinition(definition) => {
                    let def = convert_type(definition);
                    let builtin = BUILTIN_SCALARS.contains(&def.name.as_str());
                    if types.contains_key(&def.name) && !builtin {
                        return Err(SchemaError::DuplicateType(def.name));
                    }
                    types.insert(def.name.clone(), def);
                }
                Definition::DirectiveDefinition(directive) => {
                    directives.insert(directive.name.clone());
                }
                Definition::TypeExtension(extension) => extensions.push(extension),
            }
        }
        // extensions may precede their base definition in the source
        for extension in extensions {
            apply_extension(&mut types, extension)?;
        }

        // interfaces learn their implementors from the objects that name them
        let implementations: Vec<(String, String)> = types
            .values()
            .filter(|def| def.kind == TypeKind::Object)
            .flat_map(|def| {
                def.interfaces
                    .iter()
                    .map(move |iface| (iface.clone(), def.name.clone()))
            })
            .collect();
        for (iface, object) in implementations {
            if let Some(def) = types.get_mut(&iface) {
                def.possible_types.insert(object);
            }
        }

        let query_type = match roots.0 {
            Some(name) => name,
            None if types.contains_key("Query") => "Query".to_string(),
            None => return Err(SchemaError::MissingQueryRoot),
        };
        let mutation_type = roots
            .1
            .or_else(|| types.contains_key("Mutation").then(|| "Mutation".to_string()));
        let subscription_type = roots
            .2
            .or_else(|| types.contains_key("Subscription").then(|| "Subscription".to_string()));

        for root in std::iter::once(&query_type)
            .chain(mutation_type.iter())
            .chain(subscription_type.iter())
        {
            match types.get(root) {
                Some(def) if def.kind == TypeKind::Object => {}
                Some(_) => return Err(SchemaError::InvalidRoot(root.clone())),
                None if root == &query_type => return Err(SchemaError::MissingQueryRoot),
                None => return Err(SchemaError::InvalidRoot(root.clone())),
            }
        }

        Ok(Self {
            types,
            query_type,
            mutation_type,
            subscription_type,
            directives,
        })
    }

    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values()
    }

    pub fn query_type(&self) -> &str {
        &self.query_type
    }

    pub fn mutation_type(&self) -> Option<&str> {
        self.mutation_type.as_deref()
    }

    pub fn subscription_type(&self) -> Option<&str> {
        self.subscription_type.as_deref()
    }

    /// Whether the SDL declares a directive of this name.
    pub fn declares_directive(&self, name: &str) -> bool {
        self.directives.contains(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<TypeKind> {
        self.get(name).map(|def| def.kind)
    }

    pub fn is_builtin_scalar(name: &str) -> bool {
        BUILTIN_SCALARS.contains(&name)
    }

    /// Resolve a field on a composite type, including the `__typename` meta field.
    pub fn field(&self, parent: &str, name: &str) -> Option<FieldRef<'_>> {
        if name == TYPENAME_FIELD {
            return self
                .kind_of(parent)
                .filter(|kind| kind.is_composite())
                .map(|_| FieldRef::Typename);
        }
        self.get(parent)?.field(name).map(FieldRef::Declared)
    }

    /// Concrete object types a value of `name` can have at runtime.
    pub fn possible_types(&self, name: &str) -> BTreeSet<String> {
        match self.get(name) {
            Some(def) if def.kind == TypeKind::Object => BTreeSet::from([def.name.clone()]),
            Some(def) if def.kind.is_abstract() => def.possible_types.clone(),
            _ => BTreeSet::new(),
        }
    }

    /// Whether a fragment typed `condition` can ever apply inside `parent`.
    pub fn types_overlap(&self, parent: &str, condition: &str) -> bool {
        if parent == condition {
            return true;
        }
        let parent_types = self.possible_types(parent);
        self.possible_types(condition)
            .iter()
            .any(|name| parent_types.contains(name))
    }
}

/// Result of a field lookup.
#[derive(Debug, Clone, Copy)]
pub enum FieldRef<'a> {
    Declared(&'a FieldDef),
    Typename,
}

impl FieldRef<'_> {
    pub fn type_name(&self) -> &str {
        match self {
            FieldRef::Declared(def) => def.ty.named(),
            FieldRef::Typename => "String",
        }
    }

    pub fn type_ref(&self) -> TypeRef {
        match self {
            FieldRef::Declared(def) => def.ty.clone(),
            FieldRef::Typename => TypeRef::NonNull(Box::new(TypeRef::Named("String".to_string()))),
        }
    }

    pub fn argument(&self, name: &str) -> Option<&InputValueDef> {
        match self {
            FieldRef::Declared(def) => def.arguments.get(name),
            FieldRef::Typename => None,
        }
    }

    pub fn arguments(&self) -> Option<&IndexMap<String, InputValueDef>> {
        match self {
            FieldRef::Declared(def) => Some(&def.arguments),
            FieldRef::Typename => None,
        }
    }
}

fn convert_type(definition: &TypeDefinition<'_, String>) -> TypeDef {
    match definition {
        TypeDefinition::Scalar(scalar) => TypeDef::new(&scalar.name, TypeKind::Scalar),
        TypeDefinition::Object(object) => {
            let mut def = TypeDef::new(&object.name, TypeKind::Object);
            def.interfaces = object.implements_interfaces.clone();
            def.fields = convert_fields(&object.fields);
            def
        }
        TypeDefinition::Interface(iface) => {
            let mut def = TypeDef::new(&iface.name, TypeKind::Interface);
            def.fields = convert_fields(&iface.fields);
            def
        }
        TypeDefinition::Union(union) => {
            let mut def = TypeDef::new(&union.name, TypeKind::Union);
            def.possible_types = union.types.iter().cloned().collect();
            def
        }
        TypeDefinition::Enum(enumeration) => {
            let mut def = TypeDef::new(&enumeration.name, TypeKind::Enum);
            def.enum_values = enumeration
                .values
                .iter()
                .map(|value| value.name.clone())
                .collect();
            def
        }
        TypeDefinition::InputObject(input) => {
            let mut def = TypeDef::new(&input.name, TypeKind::InputObject);
            def.input_fields = convert_input_values(&input.fields);
            def
        }
    }
}

fn apply_extension(
    types: &mut BTreeMap<String, TypeDef>,
    extension: &TypeExtension<'_, String>,
) -> Result<(), SchemaError> {
    let (name, kind) = match extension {
        TypeExtension::Scalar(scalar) => (&scalar.name, TypeKind::Scalar),
        TypeExtension::Object(object) => (&object.name, TypeKind::Object),
        TypeExtension::Interface(iface) => (&iface.name, TypeKind::Interface),
        TypeExtension::Union(union) => (&union.name, TypeKind::Union),
        TypeExtension::Enum(enumeration) => (&enumeration.name, TypeKind::Enum),
        TypeExtension::InputObject(input) => (&input.name, TypeKind::InputObject),
    };
    let def = types
        .get_mut(name)
        .ok_or_else(|| SchemaError::UnknownExtension(name.clone()))?;
    if def.kind != kind {
        return Err(SchemaError::ExtensionKind {
            name: name.clone(),
            kind: def.kind,
        });
    }

    match extension {
        TypeExtension::Scalar(_) => {}
        TypeExtension::Object(object) => {
            extend_members(&def.name, &mut def.fields, convert_fields(&object.fields))?;
            for iface in &object.implements_interfaces {
                if !def.interfaces.contains(iface) {
                    def.interfaces.push(iface.clone());
                }
            }
        }
        TypeExtension::Interface(iface) => {
            extend_members(&def.name, &mut def.fields, convert_fields(&iface.fields))?;
        }
        TypeExtension::Union(union) => def.possible_types.extend(union.types.iter().cloned()),
        TypeExtension::Enum(enumeration) => {
            for value in &enumeration.values {
                if def.enum_values.contains(&value.name) {
                    return Err(SchemaError::DuplicateMember {
                        type_name: def.name.clone(),
                        member: value.name.clone(),
                    });
                }
                def.enum_values.push(value.name.clone());
            }
        }
        TypeExtension::InputObject(input) => {
            extend_members(&def.name, &mut def.input_fields, convert_input_values(&input.fields))?;
        }
    }
    Ok(())
}

fn extend_members<T>(
    type_name: &str,
    members: &mut IndexMap<String, T>,
    added: IndexMap<String, T>,
) -> Result<(), SchemaError> {
    for (name, member) in added {
        if members.contains_key(&name) {
            return Err(SchemaError::DuplicateMember {
                type_name: type_name.to_string(),
                member: name,
            });
        }
        members.insert(name, member);
    }
    Ok(())
}

fn convert_fields(fields: &[sdl::Field<'_, String>]) -> IndexMap<String, FieldDef> {
    fields
        .iter()
        .map(|field| {
            (
                field.name.clone(),
                FieldDef {
                    name: field.name.clone(),
                    ty: TypeRef::from_ast(&field.field_type),
                    arguments: convert_input_values(&field.arguments),
                },
            )
        })
        .collect()
}

fn convert_input_values(values: &[sdl::InputValue<'_, String>]) -> IndexMap<String, InputValueDef> {
    values
        .iter()
        .map(|value| {
            (
                value.name.clone(),
                InputValueDef {
                    name: value.name.clone(),
                    ty: TypeRef::from_ast(&value.value_type),
                    has_default: value.default_value.is_some(),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDL: &str = r#"
        scalar DateTime
        interface Node { id: ID! }
        type User implements Node { id: ID! name: String! birthday: DateTime }
        type Cat implements Node { id: ID! }
        union Entity = User | Cat
        type Query { user: User! entities: [Entity!]! node(id: ID!): Node }
    "#;

    #[test]
    fn implicit_roots_and_builtins() {
        let schema = Schema::parse(SDL).expect("parse schema");
        assert_eq!(schema.query_type(), "Query");
        assert!(schema.mutation_type().is_none());
        assert_eq!(schema.kind_of("Int"), Some(TypeKind::Scalar));
        assert_eq!(schema.kind_of("DateTime"), Some(TypeKind::Scalar));
    }

    #[test]
    fn interfaces_collect_implementors() {
        let schema = Schema::parse(SDL).expect("parse schema");
        let possible: Vec<_> = schema.possible_types("Node").into_iter().collect();
        assert_eq!(possible, vec!["Cat".to_string(), "User".to_string()]);
        assert!(schema.types_overlap("Entity", "Node"));
        assert!(!schema.types_overlap("User", "Cat"));
    }

    #[test]
    fn typename_resolves_on_composites_only() {
        let schema = Schema::parse(SDL).expect("parse schema");
        assert!(schema.field("Entity", TYPENAME_FIELD).is_some());
        assert!(schema.field("DateTime", TYPENAME_FIELD).is_none());
    }

    #[test]
    fn type_ref_display_round_trips_wrappers() {
        let schema = Schema::parse(SDL).expect("parse schema");
        let field = schema.field("Query", "entities").expect("entities field");
        assert_eq!(field.type_ref().to_string(), "[Entity!]!");
        assert!(field.type_ref().is_list());
    }

    #[test]
    fn missing_query_root_is_rejected() {
        let err = Schema::parse("type User { id: ID! }").unwrap_err();
        assert!(matches!(err, SchemaError::MissingQueryRoot));
    }

    #[test]
    fn extensions_merge_into_their_base_types() {
        let source = format!(
            "{SDL}
            extend type Query {{ extra: Int! }}
            type Dog {{ id: ID! }}
            extend type Dog implements Node
            extend union Entity = Dog
            extend enum Mood {{ GRUMPY }}
            enum Mood {{ HAPPY }}"
        );
        let schema = Schema::parse(&source).expect("parse schema");
        assert!(schema.field("Query", "extra").is_some());
        assert!(schema.possible_types("Entity").contains("Dog"));
        assert!(schema.possible_types("Node").contains("Dog"));
        let mood = schema.get("Mood").expect("Mood");
        assert_eq!(mood.enum_values, ["HAPPY", "GRUMPY"]);
    }

    #[test]
    fn bad_extensions_are_rejected() {
        let err = Schema::parse(&format!("{SDL} extend type Missing {{ id: ID! }}")).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownExtension(ref name) if name == "Missing"));

        let err = Schema::parse(&format!("{SDL} extend union User = Cat")).unwrap_err();
        assert!(matches!(err, SchemaError::ExtensionKind { kind: TypeKind::Object, .. }));

        let err = Schema::parse(&format!("{SDL} extend type User {{ name: String }}")).unwrap_err();
        assert_eq!(err.to_string(), "extension redeclares \"User.name\"");
    }
}
