//! Artifact generation.
//!
//! An [`Artifact`] is the compiled, framework-agnostic description of one
//! document: its selection shape, inputs, pagination and cache metadata.
//! Generation is a pure function of the validated document, the schema and the
//! config, so identical inputs always serialize to identical bytes.
use crate::config::CachePolicy;
use crate::document::{definition_selection_set_mut, CollectedDocument, DocumentKind, ExecutableDocument};
use crate::errors::{CompileError, ErrorSet};
use crate::pipeline::directives::{cache_override, INTERNAL_DIRECTIVES, LIST_DIRECTIVE};
use crate::pipeline::fragments::inlined_fragment;
use crate::pipeline::pagination::{field_mode, is_paginated, refetch_for, PaginationMode, Refetch};
use crate::pipeline::visit::{argument, response_name, root_type, type_condition_name, FieldNode, Selections, ValueNode};
use crate::pipeline::PAGINATION_ARGUMENTS;
use crate::resolver::TypeResolver;
use crate::schema::{FieldRef, TypeKind, TypeRef};
use graphql_parser::query::{Definition, Directive, OperationDefinition, Selection, Value};
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Suffix appended to the cache key of a paginated field.
pub const PAGINATED_KEY_SUFFIX: &str = "::paginated";

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub name: String,
    pub kind: DocumentKind,
    /// sha256 of the pristine document text.
    pub hash: String,
    /// Document sent to the server, without compiler-only directives.
    pub raw: String,
    pub root_type: String,
    pub selection: SelectionShape,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputShape>,
    #[serde(default)]
    pub pagination: PaginationInfo,
    /// Identity key template per returned type, copied at generation time.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<CachePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionShape {
    pub fields: IndexMap<String, FieldShape>,
    /// Selections that only apply when the value has the named concrete type.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: BTreeMap<String, SelectionShape>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fragments: Vec<FragmentRef>,
}

impl SelectionShape {
    /// Fold `other` into this shape. Response names that would merge two
    /// different schema fields are left alone and pushed to `conflicts`.
    fn merge(&mut self, other: SelectionShape, conflicts: &mut Vec<String>) {
        for (name, field) in other.fields {
            merge_field(&mut self.fields, name, field, conflicts);
        }
        for (condition, shape) in other.conditions {
            self.conditions
                .entry(condition)
                .or_default()
                .merge(shape, conflicts);
        }
        for fragment in other.fragments {
            if !self.fragments.contains(&fragment) {
                self.fragments.push(fragment);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentRef {
    pub name: String,
    pub masked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldShape {
    /// Schema field backing this response name.
    pub field: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub type_ref: String,
    /// Cache key: field name plus arguments.
    pub key_raw: String,
    pub nullable: bool,
    pub list: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marshal: Option<String>,
    /// Only selected through masked fragments.
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_name: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub paginated: bool,
    #[serde(rename = "abstract", default, skip_serializing_if = "is_false")]
    pub is_abstract: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionShape>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputShape {
    /// Variable name to its declared type.
    pub fields: IndexMap<String, String>,
    /// Input object types reachable from the variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub types: BTreeMap<String, IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub defaults: IndexMap<String, serde_json::Value>,
    /// Variables (or `Type.field` input fields) whose scalar needs a codec.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub marshal: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    pub mode: PaginationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refetch: Option<Refetch>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Compile one document into its artifact.
pub fn generate(resolver: &TypeResolver<'_>, document: &CollectedDocument) -> Result<Artifact, Vec<CompileError>> {
    let schema = resolver.schema();
    let generation_error = |message: String| CompileError::generation(message).in_document(&document.name);
    let (Some(root), Some(selections)) = (root_type(schema, document), document.selection_set()) else {
        return Err(vec![generation_error(format!(
            "document {} has no resolvable root type",
            document.name
        ))]);
    };

    let mut generator = Generator {
        resolver,
        document,
        errors: Vec::new(),
        keys: BTreeMap::new(),
        pagination: None,
        inlined_depth: 0,
    };
    generator.record_keys(root);
    let mut selection = SelectionShape::default();
    let mut path = Vec::new();
    generator.compile(root, selections, false, &mut path, &mut selection);
    let input = generator.input();

    let Generator {
        errors,
        keys,
        pagination,
        ..
    } = generator;
    if !errors.is_empty() {
        return Err(errors);
    }

    let (policy, partial) = match document.kind {
        DocumentKind::Query => {
            let (policy, partial) = cache_override(document);
            let config = resolver.config();
            (
                Some(policy.unwrap_or(config.default_cache_policy)),
                Some(partial.unwrap_or(config.default_partial)),
            )
        }
        _ => (None, None),
    };

    Ok(Artifact {
        name: document.name.clone(),
        kind: document.kind,
        hash: sha256_hex(document.original_text().as_bytes()),
        raw: print_network_document(document.document()),
        root_type: root.to_string(),
        selection,
        input,
        pagination: pagination.unwrap_or_default(),
        keys,
        policy,
        partial,
    })
}

/// Generate artifacts for every document that asks for one, in document order.
pub fn generate_all(resolver: &TypeResolver<'_>, documents: &[CollectedDocument]) -> Result<Vec<Artifact>, ErrorSet> {
    let start = Instant::now();
    let results: Vec<Result<Artifact, Vec<CompileError>>> = documents
        .par_iter()
        .filter(|document| document.generate_artifact)
        .map(|document| generate(resolver, document))
        .collect();

    let mut artifacts = Vec::with_capacity(results.len());
    let mut errors = ErrorSet::new();
    for result in results {
        match result {
            Ok(artifact) => artifacts.push(artifact),
            Err(found) => errors.extend(found),
        }
    }
    tracing::debug!(
        artifacts = artifacts.len(),
        errors = errors.len(),
        elapsed_ms = start.elapsed().as_millis(),
        "artifact generation complete"
    );
    errors.into_result(artifacts)
}

struct Generator<'g, 'c> {
    resolver: &'g TypeResolver<'c>,
    document: &'g CollectedDocument,
    errors: Vec<CompileError>,
    keys: BTreeMap<String, Vec<String>>,
    pagination: Option<PaginationInfo>,
    /// Nesting level inside inlined fragments; their `@paginate` fields
    /// belong to the fragment's own artifact.
    inlined_depth: usize,
}

impl Generator<'_, '_> {
    fn error(&mut self, message: String, position: graphql_parser::Pos) {
        self.errors.push(
            CompileError::generation(message)
                .in_document(&self.document.name)
                .at(position),
        );
    }

    fn record_keys(&mut self, type_name: &str) {
        let keys = self.resolver.identity_key(type_name);
        if !keys.is_empty() {
            self.keys.insert(type_name.to_string(), keys.to_vec());
        }
    }

    /// Walk `selections` in lock-step with the schema type `parent`.
    fn compile(
        &mut self,
        parent: &str,
        selections: &Selections,
        hidden: bool,
        path: &mut Vec<String>,
        shape: &mut SelectionShape,
    ) {
        let schema = self.resolver.schema();
        for selection in &selections.items {
            match selection {
                Selection::Field(field) => {
                    let Some(def) = schema.field(parent, &field.name) else {
                        self.error(
                            format!("field \"{}\" does not resolve on type \"{parent}\"", field.name),
                            field.position,
                        );
                        continue;
                    };
                    let name = response_name(field).to_string();
                    path.push(name.clone());
                    let compiled = self.compile_field(field, def, hidden, path);
                    path.pop();
                    let mut conflicts = Vec::new();
                    merge_field(&mut shape.fields, name, compiled, &mut conflicts);
                    for conflict in conflicts {
                        self.error(conflict, field.position);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    let condition = fragment
                        .type_condition
                        .as_ref()
                        .map(type_condition_name)
                        .unwrap_or(parent);
                    let mut child_hidden = hidden;
                    let inlined = inlined_fragment(fragment);
                    if let Some((name, masked)) = &inlined {
                        let reference = FragmentRef {
                            name: name.clone(),
                            masked: *masked,
                        };
                        if !shape.fragments.contains(&reference) {
                            shape.fragments.push(reference);
                        }
                        child_hidden |= *masked;
                        self.inlined_depth += 1;
                    }
                    if condition == parent {
                        self.compile(parent, &fragment.selection_set, child_hidden, path, shape);
                    } else {
                        self.record_keys(condition);
                        let mut conditional = SelectionShape::default();
                        self.compile(condition, &fragment.selection_set, child_hidden, path, &mut conditional);
                        let mut conflicts = Vec::new();
                        shape
                            .conditions
                            .entry(condition.to_string())
                            .or_default()
                            .merge(conditional, &mut conflicts);
                        for conflict in conflicts {
                            self.error(conflict, fragment.position);
                        }
                    }
                    if inlined.is_some() {
                        self.inlined_depth -= 1;
                    }
                }
                Selection::FragmentSpread(spread) => self.error(
                    format!("fragment spread ...{} was not inlined before generation", spread.fragment_name),
                    spread.position,
                ),
            }
        }
    }

    fn compile_field(
        &mut self,
        field: &FieldNode,
        def: FieldRef<'_>,
        hidden: bool,
        path: &[String],
    ) -> FieldShape {
        let schema = self.resolver.schema();
        let type_name = def.type_name().to_string();
        let type_ref = def.type_ref();
        let kind = schema.kind_of(&type_name);
        let paginated = is_paginated(field);
        if paginated && self.inlined_depth == 0 {
            self.record_pagination(field, def, path);
        }

        let marshal = (kind == Some(TypeKind::Scalar) && self.resolver.needs_marshal(&type_name))
            .then(|| type_name.clone());
        let list_name = field
            .directives
            .iter()
            .find(|directive| directive.name == LIST_DIRECTIVE)
            .and_then(|directive| match argument(&directive.arguments, "name") {
                Some(Value::String(name)) => Some(name.clone()),
                _ => None,
            });

        let selection = match kind {
            Some(kind) if kind.is_composite() => {
                if field.selection_set.items.is_empty() {
                    self.error(
                        format!("composite field \"{}\" has no selection", field.name),
                        field.position,
                    );
                }
                self.record_keys(&type_name);
                let mut nested = SelectionShape::default();
                let mut nested_path = path.to_vec();
                self.compile(&type_name, &field.selection_set, hidden, &mut nested_path, &mut nested);
                Some(nested)
            }
            _ => None,
        };

        FieldShape {
            field: field.name.clone(),
            key_raw: field_key(field, paginated),
            nullable: type_ref.is_nullable(),
            list: type_ref.is_list(),
            type_ref: type_ref.to_string(),
            is_abstract: kind.is_some_and(TypeKind::is_abstract),
            type_name,
            marshal,
            hidden,
            list_name,
            paginated,
            selection,
        }
    }

    fn record_pagination(&mut self, field: &FieldNode, def: FieldRef<'_>, path: &[String]) {
        if self.pagination.is_some() {
            self.error(
                "document selects more than one paginated field".to_string(),
                field.position,
            );
            return;
        }
        let FieldRef::Declared(declared) = def else {
            self.error("__typename cannot be paginated".to_string(), field.position);
            return;
        };
        let (mode, page_size) = match field_mode(declared, field) {
            Ok(found) => found,
            Err(reason) => {
                self.error(reason, field.position);
                return;
            }
        };
        let refetch = match self.document.definition() {
            Some(Definition::Fragment(fragment)) => {
                match refetch_for(self.resolver, type_condition_name(&fragment.type_condition)) {
                    Ok(refetch) => Some(refetch),
                    Err(reason) => {
                        self.error(reason, field.position);
                        return;
                    }
                }
            }
            _ => None,
        };
        self.pagination = Some(PaginationInfo {
            mode,
            path: Some(path.to_vec()),
            page_size,
            refetch,
        });
    }

    fn input(&self) -> Option<InputShape> {
        let variables = match self.document.definition()? {
            Definition::Operation(OperationDefinition::Query(query)) => &query.variable_definitions,
            Definition::Operation(OperationDefinition::Mutation(mutation)) => &mutation.variable_definitions,
            Definition::Operation(OperationDefinition::Subscription(subscription)) => {
                &subscription.variable_definitions
            }
            _ => return None,
        };
        if variables.is_empty() {
            return None;
        }
        let mut input = InputShape::default();
        for variable in variables {
            let ty = TypeRef::from_ast(&variable.var_type);
            let named = ty.named().to_string();
            input.fields.insert(variable.name.clone(), ty.to_string());
            if let Some(default) = &variable.default_value {
                input.defaults.insert(variable.name.clone(), value_to_json(default));
            }
            if self.resolver.needs_marshal(&named) {
                input.marshal.insert(variable.name.clone(), named.clone());
            }
            let mut visited = BTreeSet::new();
            self.collect_input_type(&named, &mut input, &mut visited);
        }
        Some(input)
    }

    fn collect_input_type(&self, type_name: &str, input: &mut InputShape, visited: &mut BTreeSet<String>) {
        let schema = self.resolver.schema();
        let Some(def) = schema.get(type_name) else {
            return;
        };
        if def.kind != TypeKind::InputObject || !visited.insert(type_name.to_string()) {
            return;
        }
        let fields: IndexMap<String, String> = def
            .input_fields
            .values()
            .map(|field| (field.name.clone(), field.ty.to_string()))
            .collect();
        input.types.insert(type_name.to_string(), fields);
        for field in def.input_fields.values() {
            let named = field.ty.named();
            if self.resolver.needs_marshal(named) {
                input
                    .marshal
                    .insert(format!("{type_name}.{}", field.name), named.to_string());
            }
            self.collect_input_type(named, input, visited);
        }
    }
}

fn merge_field(
    fields: &mut IndexMap<String, FieldShape>,
    name: String,
    field: FieldShape,
    conflicts: &mut Vec<String>,
) {
    match fields.get_mut(&name) {
        Some(existing) if existing.field != field.field => conflicts.push(format!(
            "response name \"{name}\" cannot merge fields \"{}\" and \"{}\"",
            existing.field, field.field
        )),
        Some(existing) => {
            // visible if any path selects it unmasked
            existing.hidden &= field.hidden;
            existing.paginated |= field.paginated;
            if existing.list_name.is_none() {
                existing.list_name = field.list_name;
            }
            match (&mut existing.selection, field.selection) {
                (Some(into), Some(from)) => into.merge(from, conflicts),
                (None, Some(from)) => existing.selection = Some(from),
                _ => {}
            }
        }
        None => {
            fields.insert(name, field);
        }
    }
}

/// Cache key for a field: its name and arguments, with pagination arguments
/// dropped from paginated fields.
pub fn field_key(field: &FieldNode, paginated: bool) -> String {
    let arguments: Vec<String> = field
        .arguments
        .iter()
        .filter(|(name, _)| !paginated || !PAGINATION_ARGUMENTS.contains(&name.as_str()))
        .map(|(name, value)| format!("{name}: {}", print_value(value)))
        .collect();
    let mut key = if arguments.is_empty() {
        field.name.clone()
    } else {
        format!("{}({})", field.name, arguments.join(", "))
    };
    if paginated {
        key.push_str(PAGINATED_KEY_SUFFIX);
    }
    key
}

pub fn print_value(value: &ValueNode) -> String {
    match value {
        Value::Variable(name) => format!("${name}"),
        Value::Int(number) => number.as_i64().map(|n| n.to_string()).unwrap_or_default(),
        Value::Float(number) => number.to_string(),
        Value::String(text) => serde_json::Value::String(text.clone()).to_string(),
        Value::Boolean(flag) => flag.to_string(),
        Value::Null => "null".to_string(),
        Value::Enum(name) => name.clone(),
        Value::List(items) => format!("[{}]", items.iter().map(print_value).collect::<Vec<_>>().join(", ")),
        Value::Object(fields) => format!(
            "{{{}}}",
            fields
                .iter()
                .map(|(name, value)| format!("{name}: {}", print_value(value)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn value_to_json(value: &ValueNode) -> serde_json::Value {
    match value {
        Value::Int(number) => number.as_i64().map(serde_json::Value::from).unwrap_or_default(),
        Value::Float(number) => serde_json::Number::from_f64(*number)
            .map(serde_json::Value::Number)
            .unwrap_or_default(),
        Value::String(text) | Value::Enum(text) => serde_json::Value::String(text.clone()),
        Value::Boolean(flag) => serde_json::Value::Bool(*flag),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Object(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), value_to_json(value)))
                .collect(),
        ),
        Value::Null | Value::Variable(_) => serde_json::Value::Null,
    }
}

/// Print the working document without compiler-only directives.
pub fn print_network_document(document: &ExecutableDocument) -> String {
    let mut printable = document.clone();
    for definition in &mut printable.definitions {
        match definition {
            Definition::Fragment(fragment) => strip(&mut fragment.directives),
            Definition::Operation(OperationDefinition::Query(query)) => strip(&mut query.directives),
            Definition::Operation(OperationDefinition::Mutation(mutation)) => strip(&mut mutation.directives),
            Definition::Operation(OperationDefinition::Subscription(subscription)) => {
                strip(&mut subscription.directives)
            }
            Definition::Operation(OperationDefinition::SelectionSet(_)) => {}
        }
        strip_selections(definition_selection_set_mut(definition));
    }
    printable.to_string()
}

fn strip(directives: &mut Vec<Directive<'static, String>>) {
    directives.retain(|directive| !INTERNAL_DIRECTIVES.contains(&directive.name.as_str()));
}

fn strip_selections(selections: &mut Selections) {
    for selection in &mut selections.items {
        match selection {
            Selection::Field(field) => {
                strip(&mut field.directives);
                strip_selections(&mut field.selection_set);
            }
            Selection::InlineFragment(fragment) => {
                strip(&mut fragment.directives);
                strip_selections(&mut fragment.selection_set);
            }
            Selection::FragmentSpread(spread) => strip(&mut spread.directives),
        }
    }
}

#[cfg(test)]
#[path = "artifact_tests.rs"]
mod tests;
