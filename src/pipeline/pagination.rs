//! Pagination shapes, `@paginate` validation and connection field completion.
use super::directives::PAGINATE_DIRECTIVE;
use super::visit::{
    ensure_field, for_each_field_mut, response_name_taken, root_type, type_condition_name, walk, FieldNode,
    Selections, Visitor,
};
use super::{Pass, PassContext};
use crate::document::{CollectedDocument, DocumentKind};
use crate::errors::CompileError;
use crate::resolver::{TypeResolver, DEFAULT_KEY_FIELD};
use crate::schema::{FieldDef, FieldRef, Schema};
use graphql_parser::query::{Definition, Value};
use graphql_parser::Pos;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Argument names that mark a field as paginated.
pub const PAGINATION_ARGUMENTS: [&str; 6] = ["first", "after", "last", "before", "offset", "limit"];

const PAGE_INFO_FIELDS: [&str; 4] = ["hasNextPage", "hasPreviousPage", "startCursor", "endCursor"];
const NODE_QUERY_FIELD: &str = "node";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaginationMode {
    #[default]
    None,
    CursorForward,
    CursorBackward,
    Offset,
}

impl PaginationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaginationMode::None => "none",
            PaginationMode::CursorForward => "cursor-forward",
            PaginationMode::CursorBackward => "cursor-backward",
            PaginationMode::Offset => "offset",
        }
    }

    pub fn is_cursor(&self) -> bool {
        matches!(self, PaginationMode::CursorForward | PaginationMode::CursorBackward)
    }
}

impl fmt::Display for PaginationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Argument sets a field may declare to be paginated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationShape {
    /// `first`/`after` and `last`/`before`.
    Bidirectional,
    Forward,
    Backward,
    /// `limit` with optional `offset`.
    Offset,
}

impl PaginationShape {
    pub fn page_size_arguments(&self) -> &'static [&'static str] {
        match self {
            PaginationShape::Bidirectional => &["first", "last"],
            PaginationShape::Forward => &["first"],
            PaginationShape::Backward => &["last"],
            PaginationShape::Offset => &["limit"],
        }
    }

    pub fn is_cursor(&self) -> bool {
        !matches!(self, PaginationShape::Offset)
    }
}

/// Classify a field by its declared arguments.
///
/// `None` when the field declares no pagination-like argument; an error when
/// it declares some but they form none of the recognized shapes.
pub fn analyze_field(def: &FieldDef) -> Option<Result<PaginationShape, String>> {
    let has = |name: &str| def.arguments.contains_key(name);
    let declared: Vec<&str> = PAGINATION_ARGUMENTS.into_iter().filter(|name| has(name)).collect();
    if declared.is_empty() {
        return None;
    }
    let forward = has("first") && has("after");
    let backward = has("last") && has("before");
    let any_forward = has("first") || has("after");
    let any_backward = has("last") || has("before");
    let any_offset = has("offset") || has("limit");

    let shape = match (forward, backward, any_offset) {
        (true, true, false) => Some(PaginationShape::Bidirectional),
        (true, false, false) if !any_backward => Some(PaginationShape::Forward),
        (false, true, false) if !any_forward => Some(PaginationShape::Backward),
        (false, false, true) if !any_forward && !any_backward && has("limit") => {
            Some(PaginationShape::Offset)
        }
        _ => None,
    };
    Some(shape.ok_or_else(|| {
        format!(
            "field \"{}\" declares pagination arguments ({}) that match no supported shape",
            def.name,
            declared.join(", ")
        )
    }))
}

/// Mode and page size implied by the arguments a paginated field is passed.
pub fn field_mode(def: &FieldDef, field: &FieldNode) -> Result<(PaginationMode, Option<i64>), String> {
    let shape = match analyze_field(def) {
        None => {
            return Err(format!(
                "field \"{}\" declares no pagination arguments",
                def.name
            ))
        }
        Some(shape) => shape?,
    };
    let passed: Vec<(&str, &Value<'static, String>)> = field
        .arguments
        .iter()
        .filter(|(name, _)| shape.page_size_arguments().contains(&name.as_str()))
        .map(|(name, value)| (name.as_str(), value))
        .collect();
    let (argument, value) = match passed.as_slice() {
        [single] => *single,
        [] => {
            return Err(format!(
                "paginated field \"{}\" must pass {}",
                def.name,
                shape.page_size_arguments().join(" or ")
            ))
        }
        _ => {
            return Err(format!(
                "paginated field \"{}\" cannot pass both first and last",
                def.name
            ))
        }
    };
    let mode = match argument {
        "first" => PaginationMode::CursorForward,
        "last" => PaginationMode::CursorBackward,
        _ => PaginationMode::Offset,
    };
    let page_size = match value {
        Value::Int(number) => number.as_i64(),
        Value::Variable(_) => None,
        _ => return Err(format!("{argument} on \"{}\" must be an Int", def.name)),
    };
    Ok((mode, page_size))
}

/// Whether a type follows the connection layout (`edges { node }`, `pageInfo`).
pub fn is_connection(schema: &Schema, type_name: &str) -> bool {
    let Some(def) = schema.get(type_name) else {
        return false;
    };
    let edges = def
        .field("edges")
        .and_then(|edges| schema.get(edges.ty.named()))
        .is_some_and(|edge| edge.field("node").is_some());
    edges && def.field("pageInfo").is_some()
}

/// How a fragment's parent is fetched again to load the next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Refetch {
    pub query_field: String,
    pub target_type: String,
    pub keys: Vec<String>,
}

/// Explicit `types[T].resolve` wins; `["id"]` types fall back to `node`.
pub fn refetch_for(resolver: &TypeResolver<'_>, type_name: &str) -> Result<Refetch, String> {
    let keys = resolver.identity_key(type_name).to_vec();
    if let Some(resolve) = resolver.resolve_field(type_name) {
        return Ok(Refetch {
            query_field: resolve.query_field.clone(),
            target_type: type_name.to_string(),
            keys,
        });
    }
    let schema = resolver.schema();
    if keys == [DEFAULT_KEY_FIELD] && schema.field(schema.query_type(), NODE_QUERY_FIELD).is_some() {
        return Ok(Refetch {
            query_field: NODE_QUERY_FIELD.to_string(),
            target_type: type_name.to_string(),
            keys,
        });
    }
    Err(format!("type \"{type_name}\" cannot be refetched to load more pages"))
}

pub(crate) fn is_paginated(field: &FieldNode) -> bool {
    field
        .directives
        .iter()
        .any(|directive| directive.name == PAGINATE_DIRECTIVE)
}

/// Validates `@paginate` usage and completes cursor connections with the
/// `pageInfo` and `edges.cursor` fields the runtime needs.
pub struct PaginationArguments;

impl Pass for PaginationArguments {
    fn name(&self) -> &str {
        "pagination_arguments"
    }

    fn run(&self, ctx: &PassContext<'_>, documents: &mut [CollectedDocument]) -> Vec<CompileError> {
        documents
            .par_iter_mut()
            .map(|document| {
                let (mut errors, completion) = check_document(ctx.resolver, document);
                if let Some(completion) = completion {
                    let mut taken = Vec::new();
                    document.rewrite(|working| {
                        let mut changed = false;
                        for definition in &mut working.definitions {
                            let selections = crate::document::definition_selection_set_mut(definition);
                            for_each_field_mut(selections, &mut |field| {
                                if is_paginated(field) {
                                    changed |= completion.apply(field, &mut taken);
                                }
                            });
                        }
                        changed
                    });
                    errors.extend(taken.into_iter().map(|(message, position)| {
                        CompileError::validation(message)
                            .in_document(&document.name)
                            .at(position)
                    }));
                }
                errors
            })
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    }
}

struct PaginatedField<'a> {
    def: Option<&'a FieldDef>,
    field: &'a FieldNode,
}

#[derive(Default)]
struct Finder<'a> {
    found: Vec<PaginatedField<'a>>,
}

impl<'a> Visitor<'a> for Finder<'a> {
    fn field(&mut self, _parent: &'a str, field: &'a FieldNode, def: Option<FieldRef<'a>>, _path: &[String]) {
        if is_paginated(field) {
            let def = match def {
                Some(FieldRef::Declared(def)) => Some(def),
                _ => None,
            };
            self.found.push(PaginatedField { def, field });
        }
    }
}

/// Connection fields to add below the paginated field.
struct ConnectionCompletion {
    page_info: Vec<&'static str>,
    edge_cursor: bool,
}

impl ConnectionCompletion {
    fn plan(schema: &Schema, connection: &str) -> Self {
        let def = schema.get(connection);
        let page_info = def
            .and_then(|def| def.field("pageInfo"))
            .and_then(|field| schema.get(field.ty.named()))
            .map(|page_info| {
                PAGE_INFO_FIELDS
                    .into_iter()
                    .filter(|name| page_info.field(name).is_some())
                    .collect()
            })
            .unwrap_or_default();
        let edge_cursor = def
            .and_then(|def| def.field("edges"))
            .and_then(|field| schema.get(field.ty.named()))
            .is_some_and(|edge| edge.field("cursor").is_some());
        Self {
            page_info,
            edge_cursor,
        }
    }

    /// Add the missing fields below `field`. Names already answered by other
    /// fields are reported in `taken` instead.
    fn apply(&self, field: &mut FieldNode, taken: &mut Vec<(String, Pos)>) -> bool {
        let mut changed = false;
        if let Some((page_info, added)) = ensure_connection_field(&mut field.selection_set, "pageInfo", taken) {
            changed |= added;
            for name in &self.page_info {
                if let Some((_, added)) = ensure_connection_field(&mut page_info.selection_set, name, taken) {
                    changed |= added;
                }
            }
        }
        if self.edge_cursor {
            if let Some((edges, added)) = ensure_connection_field(&mut field.selection_set, "edges", taken) {
                changed |= added;
                if let Some((_, added)) = ensure_connection_field(&mut edges.selection_set, "cursor", taken) {
                    changed |= added;
                }
            }
        }
        changed
    }
}

fn ensure_connection_field<'s>(
    selections: &'s mut Selections,
    name: &str,
    taken: &mut Vec<(String, Pos)>,
) -> Option<(&'s mut FieldNode, bool)> {
    if let Some(other) = response_name_taken(selections, name) {
        taken.push((
            format!(
                "response name \"{name}\" is needed for pagination but selects \"{}\"",
                other.name
            ),
            other.position,
        ));
        return None;
    }
    ensure_field(selections, name)
}

fn check_document(
    resolver: &TypeResolver<'_>,
    document: &CollectedDocument,
) -> (Vec<CompileError>, Option<ConnectionCompletion>) {
    let schema = resolver.schema();
    let mut errors = Vec::new();
    let (Some(root), Some(selections)) = (root_type(schema, document), document.selection_set()) else {
        return (errors, None);
    };
    let mut finder = Finder::default();
    walk(schema, root, selections, &mut finder);
    let error = |message: String, position: Pos| {
        CompileError::validation(message)
            .in_document(&document.name)
            .at(position)
    };

    if let Some(extra) = finder.found.get(1) {
        errors.push(
            error("a document can contain at most one @paginate field".to_string(), extra.field.position)
                .with_hint("split the paginated selections into separate documents"),
        );
    }
    let Some(paginated) = finder.found.first() else {
        return (errors, None);
    };
    let position = paginated.field.position;
    if matches!(document.kind, DocumentKind::Mutation | DocumentKind::Subscription) {
        errors.push(error(
            format!("@paginate cannot be used in a {}", document.kind),
            position,
        ));
        return (errors, None);
    }
    let Some(def) = paginated.def else {
        return (errors, None);
    };

    let mode = match field_mode(def, paginated.field) {
        Ok((mode, _)) => mode,
        Err(reason) => {
            errors.push(error(reason, position));
            return (errors, None);
        }
    };
    let target = def.ty.named();
    if mode.is_cursor() && !is_connection(schema, target) {
        errors.push(
            error(
                format!("cursor pagination on \"{}\" requires a connection type, found \"{target}\"", def.name),
                position,
            )
            .with_hint("connections select edges { node } and pageInfo"),
        );
        return (errors, None);
    }

    if let Some(Definition::Fragment(fragment)) = document.definition() {
        let parent = type_condition_name(&fragment.type_condition);
        if let Err(reason) = refetch_for(resolver, parent) {
            errors.push(
                error(reason, position)
                    .with_hint(format!("set types.{parent}.resolve.queryField in the config")),
            );
        }
    }

    let completion = mode
        .is_cursor()
        .then(|| ConnectionCompletion::plan(schema, target));
    (errors, completion)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDL: &str = r#"
        type PageInfo { hasNextPage: Boolean! hasPreviousPage: Boolean! startCursor: String endCursor: String }
        type User { id: ID! name: String! }
        type UserEdge { cursor: String node: User }
        type UserConnection { edges: [UserEdge!]! pageInfo: PageInfo! }
        type Query {
            both(first: Int, after: String, last: Int, before: String): UserConnection!
            forward(first: Int, after: String): UserConnection!
            backward(last: Int, before: String): UserConnection!
            offset(limit: Int, offset: Int): [User!]!
            broken(first: Int, limit: Int): [User!]!
            plain(id: ID): User
        }
    "#;

    fn def(name: &str) -> FieldDef {
        let schema = Schema::parse(SDL).expect("schema");
        match schema.field("Query", name) {
            Some(FieldRef::Declared(def)) => def.clone(),
            _ => panic!("missing field {name}"),
        }
    }

    #[test]
    fn shapes_follow_declared_arguments() {
        assert_eq!(analyze_field(&def("both")), Some(Ok(PaginationShape::Bidirectional)));
        assert_eq!(analyze_field(&def("forward")), Some(Ok(PaginationShape::Forward)));
        assert_eq!(analyze_field(&def("backward")), Some(Ok(PaginationShape::Backward)));
        assert_eq!(analyze_field(&def("offset")), Some(Ok(PaginationShape::Offset)));
        assert_eq!(analyze_field(&def("plain")), None);
    }

    #[test]
    fn mixed_arguments_are_rejected_not_ignored() {
        let err = analyze_field(&def("broken")).expect("pagination-like").unwrap_err();
        assert!(err.contains("first, limit"));
    }

    #[test]
    fn connection_layout_is_detected() {
        let schema = Schema::parse(SDL).expect("schema");
        assert!(is_connection(&schema, "UserConnection"));
        assert!(!is_connection(&schema, "User"));
    }

    #[test]
    fn mode_names_are_kebab_case() {
        assert_eq!(
            serde_json::to_string(&PaginationMode::CursorBackward).expect("serialize"),
            "\"cursor-backward\""
        );
        assert_eq!(PaginationMode::default().as_str(), "none");
    }
}
