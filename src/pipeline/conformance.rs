//! Every field, argument, spread and variable must resolve against the schema.
use super::fragments::FragmentRegistry;
use super::visit::{argument, response_name, root_type, type_condition_name, walk, FieldNode, Selections, Visitor};
use super::{Pass, PassContext};
use crate::document::{CollectedDocument, DocumentKind};
use crate::errors::CompileError;
use crate::schema::{FieldRef, Schema, TypeKind, TypeRef};
use graphql_parser::query::{
    Definition, FragmentSpread, InlineFragment, OperationDefinition, Selection, VariableDefinition,
};
use graphql_parser::Pos;
use indexmap::IndexMap;
use rayon::prelude::*;
use std::collections::BTreeSet;

pub struct SchemaConformance;

impl Pass for SchemaConformance {
    fn name(&self) -> &str {
        "schema_conformance"
    }

    fn run(&self, ctx: &PassContext<'_>, documents: &mut [CollectedDocument]) -> Vec<CompileError> {
        let schema = ctx.resolver.schema();
        documents
            .par_iter()
            .map(|document| check_document(schema, ctx.fragments, document))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    }
}

fn check_document(
    schema: &Schema,
    fragments: &FragmentRegistry,
    document: &CollectedDocument,
) -> Vec<CompileError> {
    let mut errors = Vec::new();
    let Some(definition) = document.definition() else {
        return errors;
    };
    let located = |message: String| CompileError::validation(message).in_document(&document.name);

    let Some(root) = root_type(schema, document) else {
        let mut error = located(format!("schema has no {} root type", document.kind));
        if let Some(location) = document.location() {
            error = error.at(location);
        }
        errors.push(error);
        return errors;
    };

    if let Definition::Fragment(fragment) = definition {
        let condition = type_condition_name(&fragment.type_condition);
        match schema.kind_of(condition) {
            None => {
                errors.push(
                    located(format!("fragment {} is declared on unknown type \"{condition}\"", fragment.name))
                        .at(fragment.position),
                );
                return errors;
            }
            Some(kind) if !kind.is_composite() => {
                errors.push(
                    located(format!(
                        "fragment {} cannot be declared on non-composite type \"{condition}\"",
                        fragment.name
                    ))
                    .at(fragment.position),
                );
                return errors;
            }
            Some(_) => {}
        }
        if fragments.is_cyclic(&fragment.name) {
            errors.push(
                located(format!("fragment {} spreads itself through a cycle", fragment.name))
                    .at(fragment.position)
                    .with_hint("break the cycle; fragments cannot reference themselves"),
            );
        }
    }

    if let Some(variables) = variable_definitions(definition) {
        check_variables(schema, fragments, document, variables, &mut errors);
    }

    if let Some(selections) = document.selection_set() {
        let mut checker = FieldChecker {
            schema,
            fragments,
            document: &document.name,
            errors: Vec::new(),
        };
        walk(schema, root, selections, &mut checker);
        errors.extend(checker.errors);
        check_merges(schema, fragments, &document.name, &[(root, selections, None)], &mut errors);
    }
    errors
}

/// One selection set contributing to a response object. `via` is the spread
/// that brought it in from another document.
type ScopePart<'a> = (&'a str, &'a Selections, Option<Pos>);

struct ScopedField<'a> {
    parent: &'a str,
    field: &'a FieldNode,
    via: Option<Pos>,
}

impl ScopedField<'_> {
    fn position(&self) -> Pos {
        self.via.unwrap_or(self.field.position)
    }
}

/// Selections sharing a response name must select the same field with the
/// same arguments, unless their parents can never be the same object.
fn check_merges<'a>(
    schema: &'a Schema,
    fragments: &'a FragmentRegistry,
    document: &str,
    scope: &[ScopePart<'a>],
    errors: &mut Vec<CompileError>,
) {
    let mut grouped: IndexMap<&'a str, Vec<ScopedField<'a>>> = IndexMap::new();
    let mut visited = BTreeSet::new();
    for &(parent, selections, via) in scope {
        flatten_scope(fragments, parent, selections, via, &mut visited, &mut grouped);
    }

    for (name, fields) in &grouped {
        let Some((first, rest)) = fields.split_first() else {
            continue;
        };
        let mut children = Vec::new();
        push_children(schema, first, &mut children);
        for other in rest {
            if !can_coincide(schema, first.parent, other.parent) {
                continue;
            }
            if let Some(message) = merge_conflict(name, first.field, other.field) {
                errors.push(
                    CompileError::validation(message)
                        .in_document(document)
                        .at(other.position())
                        .with_hint("give the selections distinct aliases"),
                );
                continue;
            }
            push_children(schema, other, &mut children);
        }
        if !children.is_empty() {
            check_merges(schema, fragments, document, &children, errors);
        }
    }
}

fn flatten_scope<'a>(
    fragments: &'a FragmentRegistry,
    parent: &'a str,
    selections: &'a Selections,
    via: Option<Pos>,
    visited: &mut BTreeSet<&'a str>,
    grouped: &mut IndexMap<&'a str, Vec<ScopedField<'a>>>,
) {
    for selection in &selections.items {
        match selection {
            Selection::Field(field) => grouped
                .entry(response_name(field))
                .or_default()
                .push(ScopedField { parent, field, via }),
            Selection::InlineFragment(fragment) => {
                let condition = fragment
                    .type_condition
                    .as_ref()
                    .map_or(parent, type_condition_name);
                flatten_scope(fragments, condition, &fragment.selection_set, via, visited, grouped);
            }
            Selection::FragmentSpread(spread) => {
                if !visited.insert(spread.fragment_name.as_str()) {
                    continue;
                }
                if let Some(fragment) = fragments.get(&spread.fragment_name) {
                    flatten_scope(
                        fragments,
                        type_condition_name(&fragment.type_condition),
                        &fragment.selection_set,
                        via.or(Some(spread.position)),
                        visited,
                        grouped,
                    );
                }
            }
        }
    }
}

fn can_coincide(schema: &Schema, left: &str, right: &str) -> bool {
    let is_object = |name: &str| schema.kind_of(name) == Some(TypeKind::Object);
    left == right || !is_object(left) || !is_object(right)
}

fn merge_conflict(name: &str, first: &FieldNode, other: &FieldNode) -> Option<String> {
    if first.name != other.name {
        return Some(format!(
            "response name \"{name}\" selects both \"{}\" and \"{}\"",
            first.name, other.name
        ));
    }
    let same_arguments = first.arguments.len() == other.arguments.len()
        && first
            .arguments
            .iter()
            .all(|(key, value)| argument(&other.arguments, key) == Some(value));
    (!same_arguments).then(|| {
        format!(
            "response name \"{name}\" selects \"{}\" with different arguments",
            first.name
        )
    })
}

fn push_children<'a>(schema: &'a Schema, scoped: &ScopedField<'a>, children: &mut Vec<ScopePart<'a>>) {
    if scoped.field.selection_set.items.is_empty() {
        return;
    }
    if let Some(FieldRef::Declared(def)) = schema.field(scoped.parent, &scoped.field.name) {
        children.push((def.ty.named(), &scoped.field.selection_set, scoped.via));
    }
}

fn variable_definitions<'d>(
    definition: &'d Definition<'static, String>,
) -> Option<&'d [VariableDefinition<'static, String>]> {
    match definition {
        Definition::Operation(OperationDefinition::Query(query)) => Some(&query.variable_definitions),
        Definition::Operation(OperationDefinition::Mutation(mutation)) => {
            Some(&mutation.variable_definitions)
        }
        Definition::Operation(OperationDefinition::Subscription(subscription)) => {
            Some(&subscription.variable_definitions)
        }
        _ => None,
    }
}

fn check_variables(
    schema: &Schema,
    fragments: &FragmentRegistry,
    document: &CollectedDocument,
    variables: &[VariableDefinition<'static, String>],
    errors: &mut Vec<CompileError>,
) {
    let mut declared = BTreeSet::new();
    for variable in variables {
        if !declared.insert(variable.name.as_str()) {
            errors.push(
                CompileError::validation(format!("variable ${} is declared twice", variable.name))
                    .in_document(&document.name)
                    .at(variable.position),
            );
        }
        let ty = TypeRef::from_ast(&variable.var_type);
        match schema.kind_of(ty.named()) {
            Some(kind) if kind.is_input() => {}
            Some(_) => errors.push(
                CompileError::validation(format!(
                    "variable ${} has type {ty}, which is not an input type",
                    variable.name
                ))
                .in_document(&document.name)
                .at(variable.position),
            ),
            None => errors.push(
                CompileError::validation(format!(
                    "variable ${} has unknown type \"{}\"",
                    variable.name,
                    ty.named()
                ))
                .in_document(&document.name)
                .at(variable.position),
            ),
        }
    }

    // operations answer for variables used by every fragment they reach
    if document.kind == DocumentKind::Fragment {
        return;
    }
    let Some(selections) = document.selection_set() else {
        return;
    };
    for used in fragments.variables_used(selections) {
        if !declared.contains(used.as_str()) {
            let mut error = CompileError::validation(format!("variable ${used} is not defined"))
                .in_document(&document.name);
            if let Some(location) = document.location() {
                error = error.at(location);
            }
            errors.push(error);
        }
    }
}

struct FieldChecker<'a> {
    schema: &'a Schema,
    fragments: &'a FragmentRegistry,
    document: &'a str,
    errors: Vec<CompileError>,
}

impl FieldChecker<'_> {
    fn error(&mut self, message: String, position: graphql_parser::Pos) {
        self.errors.push(
            CompileError::validation(message)
                .in_document(self.document)
                .at(position),
        );
    }

    fn check_type_condition(&mut self, parent: &str, condition: &str, position: graphql_parser::Pos) {
        match self.schema.kind_of(condition) {
            None => self.error(format!("unknown type \"{condition}\" in type condition"), position),
            Some(kind) if !kind.is_composite() => self.error(
                format!("type condition \"{condition}\" is not a composite type"),
                position,
            ),
            Some(_) if !self.schema.types_overlap(parent, condition) => self.error(
                format!("fragment on \"{condition}\" can never apply within \"{parent}\""),
                position,
            ),
            Some(_) => {}
        }
    }
}

impl<'a> Visitor<'a> for FieldChecker<'a> {
    fn field(&mut self, parent: &'a str, field: &'a FieldNode, def: Option<FieldRef<'a>>, _path: &[String]) {
        let Some(def) = def else {
            self.error(
                format!("unknown field \"{}\" on type \"{parent}\"", field.name),
                field.position,
            );
            return;
        };

        for (name, _) in &field.arguments {
            if def.argument(name).is_none() {
                self.error(
                    format!("unknown argument \"{name}\" on field \"{parent}.{}\"", field.name),
                    field.position,
                );
            }
        }
        if let Some(arguments) = def.arguments() {
            for argument in arguments.values().filter(|argument| argument.is_required()) {
                if !field.arguments.iter().any(|(name, _)| name == &argument.name) {
                    self.error(
                        format!(
                            "field \"{parent}.{}\" is missing required argument \"{}\"",
                            field.name, argument.name
                        ),
                        field.position,
                    );
                }
            }
        }

        let target = def.type_name();
        let composite = self.schema.kind_of(target).is_some_and(|kind| kind.is_composite());
        let selected = !field.selection_set.items.is_empty();
        if composite && !selected {
            self.error(
                format!("field \"{}\" of type \"{target}\" must have a selection of subfields", field.name),
                field.position,
            );
        } else if !composite && selected {
            self.error(
                format!("field \"{}\" of leaf type \"{target}\" cannot have a selection", field.name),
                field.position,
            );
        }
    }

    fn fragment_spread(&mut self, parent: &'a str, spread: &'a FragmentSpread<'static, String>) {
        match self.fragments.type_condition(&spread.fragment_name) {
            None => self.error(
                format!("unknown fragment \"{}\"", spread.fragment_name),
                spread.position,
            ),
            Some(condition) => {
                if !self.schema.types_overlap(parent, condition) {
                    self.error(
                        format!(
                            "fragment {} on \"{condition}\" can never apply within \"{parent}\"",
                            spread.fragment_name
                        ),
                        spread.position,
                    );
                }
            }
        }
    }

    fn inline_fragment(&mut self, parent: &'a str, fragment: &'a InlineFragment<'static, String>) {
        if let Some(condition) = &fragment.type_condition {
            self.check_type_condition(parent, type_condition_name(condition), fragment.position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{classify, parse_executable, Classification, DocumentSource};

    const SDL: &str = r#"
        interface Node { id: ID! }
        type User implements Node { id: ID! name: String! friends(first: Int): [User!]! }
        type Cat implements Node { id: ID! }
        type Query { user(id: ID!): User node(id: ID!): Node version: Int! }
    "#;

    fn document(text: &str) -> CollectedDocument {
        let parsed = parse_executable(text).expect("parse");
        let Classification::Valid { kind, name } = classify(&parsed) else {
            panic!("invalid document");
        };
        CollectedDocument::new(name, kind, DocumentSource::new(text), parsed)
    }

    fn errors_for(texts: &[&str]) -> Vec<String> {
        let schema = Schema::parse(SDL).expect("schema");
        let documents: Vec<_> = texts.iter().map(|text| document(text)).collect();
        let registry = FragmentRegistry::build(&documents);
        documents
            .iter()
            .flat_map(|doc| check_document(&schema, &registry, doc))
            .map(|error| error.message)
            .collect()
    }

    #[test]
    fn valid_document_has_no_errors() {
        let errors = errors_for(&["query Q($id: ID!) { user(id: $id) { id name friends(first: 2) { id } } }"]);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn unknown_field_and_argument_are_reported() {
        let errors = errors_for(&["query Q { user(id: \"1\", nope: 1) { nickname } }"]);
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("unknown argument \"nope\"")));
        assert!(errors.iter().any(|e| e.contains("unknown field \"nickname\" on type \"User\"")));
    }

    #[test]
    fn required_argument_and_selection_rules() {
        let errors = errors_for(&["query Q { user { id } version { id } }"]);
        assert!(errors.iter().any(|e| e.contains("missing required argument \"id\"")));
        assert!(errors.iter().any(|e| e.contains("leaf type \"Int\"")));
    }

    #[test]
    fn impossible_inline_fragment_is_reported() {
        let errors = errors_for(&["query Q { user(id: \"1\") { ... on Cat { id } } }"]);
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("can never apply"));
    }

    #[test]
    fn undefined_variable_through_fragment() {
        let errors = errors_for(&[
            "fragment UserFriends on User { friends(first: $count) { id } }",
            "query Q { user(id: \"1\") { ...UserFriends } }",
        ]);
        assert_eq!(errors, vec!["variable $count is not defined".to_string()]);
    }

    #[test]
    fn unknown_spread_and_cycles() {
        let errors = errors_for(&[
            "fragment A on User { ...B }",
            "fragment B on User { ...A }",
            "query Q { user(id: \"1\") { ...Missing } }",
        ]);
        assert!(errors.iter().any(|e| e.contains("unknown fragment \"Missing\"")));
        assert_eq!(errors.iter().filter(|e| e.contains("cycle")).count(), 2);
    }

    #[test]
    fn mutation_without_root_is_reported() {
        let errors = errors_for(&["mutation M { version }"]);
        assert_eq!(errors, vec!["schema has no mutation root type".to_string()]);
    }

    #[test]
    fn one_response_name_cannot_select_two_fields() {
        let errors = errors_for(&["query Q { user(id: \"1\") { a: name a: id } }"]);
        assert_eq!(errors, vec!["response name \"a\" selects both \"name\" and \"id\"".to_string()]);
    }

    #[test]
    fn repeated_field_needs_identical_arguments() {
        let errors = errors_for(&[
            "query Same { user(id: \"1\") { friends(first: 2) { id } friends(first: 2) { name } } }",
            "query Differ { user(id: \"1\") { friends(first: 1) { id } friends(first: 2) { id } } }",
        ]);
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("\"friends\" with different arguments"));
    }

    #[test]
    fn conflicts_are_found_through_spreads_and_nested_selections() {
        let errors = errors_for(&[
            "fragment Named on User { friends(first: 2) { label: name } }",
            "query Q { user(id: \"1\") { friends(first: 2) { label: id } ...Named } }",
        ]);
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("\"label\" selects both \"id\" and \"name\""));
    }

    #[test]
    fn distinct_object_types_may_reuse_a_response_name() {
        let errors = errors_for(&["query Q { node(id: \"1\") { ... on User { key: name } ... on Cat { key: id } } }"]);
        assert!(errors.is_empty(), "{errors:?}");
    }
}
