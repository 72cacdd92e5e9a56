//! Schema-aware walks over selection sets.
use crate::document::{CollectedDocument, DocumentKind};
use crate::schema::{FieldRef, Schema};
use graphql_parser::query::{
    Definition, Field, FragmentSpread, InlineFragment, Selection, SelectionSet, TypeCondition, Value,
};
use graphql_parser::Pos;
use std::collections::BTreeSet;

pub(crate) type FieldNode = Field<'static, String>;
pub(crate) type Selections = SelectionSet<'static, String>;
pub(crate) type ValueNode = Value<'static, String>;

/// Callbacks for [`walk`]. `path` holds the response names leading to the node.
pub(crate) trait Visitor<'a> {
    fn field(&mut self, _parent: &'a str, _field: &'a FieldNode, _def: Option<FieldRef<'a>>, _path: &[String]) {}

    fn fragment_spread(&mut self, _parent: &'a str, _spread: &'a FragmentSpread<'static, String>) {}

    fn inline_fragment(&mut self, _parent: &'a str, _fragment: &'a InlineFragment<'static, String>) {}
}

/// Type a document's top-level selection set is evaluated against.
pub(crate) fn root_type<'a>(schema: &'a Schema, document: &'a CollectedDocument) -> Option<&'a str> {
    match document.kind {
        DocumentKind::Query => Some(schema.query_type()),
        DocumentKind::Mutation => schema.mutation_type(),
        DocumentKind::Subscription => schema.subscription_type(),
        DocumentKind::Fragment => match document.definition()? {
            Definition::Fragment(fragment) => Some(type_condition_name(&fragment.type_condition)),
            Definition::Operation(_) => None,
        },
    }
}

pub(crate) fn type_condition_name<'a>(condition: &'a TypeCondition<'static, String>) -> &'a str {
    match condition {
        TypeCondition::On(name) => name,
    }
}

/// Walk a selection set in lock-step with the schema.
///
/// Unknown fields and unknown type conditions are reported to the visitor but
/// never descended into.
pub(crate) fn walk<'a, V: Visitor<'a>>(
    schema: &'a Schema,
    parent: &'a str,
    selections: &'a Selections,
    visitor: &mut V,
) {
    let mut path = Vec::new();
    walk_inner(schema, parent, selections, visitor, &mut path);
}

fn walk_inner<'a, V: Visitor<'a>>(
    schema: &'a Schema,
    parent: &'a str,
    selections: &'a Selections,
    visitor: &mut V,
    path: &mut Vec<String>,
) {
    for selection in &selections.items {
        match selection {
            Selection::Field(field) => {
                let def = schema.field(parent, &field.name);
                path.push(response_name(field).to_string());
                visitor.field(parent, field, def, path);
                if let Some(FieldRef::Declared(declared)) = def {
                    if !field.selection_set.items.is_empty() {
                        walk_inner(schema, declared.ty.named(), &field.selection_set, visitor, path);
                    }
                }
                path.pop();
            }
            Selection::FragmentSpread(spread) => visitor.fragment_spread(parent, spread),
            Selection::InlineFragment(fragment) => {
                visitor.inline_fragment(parent, fragment);
                let condition = match &fragment.type_condition {
                    Some(condition) => type_condition_name(condition),
                    None => parent,
                };
                if schema.get(condition).is_some() {
                    walk_inner(schema, condition, &fragment.selection_set, visitor, path);
                }
            }
        }
    }
}

pub(crate) fn response_name<'f>(field: &'f FieldNode) -> &'f str {
    field.alias.as_deref().unwrap_or(&field.name)
}

/// Every field in a selection tree, in document order, ignoring types.
pub(crate) fn for_each_field_mut<F>(selections: &mut Selections, visit: &mut F)
where
    F: FnMut(&mut FieldNode),
{
    for selection in &mut selections.items {
        match selection {
            Selection::Field(field) => {
                visit(field);
                for_each_field_mut(&mut field.selection_set, visit);
            }
            Selection::InlineFragment(fragment) => for_each_field_mut(&mut fragment.selection_set, visit),
            Selection::FragmentSpread(_) => {}
        }
    }
}

/// Variables referenced anywhere inside a value.
pub(crate) fn collect_variables(value: &ValueNode, out: &mut BTreeSet<String>) {
    match value {
        Value::Variable(name) => {
            out.insert(name.clone());
        }
        Value::List(items) => items.iter().for_each(|item| collect_variables(item, out)),
        Value::Object(fields) => fields.values().for_each(|item| collect_variables(item, out)),
        _ => {}
    }
}

/// Variables referenced by a selection tree's arguments and directives.
pub(crate) fn selection_variables(selections: &Selections, out: &mut BTreeSet<String>) {
    for selection in &selections.items {
        match selection {
            Selection::Field(field) => {
                for (_, value) in &field.arguments {
                    collect_variables(value, out);
                }
                for directive in &field.directives {
                    directive.arguments.iter().for_each(|(_, value)| collect_variables(value, out));
                }
                selection_variables(&field.selection_set, out);
            }
            Selection::FragmentSpread(spread) => {
                for directive in &spread.directives {
                    directive.arguments.iter().for_each(|(_, value)| collect_variables(value, out));
                }
            }
            Selection::InlineFragment(fragment) => {
                for directive in &fragment.directives {
                    directive.arguments.iter().for_each(|(_, value)| collect_variables(value, out));
                }
                selection_variables(&fragment.selection_set, out);
            }
        }
    }
}

/// Names of fragments spread directly inside a selection tree.
pub(crate) fn spread_names(selections: &Selections, out: &mut BTreeSet<String>) {
    for selection in &selections.items {
        match selection {
            Selection::Field(field) => spread_names(&field.selection_set, out),
            Selection::FragmentSpread(spread) => {
                out.insert(spread.fragment_name.clone());
            }
            Selection::InlineFragment(fragment) => spread_names(&fragment.selection_set, out),
        }
    }
}

pub(crate) fn argument<'v>(arguments: &'v [(String, ValueNode)], name: &str) -> Option<&'v ValueNode> {
    arguments
        .iter()
        .find(|(argument, _)| argument == name)
        .map(|(_, value)| value)
}

/// An unaliased field with no arguments, placed at `position`.
pub(crate) fn new_field(name: &str, position: Pos) -> FieldNode {
    Field {
        position,
        alias: None,
        name: name.to_string(),
        arguments: Vec::new(),
        directives: Vec::new(),
        selection_set: SelectionSet {
            span: (position, position),
            items: Vec::new(),
        },
    }
}

fn selects(selection: &Selection<'static, String>, name: &str) -> bool {
    matches!(selection, Selection::Field(field) if field.name == name && response_name(field) == name)
}

/// A selection that already answers to `name` while backed by another field.
/// Inline fragments share their parent's response names.
pub(crate) fn response_name_taken<'s>(selections: &'s Selections, name: &str) -> Option<&'s FieldNode> {
    selections.items.iter().find_map(|selection| match selection {
        Selection::Field(field) if field.name != name && response_name(field) == name => Some(field),
        Selection::InlineFragment(fragment) => response_name_taken(&fragment.selection_set, name),
        _ => None,
    })
}

/// The direct selection of `name`, appended when missing. The flag reports
/// whether it was added.
pub(crate) fn ensure_field<'s>(selections: &'s mut Selections, name: &str) -> Option<(&'s mut FieldNode, bool)> {
    let existing = selections.items.iter().position(|selection| selects(selection, name));
    let (index, added) = match existing {
        Some(index) => (index, false),
        None => {
            let position = selections.span.0;
            selections.items.push(Selection::Field(new_field(name, position)));
            (selections.items.len() - 1, true)
        }
    };
    match selections.items.get_mut(index) {
        Some(Selection::Field(field)) => Some((field, added)),
        _ => None,
    }
}
