//! Adds identity key fields (and `__typename` where the concrete type is not
//! known statically) to every composite selection.
use super::visit::{ensure_field, response_name_taken, root_type, type_condition_name, Selections};
use super::{Pass, PassContext};
use crate::document::{definition_selection_set_mut, CollectedDocument};
use crate::errors::CompileError;
use crate::resolver::TypeResolver;
use crate::schema::{FieldRef, TYPENAME_FIELD};
use graphql_parser::query::Selection;
use graphql_parser::Pos;
use rayon::prelude::*;

pub struct IdentityKeys;

/// Why a key field could not be added.
enum KeyProblem {
    Undeclared { type_name: String, key: String },
    /// The key's response name is already used by another field.
    Taken {
        type_name: String,
        key: String,
        field: String,
        position: Pos,
    },
}

impl KeyProblem {
    fn into_error(self, document: &str) -> CompileError {
        match self {
            KeyProblem::Undeclared { type_name, key } => CompileError::validation(format!(
                "identity key \"{key}\" is not a field of \"{type_name}\""
            ))
            .in_document(document)
            .with_hint(format!("set types.{type_name}.keys to fields the type declares")),
            KeyProblem::Taken {
                type_name,
                key,
                field,
                position,
            } => CompileError::validation(format!(
                "response name \"{key}\" is reserved for the identity key of \"{type_name}\" but selects \"{field}\""
            ))
            .in_document(document)
            .at(position)
            .with_hint(format!("alias \"{field}\" to another name")),
        }
    }
}

impl Pass for IdentityKeys {
    fn name(&self) -> &str {
        "identity_keys"
    }

    fn run(&self, ctx: &PassContext<'_>, documents: &mut [CollectedDocument]) -> Vec<CompileError> {
        documents
            .par_iter_mut()
            .map(|document| complete_document(ctx.resolver, document))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    }
}

fn complete_document(resolver: &TypeResolver<'_>, document: &mut CollectedDocument) -> Vec<CompileError> {
    let Some(root) = root_type(resolver.schema(), document).map(str::to_string) else {
        return Vec::new();
    };
    let mut problems = Vec::new();
    document.rewrite(|working| {
        let mut changed = false;
        for definition in &mut working.definitions {
            let selections = definition_selection_set_mut(definition);
            changed |= complete(resolver, &root, selections, &mut problems, false);
        }
        changed
    });
    problems
        .into_iter()
        .map(|problem| problem.into_error(&document.name))
        .collect()
}

/// Add `name` unless another field already answers to it.
fn ensure_reserved(
    selections: &mut Selections,
    type_name: &str,
    name: &str,
    problems: &mut Vec<KeyProblem>,
) -> bool {
    if let Some(other) = response_name_taken(selections, name) {
        problems.push(KeyProblem::Taken {
            type_name: type_name.to_string(),
            key: name.to_string(),
            field: other.name.clone(),
            position: other.position,
        });
        return false;
    }
    ensure_field(selections, name).is_some_and(|(_, added)| added)
}

/// Complete one selection set typed `parent`. `keyed_by_parent` is set for
/// inline fragments whose enclosing selection already carries the keys.
fn complete(
    resolver: &TypeResolver<'_>,
    parent: &str,
    selections: &mut Selections,
    problems: &mut Vec<KeyProblem>,
    keyed_by_parent: bool,
) -> bool {
    let schema = resolver.schema();
    let mut changed = false;

    for selection in &mut selections.items {
        match selection {
            Selection::Field(field) => {
                if field.selection_set.items.is_empty() {
                    continue;
                }
                let Some(FieldRef::Declared(def)) = schema.field(parent, &field.name) else {
                    continue;
                };
                let target = def.ty.named();
                changed |= complete(resolver, target, &mut field.selection_set, problems, false);
            }
            Selection::InlineFragment(fragment) => {
                let condition = fragment
                    .type_condition
                    .as_ref()
                    .map(type_condition_name)
                    .unwrap_or(parent)
                    .to_string();
                let covered = condition == parent;
                changed |= complete(resolver, &condition, &mut fragment.selection_set, problems, covered);
            }
            Selection::FragmentSpread(_) => {}
        }
    }

    if keyed_by_parent {
        return changed;
    }
    let Some(kind) = schema.kind_of(parent) else {
        return changed;
    };
    if !kind.is_composite() || parent == schema.query_type() {
        return changed;
    }
    if kind.is_abstract() {
        changed |= ensure_reserved(selections, parent, TYPENAME_FIELD, problems);
    }
    for key in resolver.identity_key(parent) {
        match schema.field(parent, key) {
            Some(FieldRef::Declared(def)) if schema.kind_of(def.ty.named()).is_some_and(|k| k.is_leaf()) => {
                changed |= ensure_reserved(selections, parent, key, problems);
            }
            _ => problems.push(KeyProblem::Undeclared {
                type_name: parent.to_string(),
                key: key.clone(),
            }),
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::document::{classify, parse_executable, Classification, DocumentSource};
    use crate::schema::Schema;

    const SDL: &str = r#"
        interface Node { id: ID! }
        type User implements Node { name: String! friends: [User!]! }
        type Ghost { name: String! aka: String! believers: [User!]! }
        type Cat implements Node { id: ID! owner: User }
        union Entity = Ghost | Cat
        type Query { ghost: Ghost! entities: [Entity!]! cat: Cat }
    "#;

    fn document(text: &str) -> CollectedDocument {
        let parsed = parse_executable(text).expect("parse");
        let Classification::Valid { kind, name } = classify(&parsed) else {
            panic!("invalid document");
        };
        CollectedDocument::new(name, kind, DocumentSource::new(text), parsed)
    }

    fn config() -> Config {
        Config::builder(Schema::parse(SDL).expect("schema"))
            .keys("Ghost", ["name", "aka"])
            .build()
            .expect("config")
    }

    #[test]
    fn adds_composite_keys_in_order() {
        let config = config();
        let resolver = TypeResolver::new(&config);
        let mut doc = document("query Q { ghost { believers { name } } }");
        let errors = complete_document(&resolver, &mut doc);
        // User inherits an `id` key from Node but never declares the field
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("\"id\" is not a field of \"User\""));
        let printed = doc.document().to_string();
        assert!(printed.contains("name"));
        assert!(printed.contains("aka"));
        assert_eq!(doc.original_document().to_string().matches("aka").count(), 0);
    }

    #[test]
    fn abstract_selections_get_typename_and_fragment_keys() {
        let config = config();
        let resolver = TypeResolver::new(&config);
        let mut doc = document("query Q { entities { ... on Cat { owner { name } } } cat { owner { name } } }");
        let errors = complete_document(&resolver, &mut doc);
        assert!(errors.iter().all(|e| e.message.contains("\"User\"")));
        let printed = doc.document().to_string();
        assert!(printed.contains("__typename"));
        assert!(printed.matches("id").count() >= 2);
    }

    #[test]
    fn aliasing_another_field_onto_a_key_is_rejected() {
        let config = config();
        let resolver = TypeResolver::new(&config);
        let mut doc = document("query Q { ghost { aka name: aka } }");
        let errors = complete_document(&resolver, &mut doc);
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0]
            .message
            .contains("\"name\" is reserved for the identity key of \"Ghost\" but selects \"aka\""));
        assert!(errors[0].location.is_some());
        assert_eq!(doc.revision(), 0);
    }

    #[test]
    fn key_aliased_inside_an_inline_fragment_is_rejected() {
        let config = config();
        let resolver = TypeResolver::new(&config);
        let mut doc = document("query Q { cat { ... on Cat { id: owner { name } } } }");
        let errors = complete_document(&resolver, &mut doc);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("\"id\" is reserved for the identity key of \"Cat\"")));
        assert_eq!(doc.document().to_string().matches("id").count(), 1);
    }

    #[test]
    fn already_complete_document_is_untouched() {
        let config = config();
        let resolver = TypeResolver::new(&config);
        let mut doc = document("query Q { ghost { name aka } }");
        assert!(complete_document(&resolver, &mut doc).is_empty());
        assert_eq!(doc.revision(), 0);
    }
}
