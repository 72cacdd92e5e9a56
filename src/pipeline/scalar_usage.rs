//! Custom scalars reached by a document must have a registered conversion.
use super::visit::{root_type, walk, FieldNode, Visitor};
use super::{Pass, PassContext};
use crate::document::CollectedDocument;
use crate::errors::CompileError;
use crate::resolver::TypeResolver;
use crate::schema::{FieldRef, TypeKind, TypeRef};
use graphql_parser::query::{Definition, OperationDefinition, VariableDefinition};
use graphql_parser::Pos;
use rayon::prelude::*;
use std::collections::BTreeSet;

pub struct ScalarUsage;

impl Pass for ScalarUsage {
    fn name(&self) -> &str {
        "scalar_usage"
    }

    fn run(&self, ctx: &PassContext<'_>, documents: &mut [CollectedDocument]) -> Vec<CompileError> {
        documents
            .par_iter()
            .map(|document| check_document(ctx.resolver, document))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    }
}

struct ScalarChecker<'r, 'c> {
    resolver: &'r TypeResolver<'c>,
    document: &'r str,
    reported: BTreeSet<String>,
    errors: Vec<CompileError>,
}

fn check_document(resolver: &TypeResolver<'_>, document: &CollectedDocument) -> Vec<CompileError> {
    let schema = resolver.schema();
    let mut checker = ScalarChecker {
        resolver,
        document: &document.name,
        reported: BTreeSet::new(),
        errors: Vec::new(),
    };

    let variables: &[VariableDefinition<'static, String>] = match document.definition() {
        Some(Definition::Operation(OperationDefinition::Query(query))) => query.variable_definitions.as_slice(),
        Some(Definition::Operation(OperationDefinition::Mutation(mutation))) => {
            mutation.variable_definitions.as_slice()
        }
        Some(Definition::Operation(OperationDefinition::Subscription(subscription))) => {
            subscription.variable_definitions.as_slice()
        }
        _ => &[],
    };
    for variable in variables {
        let ty = TypeRef::from_ast(&variable.var_type);
        let mut visited = BTreeSet::new();
        checker.check_input(ty.named(), variable.position, &mut visited);
    }

    if let (Some(root), Some(selections)) = (root_type(schema, document), document.selection_set()) {
        walk(schema, root, selections, &mut checker);
    }
    checker.errors
}

impl ScalarChecker<'_, '_> {
    fn check_scalar(&mut self, scalar: &str, position: Pos) {
        if self.resolver.schema().kind_of(scalar) != Some(TypeKind::Scalar) {
            return;
        }
        if let Err(err) = self.resolver.scalar_spec(scalar) {
            if self.reported.insert(scalar.to_string()) {
                self.errors.push(
                    CompileError::validation(err.to_string())
                        .in_document(self.document)
                        .at(position)
                        .with_hint(format!("register \"{scalar}\" under scalars in the config")),
                );
            }
        }
    }

    /// Scalars reachable through input objects, guarding recursive inputs.
    fn check_input(&mut self, type_name: &str, position: Pos, visited: &mut BTreeSet<String>) {
        let schema = self.resolver.schema();
        let Some(def) = schema.get(type_name) else {
            return;
        };
        match def.kind {
            TypeKind::Scalar => self.check_scalar(type_name, position),
            TypeKind::InputObject => {
                if !visited.insert(type_name.to_string()) {
                    return;
                }
                for field in def.input_fields.values() {
                    self.check_input(field.ty.named(), position, visited);
                }
            }
            _ => {}
        }
    }
}

impl<'a> Visitor<'a> for ScalarChecker<'_, '_> {
    fn field(&mut self, _parent: &'a str, field: &'a FieldNode, def: Option<FieldRef<'a>>, _path: &[String]) {
        if let Some(def) = def {
            self.check_scalar(def.type_name(), field.position);
        }
    }
}
