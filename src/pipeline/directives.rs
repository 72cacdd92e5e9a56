//! Directive catalog and well-formedness checks.
use super::visit::{walk, FieldNode, ValueNode, Visitor};
use super::{Pass, PassContext};
use crate::config::CachePolicy;
use crate::document::{CollectedDocument, DocumentKind};
use crate::errors::{CompileError, SourceLocation};
use crate::schema::{FieldRef, Schema, TypeKind};
use graphql_parser::query::{
    Definition, Directive, FragmentSpread, InlineFragment, OperationDefinition, Value,
};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub const INCLUDE_DIRECTIVE: &str = "include";
pub const SKIP_DIRECTIVE: &str = "skip";
pub const PAGINATE_DIRECTIVE: &str = "paginate";
pub const CACHE_DIRECTIVE: &str = "cache";
pub const LIST_DIRECTIVE: &str = "list";
pub const MASK_ENABLE_DIRECTIVE: &str = "mask_enable";
pub const MASK_DISABLE_DIRECTIVE: &str = "mask_disable";
/// Marker left on inline fragments produced by fragment inlining.
pub const INLINED_FRAGMENT_DIRECTIVE: &str = "__fragment";

/// Directives that only steer compilation and never reach the server.
pub const INTERNAL_DIRECTIVES: [&str; 6] = [
    PAGINATE_DIRECTIVE,
    CACHE_DIRECTIVE,
    LIST_DIRECTIVE,
    MASK_ENABLE_DIRECTIVE,
    MASK_DISABLE_DIRECTIVE,
    INLINED_FRAGMENT_DIRECTIVE,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveLocation {
    Query,
    Mutation,
    Subscription,
    FragmentDefinition,
    Field,
    FragmentSpread,
    InlineFragment,
}

impl DirectiveLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectiveLocation::Query => "QUERY",
            DirectiveLocation::Mutation => "MUTATION",
            DirectiveLocation::Subscription => "SUBSCRIPTION",
            DirectiveLocation::FragmentDefinition => "FRAGMENT_DEFINITION",
            DirectiveLocation::Field => "FIELD",
            DirectiveLocation::FragmentSpread => "FRAGMENT_SPREAD",
            DirectiveLocation::InlineFragment => "INLINE_FRAGMENT",
        }
    }
}

impl fmt::Display for DirectiveLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgumentKind {
    Boolean,
    String,
    CachePolicy,
}

#[derive(Debug)]
struct ArgumentSpec {
    name: &'static str,
    kind: ArgumentKind,
    required: bool,
}

#[derive(Debug)]
struct DirectiveSpec {
    name: &'static str,
    locations: &'static [DirectiveLocation],
    arguments: &'static [ArgumentSpec],
}

const CONDITION_LOCATIONS: &[DirectiveLocation] = &[
    DirectiveLocation::Field,
    DirectiveLocation::FragmentSpread,
    DirectiveLocation::InlineFragment,
];

const CONDITION_ARGUMENTS: &[ArgumentSpec] = &[ArgumentSpec {
    name: "if",
    kind: ArgumentKind::Boolean,
    required: true,
}];

const CATALOG: &[DirectiveSpec] = &[
    DirectiveSpec {
        name: INCLUDE_DIRECTIVE,
        locations: CONDITION_LOCATIONS,
        arguments: CONDITION_ARGUMENTS,
    },
    DirectiveSpec {
        name: SKIP_DIRECTIVE,
        locations: CONDITION_LOCATIONS,
        arguments: CONDITION_ARGUMENTS,
    },
    DirectiveSpec {
        name: PAGINATE_DIRECTIVE,
        locations: &[DirectiveLocation::Field],
        arguments: &[ArgumentSpec {
            name: "name",
            kind: ArgumentKind::String,
            required: false,
        }],
    },
    DirectiveSpec {
        name: CACHE_DIRECTIVE,
        locations: &[DirectiveLocation::Query],
        arguments: &[
            ArgumentSpec {
                name: "policy",
                kind: ArgumentKind::CachePolicy,
                required: false,
            },
            ArgumentSpec {
                name: "partial",
                kind: ArgumentKind::Boolean,
                required: false,
            },
        ],
    },
    DirectiveSpec {
        name: LIST_DIRECTIVE,
        locations: &[DirectiveLocation::Field],
        arguments: &[ArgumentSpec {
            name: "name",
            kind: ArgumentKind::String,
            required: true,
        }],
    },
    DirectiveSpec {
        name: MASK_ENABLE_DIRECTIVE,
        locations: &[DirectiveLocation::FragmentSpread],
        arguments: &[],
    },
    DirectiveSpec {
        name: MASK_DISABLE_DIRECTIVE,
        locations: &[DirectiveLocation::FragmentSpread],
        arguments: &[],
    },
];

fn lookup(name: &str) -> Option<&'static DirectiveSpec> {
    CATALOG.iter().find(|spec| spec.name == name)
}

/// Rejects unknown, misplaced, repeated and malformed directives, and list
/// names used by more than one field in the run.
pub struct DirectiveValidation;

impl Pass for DirectiveValidation {
    fn name(&self) -> &str {
        "directive_validation"
    }

    fn run(&self, ctx: &PassContext<'_>, documents: &mut [CollectedDocument]) -> Vec<CompileError> {
        let schema = ctx.resolver.schema();
        let per_document: Vec<(Vec<CompileError>, Vec<(String, SourceLocation)>)> = documents
            .par_iter()
            .map(|document| check_document(schema, document))
            .collect();

        let mut errors = Vec::new();
        let mut lists: BTreeMap<String, String> = BTreeMap::new();
        for (document, (found, names)) in documents.iter().zip(per_document) {
            errors.extend(found);
            for (list, location) in names {
                match lists.get(&list) {
                    Some(first) => errors.push(
                        CompileError::validation(format!(
                            "list name \"{list}\" is already used by document {first}"
                        ))
                        .in_document(&document.name)
                        .at(location)
                        .with_hint("@list names must be unique across the project"),
                    ),
                    None => {
                        lists.insert(list, document.name.clone());
                    }
                }
            }
        }
        errors
    }
}

struct DirectiveChecker<'a> {
    schema: &'a Schema,
    document: &'a str,
    errors: Vec<CompileError>,
    lists: Vec<(String, SourceLocation)>,
}

fn check_document(
    schema: &Schema,
    document: &CollectedDocument,
) -> (Vec<CompileError>, Vec<(String, SourceLocation)>) {
    let mut checker = DirectiveChecker {
        schema,
        document: &document.name,
        errors: Vec::new(),
        lists: Vec::new(),
    };
    let Some(definition) = document.definition() else {
        return (checker.errors, checker.lists);
    };
    let (location, directives) = match definition {
        Definition::Fragment(fragment) => (DirectiveLocation::FragmentDefinition, &fragment.directives),
        Definition::Operation(OperationDefinition::Query(query)) => (DirectiveLocation::Query, &query.directives),
        Definition::Operation(OperationDefinition::Mutation(mutation)) => {
            (DirectiveLocation::Mutation, &mutation.directives)
        }
        Definition::Operation(OperationDefinition::Subscription(subscription)) => {
            (DirectiveLocation::Subscription, &subscription.directives)
        }
        Definition::Operation(OperationDefinition::SelectionSet(_)) => {
            return (checker.errors, checker.lists);
        }
    };
    checker.check(directives, location);

    if let (Some(root), Some(selections)) = (
        super::visit::root_type(schema, document),
        document.selection_set(),
    ) {
        walk(schema, root, selections, &mut checker);
    }
    (checker.errors, checker.lists)
}

impl DirectiveChecker<'_> {
    fn error(&mut self, message: String, position: graphql_parser::Pos) {
        self.errors.push(
            CompileError::validation(message)
                .in_document(self.document)
                .at(position),
        );
    }

    fn check(&mut self, directives: &[Directive<'static, String>], location: DirectiveLocation) {
        let mut seen = BTreeSet::new();
        for directive in directives {
            if !seen.insert(directive.name.as_str()) {
                self.error(
                    format!("directive @{} is repeated", directive.name),
                    directive.position,
                );
            }
            let Some(spec) = lookup(&directive.name) else {
                if !self.schema.declares_directive(&directive.name) {
                    self.error(format!("unknown directive @{}", directive.name), directive.position);
                }
                continue;
            };
            if !spec.locations.contains(&location) {
                self.error(
                    format!("directive @{} cannot be used on {location}", directive.name),
                    directive.position,
                );
                continue;
            }
            self.check_arguments(directive, spec);
        }
        if seen.contains(MASK_ENABLE_DIRECTIVE) && seen.contains(MASK_DISABLE_DIRECTIVE) {
            if let Some(directive) = directives.first() {
                self.error(
                    "@mask_enable and @mask_disable cannot be combined".to_string(),
                    directive.position,
                );
            }
        }
    }

    fn check_arguments(&mut self, directive: &Directive<'static, String>, spec: &DirectiveSpec) {
        for (name, value) in &directive.arguments {
            let Some(argument) = spec.arguments.iter().find(|argument| argument.name == name.as_str()) else {
                self.error(
                    format!("directive @{} has no argument \"{name}\"", directive.name),
                    directive.position,
                );
                continue;
            };
            if let Err(reason) = check_value(argument.kind, value) {
                self.error(
                    format!("@{}({name}:) {reason}", directive.name),
                    directive.position,
                );
            }
        }
        for argument in spec.arguments.iter().filter(|argument| argument.required) {
            if !directive.arguments.iter().any(|(name, _)| name.as_str() == argument.name) {
                self.error(
                    format!(
                        "directive @{} is missing required argument \"{}\"",
                        directive.name, argument.name
                    ),
                    directive.position,
                );
            }
        }
    }

    fn check_list_target(&mut self, field: &FieldNode, def: Option<FieldRef<'_>>) {
        let Some(directive) = field.directives.iter().find(|d| d.name == LIST_DIRECTIVE) else {
            return;
        };
        if let Some(Value::String(name)) = super::visit::argument(&directive.arguments, "name") {
            self.lists.push((name.clone(), directive.position.into()));
        }
        let Some(FieldRef::Declared(def)) = def else {
            return;
        };
        let connection = self
            .schema
            .get(def.ty.named())
            .is_some_and(|target| target.kind == TypeKind::Object && target.field("edges").is_some());
        if !def.ty.is_list() && !connection {
            self.error(
                format!("@list can only be applied to lists or connections, \"{}\" is neither", field.name),
                directive.position,
            );
        }
    }
}

impl<'a> Visitor<'a> for DirectiveChecker<'a> {
    fn field(&mut self, _parent: &'a str, field: &'a FieldNode, def: Option<FieldRef<'a>>, _path: &[String]) {
        self.check(&field.directives, DirectiveLocation::Field);
        self.check_list_target(field, def);
    }

    fn fragment_spread(&mut self, _parent: &'a str, spread: &'a FragmentSpread<'static, String>) {
        self.check(&spread.directives, DirectiveLocation::FragmentSpread);
    }

    fn inline_fragment(&mut self, _parent: &'a str, fragment: &'a InlineFragment<'static, String>) {
        self.check(&fragment.directives, DirectiveLocation::InlineFragment);
    }
}

fn check_value(kind: ArgumentKind, value: &ValueNode) -> Result<(), String> {
    match (kind, value) {
        (_, Value::Variable(_)) if kind == ArgumentKind::Boolean => Ok(()),
        (_, Value::Variable(_)) => Err("must be a literal".to_string()),
        (ArgumentKind::Boolean, Value::Boolean(_)) => Ok(()),
        (ArgumentKind::Boolean, _) => Err("expects a Boolean".to_string()),
        (ArgumentKind::String, Value::String(_)) => Ok(()),
        (ArgumentKind::String, _) => Err("expects a String".to_string()),
        (ArgumentKind::CachePolicy, Value::Enum(policy)) if CachePolicy::parse(policy).is_some() => Ok(()),
        (ArgumentKind::CachePolicy, _) => Err(format!(
            "expects one of {}",
            CachePolicy::ALL.map(|policy| policy.as_str()).join(", ")
        )),
    }
}

/// Per-document cache override from `@cache(policy:, partial:)` on a query.
pub(crate) fn cache_override(document: &CollectedDocument) -> (Option<CachePolicy>, Option<bool>) {
    if document.kind != DocumentKind::Query {
        return (None, None);
    }
    let Some(Definition::Operation(OperationDefinition::Query(query))) = document.definition() else {
        return (None, None);
    };
    let Some(directive) = query.directives.iter().find(|d| d.name == CACHE_DIRECTIVE) else {
        return (None, None);
    };
    let policy = match super::visit::argument(&directive.arguments, "policy") {
        Some(Value::Enum(policy)) => CachePolicy::parse(policy),
        _ => None,
    };
    let partial = match super::visit::argument(&directive.arguments, "partial") {
        Some(Value::Boolean(partial)) => Some(*partial),
        _ => None,
    };
    (policy, partial)
}
