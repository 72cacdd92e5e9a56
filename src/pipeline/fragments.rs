//! Fragment registry snapshot and the inlining pass.
use super::directives::{INLINED_FRAGMENT_DIRECTIVE, MASK_DISABLE_DIRECTIVE, MASK_ENABLE_DIRECTIVE};
use super::visit::{selection_variables, spread_names, type_condition_name, Selections};
use super::{Pass, PassContext};
use crate::config::FragmentMasking;
use crate::document::{definition_selection_set_mut, CollectedDocument};
use crate::errors::CompileError;
use graphql_parser::query::{
    Definition, Directive, FragmentDefinition, InlineFragment, Selection, TypeCondition, Value,
};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

type Fragment = FragmentDefinition<'static, String>;

/// Immutable view of every fragment in the run, keyed by name.
///
/// Built from the working copies before each pass; the first registration of
/// a name wins.
#[derive(Debug, Default, Clone)]
pub struct FragmentRegistry {
    fragments: BTreeMap<String, Fragment>,
}

impl FragmentRegistry {
    pub fn build(documents: &[CollectedDocument]) -> Self {
        let mut fragments = BTreeMap::new();
        for document in documents {
            if let Some(Definition::Fragment(fragment)) = document.definition() {
                fragments
                    .entry(fragment.name.clone())
                    .or_insert_with(|| fragment.clone());
            }
        }
        Self { fragments }
    }

    pub fn get(&self, name: &str) -> Option<&Fragment> {
        self.fragments.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fragments.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn type_condition(&self, name: &str) -> Option<&str> {
        self.get(name)
            .map(|fragment| type_condition_name(&fragment.type_condition))
    }

    /// Fragments spread directly by `name`.
    pub fn spreads_of(&self, name: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if let Some(fragment) = self.get(name) {
            spread_names(&fragment.selection_set, &mut out);
        }
        out
    }

    /// Fragments reachable from a selection tree through any chain of spreads.
    pub fn reachable_from(&self, selections: &Selections) -> BTreeSet<String> {
        let mut pending = BTreeSet::new();
        spread_names(selections, &mut pending);
        let mut seen = BTreeSet::new();
        while let Some(name) = pending.pop_first() {
            if !seen.insert(name.clone()) {
                continue;
            }
            pending.extend(
                self.spreads_of(&name)
                    .into_iter()
                    .filter(|next| !seen.contains(next)),
            );
        }
        seen
    }

    /// Whether `name` can reach itself through spreads.
    pub fn is_cyclic(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|fragment| self.reachable_from(&fragment.selection_set).contains(name))
    }

    /// Variables used by a selection tree, including every fragment it reaches.
    pub fn variables_used(&self, selections: &Selections) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        selection_variables(selections, &mut out);
        for name in self.reachable_from(selections) {
            if let Some(fragment) = self.get(&name) {
                selection_variables(&fragment.selection_set, &mut out);
            }
        }
        out
    }
}

/// Replaces every fragment spread with an inline fragment carrying the
/// fragment's selections and an `@__fragment(name, masked)` marker.
pub struct FragmentInlining;

impl Pass for FragmentInlining {
    fn name(&self) -> &str {
        "fragment_inlining"
    }

    fn run(&self, ctx: &PassContext<'_>, documents: &mut [CollectedDocument]) -> Vec<CompileError> {
        let masking = ctx.config.default_fragment_masking;
        let registry = ctx.fragments;
        documents.par_iter_mut().for_each(|document| {
            document.rewrite(|working| {
                let Some(definition) = working.definitions.first_mut() else {
                    return false;
                };
                let mut stack = Vec::new();
                if let Definition::Fragment(fragment) = &*definition {
                    stack.push(fragment.name.clone());
                }
                inline_spreads(definition_selection_set_mut(definition), registry, masking, &mut stack)
            });
        });
        // unknown spreads and cycles stay in place; conformance already reported them
        Vec::new()
    }
}

fn inline_spreads(
    selections: &mut Selections,
    registry: &FragmentRegistry,
    masking: FragmentMasking,
    stack: &mut Vec<String>,
) -> bool {
    let mut changed = false;
    for selection in &mut selections.items {
        match selection {
            Selection::Field(field) => {
                changed |= inline_spreads(&mut field.selection_set, registry, masking, stack);
            }
            Selection::InlineFragment(fragment) => {
                changed |= inline_spreads(&mut fragment.selection_set, registry, masking, stack);
            }
            Selection::FragmentSpread(spread) => {
                let name = spread.fragment_name.clone();
                let position = spread.position;
                let Some(fragment) = registry.get(&name) else {
                    continue;
                };
                if stack.contains(&name) {
                    continue;
                }
                let masked = spread_is_masked(&spread.directives, masking);
                let mut directives: Vec<_> = spread
                    .directives
                    .iter()
                    .filter(|directive| {
                        directive.name != MASK_ENABLE_DIRECTIVE && directive.name != MASK_DISABLE_DIRECTIVE
                    })
                    .cloned()
                    .collect();
                directives.push(Directive {
                    position,
                    name: INLINED_FRAGMENT_DIRECTIVE.to_string(),
                    arguments: vec![
                        ("name".to_string(), Value::String(name.clone())),
                        ("masked".to_string(), Value::Boolean(masked)),
                    ],
                });

                let mut body = fragment.selection_set.clone();
                stack.push(name);
                inline_spreads(&mut body, registry, masking, stack);
                stack.pop();

                *selection = Selection::InlineFragment(InlineFragment {
                    position,
                    type_condition: Some(TypeCondition::On(
                        type_condition_name(&fragment.type_condition).to_string(),
                    )),
                    directives,
                    selection_set: body,
                });
                changed = true;
            }
        }
    }
    changed
}

fn spread_is_masked(directives: &[Directive<'static, String>], default: FragmentMasking) -> bool {
    let has = |name: &str| directives.iter().any(|directive| directive.name == name);
    match default {
        FragmentMasking::Enable => !has(MASK_DISABLE_DIRECTIVE),
        FragmentMasking::Disable => has(MASK_ENABLE_DIRECTIVE),
    }
}

/// Read the `@__fragment` marker left on an inlined spread.
pub(crate) fn inlined_fragment(fragment: &InlineFragment<'static, String>) -> Option<(String, bool)> {
    let marker = fragment
        .directives
        .iter()
        .find(|directive| directive.name == INLINED_FRAGMENT_DIRECTIVE)?;
    let mut name = None;
    let mut masked = false;
    for (argument, value) in &marker.arguments {
        match (argument.as_str(), value) {
            ("name", Value::String(value)) => name = Some(value.clone()),
            ("masked", Value::Boolean(value)) => masked = *value,
            _ => {}
        }
    }
    name.map(|name| (name, masked))
}
