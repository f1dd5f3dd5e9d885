//! Policy layer merging.
//!
//! Layers are applied in merge order onto an empty accumulator. The layer
//! applied first wins: later layers only add rule-sets, rules and inject
//! entries that are not present yet.

use serde_json::Value;

use crate::types::TypeRef;

use super::{
    AdditionalParameter, AdditionalTypeInstanceToInject, InjectData, MergeOrder, Policy, PolicyLayer,
    RequiredTypeInstanceToInject, Rule,
};

/// Merges all policy layers into one effective Policy.
///
/// Workflow step policies are applied in the order they were pushed.
#[must_use]
pub fn merge_policies(order: &MergeOrder, global: &Policy, action: &Policy, workflow_steps: &[Policy]) -> Policy {
    let mut merged = Policy::new(Vec::new());

    for layer in order.as_slice() {
        match layer {
            PolicyLayer::Global => apply_policy(&mut merged, global),
            PolicyLayer::Action => apply_policy(&mut merged, action),
            PolicyLayer::Workflow => {
                for step in workflow_steps {
                    apply_policy(&mut merged, step);
                }
            }
        }
    }

    merged
}

/// Applies a lower-priority policy onto `current`.
///
/// Rule-sets for unknown Interface keys and rules with unknown constraints
/// are appended. Rules with identical constraints get their inject data
/// merged, with entries already in `current` taking precedence.
pub fn apply_policy(current: &mut Policy, new: &Policy) {
    for new_rules in &new.rules {
        let Some(idx) = current
            .rules
            .iter()
            .position(|existing| existing.is_for_same_interface(new_rules))
        else {
            current.rules.push(new_rules.clone());
            continue;
        };

        let existing_rules = &mut current.rules[idx];
        for new_rule in &new_rules.one_of {
            let matching = existing_rules
                .one_of
                .iter_mut()
                .find(|r| r.implementation_constraints == new_rule.implementation_constraints);

            match matching {
                Some(rule) => merge_rule(rule, new_rule),
                None => existing_rules.one_of.push(new_rule.clone()),
            }
        }
    }
}

fn merge_rule(current: &mut Rule, new: &Rule) {
    let Some(new_inject) = &new.inject else {
        return;
    };

    let inject = current.inject.get_or_insert_with(InjectData::default);
    merge_parameters(&mut inject.additional_parameters, &new_inject.additional_parameters);
    merge_required_type_instances(&mut inject.required_type_instances, &new_inject.required_type_instances);
    merge_additional_type_instances(&mut inject.additional_type_instances, &new_inject.additional_type_instances);
}

fn merge_parameters(current: &mut Vec<AdditionalParameter>, new: &[AdditionalParameter]) {
    for param in new {
        match current.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => merge_values(&mut existing.value, &param.value),
            None => current.push(param.clone()),
        }
    }
}

/// Deep-merges JSON objects. Existing leaves are never overwritten.
fn merge_values(current: &mut Value, new: &Value) {
    let (Value::Object(current), Value::Object(new)) = (current, new) else {
        return;
    };

    for (key, value) in new {
        match current.get_mut(key) {
            Some(existing) => merge_values(existing, value),
            None => {
                current.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Merge key of a required TypeInstance. Entries without a Type are keyed by ID.
#[derive(PartialEq, Eq)]
enum RequiredKey<'a> {
    Type(&'a TypeRef),
    Id(&'a str),
}

fn required_key(ti: &RequiredTypeInstanceToInject) -> RequiredKey<'_> {
    match &ti.type_ref {
        Some(type_ref) => RequiredKey::Type(type_ref),
        None => RequiredKey::Id(&ti.id),
    }
}

fn merge_required_type_instances(current: &mut Vec<RequiredTypeInstanceToInject>, new: &[RequiredTypeInstanceToInject]) {
    for ti in new {
        let key = required_key(ti);
        if current.iter().any(|existing| required_key(existing) == key) {
            continue;
        }
        current.push(ti.clone());
    }
}

fn merge_additional_type_instances(
    current: &mut Vec<AdditionalTypeInstanceToInject>,
    new: &[AdditionalTypeInstanceToInject],
) {
    for ti in new {
        if current.iter().any(|existing| existing.name == ti.name) {
            continue;
        }
        current.push(ti.clone());
    }
}
