//! TypeInstance metadata for injection directives.
//!
//! Policies may reference TypeInstances by ID only. Before a rule can be
//! matched against Implementation requirements, every referenced TypeInstance
//! needs a complete TypeRef. Missing ones are looked up in the Hub and written
//! back into the Policy.

use std::collections::{HashMap, HashSet};

use crate::error::{Issue, IssueList, PolicyError, PolicyResult, TypeInstanceKind, ValidationError};
use crate::hub::HubClient;
use crate::policy::{Policy, Rule};
use crate::types::TypeRef;

/// A TypeInstance to inject whose TypeRef is unknown or incomplete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedTypeInstance {
    /// TypeInstance ID.
    pub id: String,
    /// Additional input name, for additional TypeInstances.
    pub name: Option<String>,
    /// Description, for required TypeInstances.
    pub description: Option<String>,
    /// Kind of the injection entry.
    pub kind: TypeInstanceKind,
}

impl UnresolvedTypeInstance {
    fn to_issue(&self) -> Issue {
        let detail = match (&self.name, &self.description) {
            (Some(name), _) => format!(" (name: {name:?})"),
            (None, Some(desc)) => format!(" (description: {desc:?})"),
            (None, None) => String::new(),
        };
        Issue::new(self.id.clone(), format!("missing Type reference for {}{detail}", self.kind))
    }
}

/// Returns true if `type_ref` is present with a non-empty path and revision.
#[must_use]
pub fn is_type_ref_resolved(type_ref: Option<&TypeRef>) -> bool {
    type_ref.is_some_and(|t| !t.path.is_empty() && !t.revision.is_empty())
}

/// Lists the injection entries of `rule` without a complete TypeRef.
#[must_use]
pub fn unresolved_type_instances_for_rule(rule: &Rule) -> Vec<UnresolvedTypeInstance> {
    let required = rule
        .required_type_instances()
        .iter()
        .filter(|ti| !is_type_ref_resolved(ti.type_ref.as_ref()))
        .map(|ti| UnresolvedTypeInstance {
            id: ti.id.clone(),
            name: None,
            description: ti.description.clone(),
            kind: TypeInstanceKind::Required,
        });

    let additional = rule
        .additional_type_instances()
        .iter()
        .filter(|ti| !is_type_ref_resolved(ti.type_ref.as_ref()))
        .map(|ti| UnresolvedTypeInstance {
            id: ti.id.clone(),
            name: Some(ti.name.clone()),
            description: None,
            kind: TypeInstanceKind::Additional,
        });

    required.chain(additional).collect()
}

/// Lists the injection entries of every rule without a complete TypeRef.
#[must_use]
pub fn unresolved_type_instances(policy: &Policy) -> Vec<UnresolvedTypeInstance> {
    policy.rules_iter().flat_map(unresolved_type_instances_for_rule).collect()
}

fn validate(unresolved: &[UnresolvedTypeInstance]) -> Result<(), ValidationError> {
    if unresolved.is_empty() {
        return Ok(());
    }
    Err(ValidationError::UnresolvedTypeInstanceMetadata {
        issues: unresolved.iter().map(UnresolvedTypeInstance::to_issue).collect::<IssueList>(),
    })
}

/// Fails if any injection entry of `rule` lacks a TypeRef.
///
/// # Errors
/// Returns `UnresolvedTypeInstanceMetadata` listing every incomplete entry.
pub fn validate_rule_metadata(rule: &Rule) -> Result<(), ValidationError> {
    validate(&unresolved_type_instances_for_rule(rule))
}

/// Fails if any injection entry of `policy` lacks a TypeRef.
///
/// # Errors
/// Returns `UnresolvedTypeInstanceMetadata` listing every incomplete entry.
pub fn validate_policy_metadata(policy: &Policy) -> Result<(), ValidationError> {
    validate(&unresolved_type_instances(policy))
}

/// Fills in missing TypeRefs from `type_refs` (TypeInstance ID to Type).
///
/// Entries that already carry a complete TypeRef are left untouched.
/// Returns the number of updated entries.
pub fn apply_resolved_type_refs(policy: &mut Policy, type_refs: &HashMap<String, TypeRef>) -> usize {
    let mut updated = 0;
    for rule in policy.rules_iter_mut() {
        let Some(inject) = rule.inject.as_mut() else {
            continue;
        };

        for ti in &mut inject.required_type_instances {
            if is_type_ref_resolved(ti.type_ref.as_ref()) {
                continue;
            }
            if let Some(type_ref) = type_refs.get(&ti.id) {
                ti.type_ref = Some(type_ref.clone());
                updated += 1;
            }
        }

        for ti in &mut inject.additional_type_instances {
            if is_type_ref_resolved(ti.type_ref.as_ref()) {
                continue;
            }
            if let Some(type_ref) = type_refs.get(&ti.id) {
                ti.type_ref = Some(type_ref.clone());
                updated += 1;
            }
        }
    }
    updated
}

/// Looks up the Types of the unresolved TypeInstances referenced by `policy`.
///
/// Returns an empty map without calling the Hub when nothing is unresolved.
///
/// # Errors
/// Returns `Hub` if the TypeInstance lookup fails.
pub fn find_unresolved_type_refs(hub: &dyn HubClient, policy: &Policy) -> PolicyResult<HashMap<String, TypeRef>> {
    let mut seen = HashSet::new();
    let ids: Vec<String> = unresolved_type_instances(policy)
        .into_iter()
        .map(|ti| ti.id)
        .filter(|id| seen.insert(id.clone()))
        .collect();

    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    tracing::debug!(count = ids.len(), "resolving TypeInstance metadata for policy");
    hub.find_type_instances_type_ref(&ids)
        .map_err(|e| PolicyError::hub("while finding TypeRef for TypeInstances", e))
}

/// Resolves missing TypeRefs in place and validates the result.
///
/// # Errors
/// - `Hub` if the lookup fails
/// - `UnresolvedTypeInstanceMetadata` listing every entry the Hub did not know
pub fn resolve_type_instance_metadata(hub: &dyn HubClient, policy: &mut Policy) -> PolicyResult<()> {
    let type_refs = find_unresolved_type_refs(hub, policy)?;
    apply_resolved_type_refs(policy, &type_refs);
    validate_policy_metadata(policy)?;
    Ok(())
}
