//! Injection resolution for a selected Implementation.
//!
//! Turns the `inject` block of the winning rule into concrete input for the
//! Action: TypeInstances bound by alias or by name, and YAML-encoded
//! parameters.

use std::collections::BTreeMap;

use crate::error::{Issue, IssueList, PolicyError, PolicyResult, TypeInstanceKind, ValidationError};
use crate::metadata::is_type_ref_resolved;
use crate::policy::{AdditionalTypeInstanceToInject, Rule};
use crate::types::{ImplementationRequirement, ImplementationRevision, TypeInstanceBinding, TypeRef};

/// Binds the rule's required TypeInstances to requirement aliases of `implementation`.
///
/// A TypeInstance is bound to the alias of the first requirement item (`oneOf`,
/// then `allOf`, then `anyOf`) with an equal TypeRef. TypeInstances the
/// Implementation does not ask for are skipped.
///
/// # Errors
/// - `MissingTypeRef` if an entry has no complete TypeRef
/// - `DuplicatedAlias` if two entries resolve to the same alias
pub fn resolve_required_type_instances(
    rule: &Rule,
    implementation: &ImplementationRevision,
) -> Result<Vec<TypeInstanceBinding>, ValidationError> {
    let mut out: Vec<TypeInstanceBinding> = Vec::new();

    for ti in rule.required_type_instances() {
        let type_ref = ti
            .type_ref
            .as_ref()
            .filter(|t| is_type_ref_resolved(Some(*t)))
            .ok_or_else(|| ValidationError::MissingTypeRef {
                kind: TypeInstanceKind::Required,
                id: ti.id.clone(),
            })?;

        let Some(alias) = find_alias(type_ref, implementation.requires()) else {
            tracing::trace!(id = %ti.id, type_ref = %type_ref, "Implementation does not require TypeInstance");
            continue;
        };

        if out.iter().any(|binding| binding.name == alias) {
            return Err(ValidationError::DuplicatedAlias {
                alias: alias.to_string(),
            });
        }

        out.push(TypeInstanceBinding {
            name: alias.to_string(),
            id: ti.id.clone(),
        });
    }

    Ok(out)
}

fn find_alias<'a>(type_ref: &TypeRef, requires: &'a [ImplementationRequirement]) -> Option<&'a str> {
    requires
        .iter()
        .flat_map(ImplementationRequirement::all_items)
        .find_map(|item| match (&item.alias, &item.type_ref) {
            (Some(alias), Some(item_ref)) if item_ref == type_ref => Some(alias.as_str()),
            _ => None,
        })
}

/// Binds the rule's additional TypeInstances by name.
///
/// Every entry must match the name and TypeRef of an additional input declared
/// by `implementation`.
///
/// # Errors
/// - `MissingTypeRef` if an entry has no complete TypeRef
/// - `UndefinedAdditionalTypeInstances` listing every entry the Implementation does not declare
pub fn resolve_additional_type_instances(
    rule: &Rule,
    implementation: &ImplementationRevision,
) -> Result<Vec<TypeInstanceBinding>, ValidationError> {
    let entries = rule.additional_type_instances();

    if let Some(ti) = entries.iter().find(|ti| !is_type_ref_resolved(ti.type_ref.as_ref())) {
        return Err(ValidationError::MissingTypeRef {
            kind: TypeInstanceKind::Additional,
            id: ti.id.clone(),
        });
    }

    let impl_path = implementation.path().unwrap_or_default();
    let issues: IssueList = entries
        .iter()
        .filter(|ti| !is_declared(ti, implementation))
        .map(|ti| {
            let type_ref = ti.type_ref.as_ref().map(ToString::to_string).unwrap_or_default();
            Issue::new(
                ti.name.clone(),
                format!("TypeInstance (Type reference: {type_ref:?}) was not found in Implementation {impl_path:?}"),
            )
        })
        .collect();

    if !issues.is_empty() {
        return Err(ValidationError::UndefinedAdditionalTypeInstances {
            implementation: impl_path.to_string(),
            issues,
        });
    }

    Ok(entries
        .iter()
        .map(|ti| TypeInstanceBinding {
            name: ti.name.clone(),
            id: ti.id.clone(),
        })
        .collect())
}

fn is_declared(ti: &AdditionalTypeInstanceToInject, implementation: &ImplementationRevision) -> bool {
    implementation
        .additional_type_instances()
        .iter()
        .any(|decl| decl.name == ti.name && decl.type_ref.is_some() && decl.type_ref == ti.type_ref)
}

/// Encodes the rule's additional parameters as YAML documents keyed by name.
///
/// Parameters are passed as-is; whether the Implementation accepts them is
/// not checked here.
///
/// # Errors
/// Returns `Serialization` if a value cannot be encoded as YAML.
pub fn resolve_additional_parameters(rule: &Rule) -> PolicyResult<BTreeMap<String, String>> {
    rule.additional_parameters()
        .iter()
        .map(|param| {
            let data = serde_yaml::to_string(&param.value).map_err(|e| PolicyError::Serialization {
                message: format!("while marshaling additional input parameters to YAML: {e}"),
            })?;
            Ok((param.name.clone(), data))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::policy::{
        AdditionalParameter, ImplementationConstraints, InjectData, RequiredTypeInstanceToInject,
    };
    use crate::types::RequirementItem;

    fn sa() -> TypeRef {
        TypeRef::new("cap.type.gcp.auth.service-account", "0.1.0")
    }

    fn rule(inject: InjectData) -> Rule {
        Rule::new(ImplementationConstraints::default()).with_inject(inject)
    }

    fn gcp_impl() -> ImplementationRevision {
        ImplementationRevision::new("cap.implementation.gcp.cloudsql.postgresql.install", "0.1.0").with_requirement(
            ImplementationRequirement {
                prefix: "cap.type.gcp.auth".to_string(),
                all_of: vec![RequirementItem::aliased(sa(), "gcp-sa")],
                ..ImplementationRequirement::default()
            },
        )
    }

    #[test]
    fn binds_required_type_instance_to_alias() {
        let rule = rule(InjectData {
            required_type_instances: vec![RequiredTypeInstanceToInject::new("id1", sa())],
            ..InjectData::default()
        });

        let got = resolve_required_type_instances(&rule, &gcp_impl()).unwrap();
        assert_eq!(
            got,
            vec![TypeInstanceBinding {
                name: "gcp-sa".to_string(),
                id: "id1".to_string()
            }]
        );
    }

    #[test]
    fn skips_type_instances_the_implementation_does_not_need() {
        let rule = rule(InjectData {
            required_type_instances: vec![
                RequiredTypeInstanceToInject::new("other", TypeRef::new("cap.type.aws.auth.credentials", "0.1.0")),
                RequiredTypeInstanceToInject::new("older", TypeRef::new("cap.type.gcp.auth.service-account", "0.0.1")),
            ],
            ..InjectData::default()
        });
        assert!(resolve_required_type_instances(&rule, &gcp_impl()).unwrap().is_empty());
    }

    #[test]
    fn unaliased_items_are_not_injectable() {
        let implementation = ImplementationRevision::new("cap.implementation.x", "0.1.0").with_requirement(
            ImplementationRequirement {
                prefix: "cap.type".to_string(),
                one_of: vec![RequirementItem::new(sa())],
                ..ImplementationRequirement::default()
            },
        );
        let rule = rule(InjectData {
            required_type_instances: vec![RequiredTypeInstanceToInject::new("id1", sa())],
            ..InjectData::default()
        });
        assert!(resolve_required_type_instances(&rule, &implementation).unwrap().is_empty());
    }

    #[test]
    fn missing_type_ref_is_rejected() {
        let rule = rule(InjectData {
            required_type_instances: vec![RequiredTypeInstanceToInject {
                id: "id1".to_string(),
                description: None,
                type_ref: None,
            }],
            ..InjectData::default()
        });
        let err = resolve_required_type_instances(&rule, &gcp_impl()).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MissingTypeRef { kind: TypeInstanceKind::Required, ref id } if id == "id1"
        ));
    }

    #[test]
    fn duplicated_alias_is_rejected() {
        let rule = rule(InjectData {
            required_type_instances: vec![
                RequiredTypeInstanceToInject::new("id1", sa()),
                RequiredTypeInstanceToInject::new("id2", sa()),
            ],
            ..InjectData::default()
        });
        let err = resolve_required_type_instances(&rule, &gcp_impl()).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicatedAlias { ref alias } if alias == "gcp-sa"));
    }

    #[test]
    fn binds_declared_additional_type_instances() {
        let db = TypeRef::new("cap.type.db.config", "0.1.0");
        let implementation = gcp_impl().with_additional_type_instance("db-config", db.clone());
        let rule = rule(InjectData {
            additional_type_instances: vec![AdditionalTypeInstanceToInject::new("id9", "db-config", db)],
            ..InjectData::default()
        });

        let got = resolve_additional_type_instances(&rule, &implementation).unwrap();
        assert_eq!(got[0].name, "db-config");
        assert_eq!(got[0].id, "id9");
    }

    #[test]
    fn undefined_additional_type_instances_are_aggregated() {
        let implementation = gcp_impl()
            .with_additional_type_instance("known", TypeRef::new("cap.type.known", "0.1.0"));
        let rule = rule(InjectData {
            additional_type_instances: vec![
                AdditionalTypeInstanceToInject::new("a", "first", TypeRef::new("cap.type.first", "0.1.0")),
                AdditionalTypeInstanceToInject::new("b", "known", TypeRef::new("cap.type.known", "0.2.0")),
            ],
            ..InjectData::default()
        });

        let err = resolve_additional_type_instances(&rule, &implementation).unwrap_err();
        let ValidationError::UndefinedAdditionalTypeInstances { implementation, issues } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(implementation, "cap.implementation.gcp.cloudsql.postgresql.install");
        assert_eq!(issues.len(), 2);

        let msg = err.to_string();
        assert!(msg.contains("\"first\""));
        assert!(msg.contains("\"known\""));
        assert!(msg.contains(
            "TypeInstance (Type reference: \"cap.type.first:0.1.0\") was not found in Implementation \"cap.implementation.gcp.cloudsql.postgresql.install\""
        ));
    }

    #[test]
    fn additional_parameters_are_yaml_encoded() {
        let rule = rule(InjectData {
            additional_parameters: vec![
                AdditionalParameter::new("additional-parameters", json!({"snapshot": true})),
                AdditionalParameter::new("replicas", json!(3)),
            ],
            ..InjectData::default()
        });

        let got = resolve_additional_parameters(&rule).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got["additional-parameters"].trim(), "snapshot: true");
        assert_eq!(got["replicas"].trim(), "3");
    }

    #[test]
    fn rule_without_inject_yields_nothing() {
        let rule = Rule::default();
        assert!(resolve_required_type_instances(&rule, &gcp_impl()).unwrap().is_empty());
        assert!(resolve_additional_type_instances(&rule, &gcp_impl()).unwrap().is_empty());
        assert!(resolve_additional_parameters(&rule).unwrap().is_empty());
    }
}
