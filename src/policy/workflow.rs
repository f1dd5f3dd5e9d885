//! Workflow step policies.
//!
//! A step policy is a restricted Policy attached to a single workflow step.
//! It may only inject additional parameters, and its rule-sets may name the
//! Interface through an import alias of the enclosing Implementation
//! (`<import_alias>.<method_name>`). Aliases are resolved with
//! [`WorkflowPolicy::resolve_imports`] before the policy is converted.

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, PolicyResult, ValidationError};
use crate::types::{resolve_action_path_from_imports, ImplementationImport, ManifestRef};

use super::{AdditionalParameter, ImplementationConstraints, InjectData, Policy, Rule, RulesForInterface};

/// Policy attached to a workflow step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPolicy {
    /// Rule-sets, one per Interface key.
    #[serde(default)]
    pub rules: Vec<WorkflowRulesForInterface>,
}

/// Interface key of a step rule-set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkflowInterfaceRef {
    /// Full path and optional revision.
    Manifest(ManifestRef),
    /// Import alias reference, e.g. `postgres.install`.
    Alias(String),
}

/// Rules of a step policy for a single Interface key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRulesForInterface {
    /// Interface the rules apply to.
    pub interface: WorkflowInterfaceRef,
    /// Rules in priority order.
    #[serde(default)]
    pub one_of: Vec<WorkflowRule>,
}

impl WorkflowRulesForInterface {
    /// Creates a rule-set for an Interface key.
    #[must_use]
    pub fn new(interface: WorkflowInterfaceRef, one_of: Vec<WorkflowRule>) -> Self {
        Self { interface, one_of }
    }
}

/// A step rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRule {
    /// Constraints an Implementation must satisfy.
    #[serde(default)]
    pub implementation_constraints: ImplementationConstraints,
    /// Data injected when the rule wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inject: Option<WorkflowInjectData>,
}

impl WorkflowRule {
    /// Creates a rule without injection data.
    #[must_use]
    pub fn new(implementation_constraints: ImplementationConstraints) -> Self {
        Self {
            implementation_constraints,
            inject: None,
        }
    }

    /// Attaches additional parameters to inject.
    #[must_use]
    pub fn with_additional_parameters(mut self, additional_parameters: Vec<AdditionalParameter>) -> Self {
        self.inject = Some(WorkflowInjectData { additional_parameters });
        self
    }
}

/// Injection data of a step rule. TypeInstances cannot be injected here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkflowInjectData {
    /// Extra input parameters, keyed by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_parameters: Vec<AdditionalParameter>,
}

impl WorkflowPolicy {
    /// Creates a step policy.
    #[must_use]
    pub fn new(rules: Vec<WorkflowRulesForInterface>) -> Self {
        Self { rules }
    }

    /// Parses a step policy.
    ///
    /// # Errors
    /// Returns `InvalidDocument` if the YAML does not describe a step policy,
    /// including one that injects TypeInstances.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ValidationError> {
        serde_yaml::from_str(raw).map_err(|e| ValidationError::InvalidDocument { reason: e.to_string() })
    }

    /// Serializes the step policy to YAML.
    ///
    /// # Errors
    /// Returns `Serialization` if a parameter value cannot be encoded.
    pub fn to_yaml_string(&self) -> PolicyResult<String> {
        serde_yaml::to_string(self).map_err(|e| PolicyError::Serialization {
            message: format!("while marshaling policy to YAML: {e}"),
        })
    }

    /// Replaces alias Interface keys with the full reference from `imports`.
    ///
    /// Empty aliases are left untouched.
    ///
    /// # Errors
    /// - `MalformedActionReference` if an alias is not `<import_alias>.<method_name>`
    /// - `ActionImportNotFound` if no import matches an alias
    pub fn resolve_imports(&mut self, imports: &[ImplementationImport]) -> Result<(), ValidationError> {
        for rules in &mut self.rules {
            let WorkflowInterfaceRef::Alias(alias) = &rules.interface else {
                continue;
            };
            if alias.is_empty() {
                continue;
            }

            let resolved = resolve_action_path_from_imports(imports, alias)?;
            tracing::trace!(alias = %alias, interface = %resolved, "resolved workflow policy Interface alias");
            rules.interface = WorkflowInterfaceRef::Manifest(resolved);
        }
        Ok(())
    }
}

impl From<WorkflowRule> for Rule {
    fn from(rule: WorkflowRule) -> Self {
        Self {
            implementation_constraints: rule.implementation_constraints,
            inject: rule.inject.map(|inject| InjectData {
                additional_parameters: inject.additional_parameters,
                ..InjectData::default()
            }),
        }
    }
}

impl TryFrom<WorkflowPolicy> for Policy {
    type Error = ValidationError;

    fn try_from(policy: WorkflowPolicy) -> Result<Self, Self::Error> {
        let rules = policy
            .rules
            .into_iter()
            .map(|rules| {
                let interface = match rules.interface {
                    WorkflowInterfaceRef::Manifest(interface) => interface,
                    WorkflowInterfaceRef::Alias(alias) => {
                        return Err(ValidationError::UnresolvedInterfaceAlias { alias });
                    }
                };
                Ok(RulesForInterface::new(
                    interface,
                    rules.one_of.into_iter().map(Rule::from).collect(),
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(rules))
    }
}
