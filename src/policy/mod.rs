//! Policy data model.
//!
//! A Policy is an ordered list of rule-sets, one per Interface key. Each
//! rule-set holds a priority list of rules: constraints an Implementation must
//! match plus the data to inject when that Implementation is selected.

mod matcher;
mod merge;
mod workflow;
mod yaml;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ManifestRef, TypeRef};

pub use matcher::{match_rules, RuleIndex};
pub use merge::{apply_policy, merge_policies};
pub use workflow::{WorkflowInjectData, WorkflowInterfaceRef, WorkflowPolicy, WorkflowRule, WorkflowRulesForInterface};
pub use yaml::{CURRENT_API_VERSION, SUPPORTED_API_VERSIONS};

/// Interface key matching every Interface.
pub const ANY_INTERFACE_PATH: &str = "cap.*";

/// A layered set of rules controlling Implementation selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Policy document API version.
    #[serde(default)]
    pub api_version: String,
    /// Rule-sets, one per Interface key.
    #[serde(default)]
    pub rules: Vec<RulesForInterface>,
}

impl Policy {
    /// Creates a policy with the current API version.
    #[must_use]
    pub fn new(rules: Vec<RulesForInterface>) -> Self {
        Self {
            api_version: CURRENT_API_VERSION.to_string(),
            rules,
        }
    }

    /// Iterates over every rule of every rule-set.
    pub fn rules_iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().flat_map(|r| r.one_of.iter())
    }

    /// Iterates mutably over every rule of every rule-set.
    pub fn rules_iter_mut(&mut self) -> impl Iterator<Item = &mut Rule> {
        self.rules.iter_mut().flat_map(|r| r.one_of.iter_mut())
    }
}

/// Rules applying to a single Interface key.
///
/// `one_of` is a priority list: the first rule yielding at least one
/// Implementation wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesForInterface {
    /// Interface path (possibly the `cap.*` wildcard) and optional revision.
    pub interface: ManifestRef,
    /// Rules in priority order.
    #[serde(default)]
    pub one_of: Vec<Rule>,
}

impl RulesForInterface {
    /// Creates a rule-set for an Interface key.
    #[must_use]
    pub fn new(interface: ManifestRef, one_of: Vec<Rule>) -> Self {
        Self { interface, one_of }
    }

    /// Returns true if both rule-sets target the same Interface key.
    #[must_use]
    pub fn is_for_same_interface(&self, other: &Self) -> bool {
        self.interface.path == other.interface.path && self.interface.revision == other.interface.revision
    }
}

/// Constraints plus injection directives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Constraints an Implementation must satisfy.
    #[serde(default)]
    pub implementation_constraints: ImplementationConstraints,
    /// Data injected when the rule wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inject: Option<InjectData>,
}

impl Rule {
    /// Creates a rule without injection data.
    #[must_use]
    pub fn new(implementation_constraints: ImplementationConstraints) -> Self {
        Self {
            implementation_constraints,
            inject: None,
        }
    }

    /// Attaches injection data.
    #[must_use]
    pub fn with_inject(mut self, inject: InjectData) -> Self {
        self.inject = Some(inject);
        self
    }

    /// Required TypeInstances to inject, or an empty slice.
    #[must_use]
    pub fn required_type_instances(&self) -> &[RequiredTypeInstanceToInject] {
        self.inject
            .as_ref()
            .map_or(&[], |i| i.required_type_instances.as_slice())
    }

    /// Additional TypeInstances to inject, or an empty slice.
    #[must_use]
    pub fn additional_type_instances(&self) -> &[AdditionalTypeInstanceToInject] {
        self.inject
            .as_ref()
            .map_or(&[], |i| i.additional_type_instances.as_slice())
    }

    /// Additional parameters to inject, or an empty slice.
    #[must_use]
    pub fn additional_parameters(&self) -> &[AdditionalParameter] {
        self.inject
            .as_ref()
            .map_or(&[], |i| i.additional_parameters.as_slice())
    }
}

/// Constraints narrowing the Implementation candidates.
///
/// Equality is structural and distinguishes an absent list from an empty one;
/// the merger relies on it to detect "the same rule" across layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationConstraints {
    /// Regular expression the Implementation path must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Types the Implementation must declare in its `requires` section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<Vec<ManifestRef>>,
    /// Attribute include/exclude filters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<AttributeFilter>>,
}

impl ImplementationConstraints {
    /// Constraint on the Implementation path only.
    #[must_use]
    pub fn path(pattern: impl Into<String>) -> Self {
        Self {
            path: Some(pattern.into()),
            ..Self::default()
        }
    }

    /// Constraint on declared requirements only.
    #[must_use]
    pub fn requires(requires: Vec<ManifestRef>) -> Self {
        Self {
            requires: Some(requires),
            ..Self::default()
        }
    }

    /// Constraint on attributes only.
    #[must_use]
    pub fn attributes(attributes: Vec<AttributeFilter>) -> Self {
        Self {
            attributes: Some(attributes),
            ..Self::default()
        }
    }
}

/// Whether a matching attribute keeps or drops a candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterRule {
    /// Candidate must carry the attribute.
    #[default]
    Include,
    /// Candidate must not carry the attribute.
    Exclude,
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Include => write!(f, "INCLUDE"),
            Self::Exclude => write!(f, "EXCLUDE"),
        }
    }
}

/// Attribute constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeFilter {
    /// Attribute path.
    pub path: String,
    /// Include or exclude.
    #[serde(default)]
    pub rule: FilterRule,
    /// Optional revision the attribute must have.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl AttributeFilter {
    /// Requires the attribute.
    #[must_use]
    pub fn include(path: impl Into<String>, revision: Option<&str>) -> Self {
        Self {
            path: path.into(),
            rule: FilterRule::Include,
            revision: revision.map(str::to_string),
        }
    }

    /// Rejects the attribute.
    #[must_use]
    pub fn exclude(path: impl Into<String>, revision: Option<&str>) -> Self {
        Self {
            path: path.into(),
            rule: FilterRule::Exclude,
            revision: revision.map(str::to_string),
        }
    }
}

/// Data to inject into the selected Implementation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectData {
    /// Extra input parameters, keyed by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_parameters: Vec<AdditionalParameter>,
    /// Existing TypeInstances matched against the Implementation requirements by Type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_type_instances: Vec<RequiredTypeInstanceToInject>,
    /// Existing TypeInstances passed as named additional input.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_type_instances: Vec<AdditionalTypeInstanceToInject>,
}

/// A named parameter value. The value is an arbitrary nested structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalParameter {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    pub value: serde_json::Value,
}

impl AdditionalParameter {
    /// Creates a parameter.
    #[must_use]
    pub fn new(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Reference to an existing TypeInstance injected by Type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredTypeInstanceToInject {
    /// TypeInstance ID.
    pub id: String,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Type of the TypeInstance. Used only to match aliases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_ref: Option<TypeRef>,
}

impl RequiredTypeInstanceToInject {
    /// Creates an entry with a known Type.
    #[must_use]
    pub fn new(id: impl Into<String>, type_ref: TypeRef) -> Self {
        Self {
            id: id.into(),
            description: None,
            type_ref: Some(type_ref),
        }
    }
}

/// Reference to an existing TypeInstance injected by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalTypeInstanceToInject {
    /// TypeInstance ID.
    pub id: String,
    /// Name of the additional input in the Implementation.
    pub name: String,
    /// Type of the TypeInstance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_ref: Option<TypeRef>,
}

impl AdditionalTypeInstanceToInject {
    /// Creates an entry with a known Type.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, type_ref: TypeRef) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            type_ref: Some(type_ref),
        }
    }
}

/// Source of a policy layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyLayer {
    /// Cluster-wide policy.
    Global,
    /// Policy supplied with an Action.
    Action,
    /// Policies attached to workflow steps.
    Workflow,
}

/// Merge order of policy layers. The first layer has the highest priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergeOrder(Vec<PolicyLayer>);

impl MergeOrder {
    /// Creates a merge order.
    #[must_use]
    pub fn new(layers: Vec<PolicyLayer>) -> Self {
        Self(layers)
    }

    /// Returns the layers in application order.
    #[must_use]
    pub fn as_slice(&self) -> &[PolicyLayer] {
        &self.0
    }
}

impl Default for MergeOrder {
    fn default() -> Self {
        Self(vec![PolicyLayer::Action, PolicyLayer::Global, PolicyLayer::Workflow])
    }
}
