//! Manifest references and the Hub read models consumed by the resolver.
//!
//! Implementation and Interface revisions are read-only snapshots fetched from
//! the Hub on every call. Optional blocks are modelled with `Option` so callers
//! must handle incomplete manifests explicitly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Identifies a manifest kind and version, e.g. `cap.type.aws.sa:0.1.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeRef {
    /// Dotted hierarchical manifest path.
    pub path: String,
    /// Manifest revision. Usually semver, but any string is accepted.
    pub revision: String,
}

impl TypeRef {
    /// Creates a new TypeRef.
    #[must_use]
    pub fn new(path: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            revision: revision.into(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.revision)
    }
}

/// A manifest reference whose revision may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManifestRef {
    /// Dotted hierarchical manifest path.
    pub path: String,
    /// Optional revision. `None` matches any revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl ManifestRef {
    /// Creates a reference matching any revision of `path`.
    #[must_use]
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            revision: None,
        }
    }

    /// Creates a reference pinned to a single revision.
    #[must_use]
    pub fn exact(path: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            revision: Some(revision.into()),
        }
    }

    /// Returns true if `type_ref` has the same path and, when pinned, the same revision.
    #[must_use]
    pub fn matches(&self, type_ref: &TypeRef) -> bool {
        if self.path != type_ref.path {
            return false;
        }
        self.revision
            .as_deref()
            .map_or(true, |rev| rev == type_ref.revision)
    }
}

impl fmt::Display for ManifestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.revision {
            Some(rev) => write!(f, "{}:{rev}", self.path),
            None => write!(f, "{}", self.path),
        }
    }
}

/// Reference to an Interface. An absent or empty revision means "latest".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceRef {
    /// Interface path.
    pub path: String,
    /// Interface revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl InterfaceRef {
    /// Reference to the latest revision of an Interface.
    #[must_use]
    pub fn latest(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            revision: None,
        }
    }

    /// Reference to a specific Interface revision.
    #[must_use]
    pub fn new(path: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            revision: Some(revision.into()),
        }
    }

    /// Returns the revision if it is set and non-empty.
    #[must_use]
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref().filter(|rev| !rev.is_empty())
    }
}

impl fmt::Display for InterfaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.revision() {
            Some(rev) => write!(f, "{}:{rev}", self.path),
            None => write!(f, "{}", self.path),
        }
    }
}

/// Attribute attached to an Implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRevision {
    /// Attribute path, e.g. `cap.attribute.cloud.provider.gcp`.
    pub path: String,
    /// Attribute revision.
    pub revision: String,
}

/// Metadata block of an Implementation revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationMetadata {
    /// Implementation path.
    pub path: String,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Classification tags.
    #[serde(default)]
    pub attributes: Vec<AttributeRevision>,
}

/// A single entry of a requirement list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementItem {
    /// Type the Implementation depends on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_ref: Option<TypeRef>,
    /// Name under which the Implementation expects the TypeInstance to be injected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl RequirementItem {
    /// Requirement that is checked but never injected.
    #[must_use]
    pub fn new(type_ref: TypeRef) -> Self {
        Self {
            type_ref: Some(type_ref),
            alias: None,
        }
    }

    /// Requirement injected under `alias`.
    #[must_use]
    pub fn aliased(type_ref: TypeRef, alias: impl Into<String>) -> Self {
        Self {
            type_ref: Some(type_ref),
            alias: Some(alias.into()),
        }
    }
}

/// The requirement combinators an Implementation may declare.
///
/// `OneOf` means **exactly one** of the listed items must be satisfied. This is
/// not an inclusive "one of": two satisfied items fail the combinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequirementCombinator {
    /// Every item must be satisfied.
    AllOf,
    /// At least one item must be satisfied.
    AnyOf,
    /// Exactly one item must be satisfied.
    OneOf,
}

impl RequirementCombinator {
    /// All combinators, in evaluation order.
    pub const ALL: [Self; 3] = [Self::AllOf, Self::AnyOf, Self::OneOf];
}

/// A group of requirements sharing a common prefix, e.g. `cap.core.type.platform`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationRequirement {
    /// Common path prefix of the items.
    #[serde(default)]
    pub prefix: String,
    /// Items which all must be present.
    #[serde(default)]
    pub all_of: Vec<RequirementItem>,
    /// Items of which at least one must be present.
    #[serde(default)]
    pub any_of: Vec<RequirementItem>,
    /// Items of which exactly one must be present.
    #[serde(default)]
    pub one_of: Vec<RequirementItem>,
}

impl ImplementationRequirement {
    /// Returns the items declared for a combinator.
    #[must_use]
    pub fn items(&self, combinator: RequirementCombinator) -> &[RequirementItem] {
        match combinator {
            RequirementCombinator::AllOf => &self.all_of,
            RequirementCombinator::AnyOf => &self.any_of,
            RequirementCombinator::OneOf => &self.one_of,
        }
    }

    /// Iterates over all items (`oneOf`, `allOf`, `anyOf`).
    pub fn all_items(&self) -> impl Iterator<Item = &RequirementItem> {
        self.one_of
            .iter()
            .chain(self.all_of.iter())
            .chain(self.any_of.iter())
    }
}

/// A TypeInstance an Implementation accepts by name on top of the Interface input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalTypeInstanceDecl {
    /// Name of the input.
    pub name: String,
    /// Type of the input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_ref: Option<TypeRef>,
}

/// Additional input accepted by an Implementation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationAdditionalInput {
    /// Named TypeInstances.
    #[serde(default)]
    pub type_instances: Vec<AdditionalTypeInstanceDecl>,
}

/// Spec block of an Implementation revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationSpec {
    /// Interfaces realised by this Implementation.
    #[serde(default)]
    pub implements: Vec<TypeRef>,
    /// External resource dependencies.
    #[serde(default)]
    pub requires: Vec<ImplementationRequirement>,
    /// Additional accepted input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_input: Option<ImplementationAdditionalInput>,
    /// Interface groups the Implementation workflow refers to by alias.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<ImplementationImport>,
}

/// An imported Interface group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationImport {
    /// Path of the Interface group, e.g. `cap.interface.database.postgresql`.
    pub interface_group_path: String,
    /// Alias used in Action references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Application version constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    /// Imported Interfaces of the group.
    #[serde(default)]
    pub methods: Vec<ImplementationImportMethod>,
}

impl ImplementationImport {
    /// Creates an aliased import without methods.
    #[must_use]
    pub fn new(interface_group_path: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            interface_group_path: interface_group_path.into(),
            alias: Some(alias.into()),
            ..Self::default()
        }
    }

    /// Adds an imported Interface. `None` means the latest revision.
    #[must_use]
    pub fn with_method(mut self, name: impl Into<String>, revision: Option<&str>) -> Self {
        self.methods.push(ImplementationImportMethod {
            name: name.into(),
            revision: revision.map(str::to_string),
        });
        self
    }
}

/// A single Interface imported from a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationImportMethod {
    /// Interface name within the group.
    pub name: String,
    /// Interface revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// Resolves an Action reference of the form `<import_alias>.<method_name>`.
///
/// The first import with a matching alias and method wins.
///
/// # Errors
/// - `MalformedActionReference` if `reference` has no `.` separator
/// - `ActionImportNotFound` if no import matches
pub fn resolve_action_path_from_imports(
    imports: &[ImplementationImport],
    reference: &str,
) -> Result<ManifestRef, ValidationError> {
    let Some((alias, name)) = reference.split_once('.') else {
        return Err(ValidationError::MalformedActionReference {
            reference: reference.to_string(),
        });
    };

    imports
        .iter()
        .filter(|import| import.alias.as_deref() == Some(alias))
        .find_map(|import| {
            import.methods.iter().find(|m| m.name == name).map(|method| ManifestRef {
                path: format!("{}.{name}", import.interface_group_path),
                revision: method.revision.clone().filter(|rev| !rev.is_empty()),
            })
        })
        .ok_or_else(|| ValidationError::ActionImportNotFound {
            reference: reference.to_string(),
        })
}

/// A concrete, versioned realisation of one or more Interfaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationRevision {
    /// Implementation revision.
    pub revision: String,
    /// Metadata block. May be missing in partial Hub responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ImplementationMetadata>,
    /// Spec block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<ImplementationSpec>,
}

impl ImplementationRevision {
    /// Creates a revision with metadata and an empty spec.
    #[must_use]
    pub fn new(path: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            metadata: Some(ImplementationMetadata {
                path: path.into(),
                ..ImplementationMetadata::default()
            }),
            spec: Some(ImplementationSpec::default()),
        }
    }

    /// Declares that this revision implements `interface`.
    #[must_use]
    pub fn implementing(mut self, interface: TypeRef) -> Self {
        self.spec.get_or_insert_with(ImplementationSpec::default).implements.push(interface);
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, path: impl Into<String>, revision: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(ImplementationMetadata::default)
            .attributes
            .push(AttributeRevision {
                path: path.into(),
                revision: revision.into(),
            });
        self
    }

    /// Adds a requirement group.
    #[must_use]
    pub fn with_requirement(mut self, requirement: ImplementationRequirement) -> Self {
        self.spec.get_or_insert_with(ImplementationSpec::default).requires.push(requirement);
        self
    }

    /// Declares an additional input TypeInstance.
    #[must_use]
    pub fn with_additional_type_instance(mut self, name: impl Into<String>, type_ref: TypeRef) -> Self {
        self.spec
            .get_or_insert_with(ImplementationSpec::default)
            .additional_input
            .get_or_insert_with(ImplementationAdditionalInput::default)
            .type_instances
            .push(AdditionalTypeInstanceDecl {
                name: name.into(),
                type_ref: Some(type_ref),
            });
        self
    }

    /// Implementation path, if metadata is present.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.path.as_str())
    }

    /// Attributes, or an empty slice when metadata is missing.
    #[must_use]
    pub fn attributes(&self) -> &[AttributeRevision] {
        self.metadata.as_ref().map_or(&[], |m| m.attributes.as_slice())
    }

    /// Requirement groups, or an empty slice when the spec block is missing.
    #[must_use]
    pub fn requires(&self) -> &[ImplementationRequirement] {
        self.spec.as_ref().map_or(&[], |s| s.requires.as_slice())
    }

    /// Imported Interface groups, or an empty slice when the spec block is missing.
    #[must_use]
    pub fn imports(&self) -> &[ImplementationImport] {
        self.spec.as_ref().map_or(&[], |s| s.imports.as_slice())
    }

    /// Adds an imported Interface group.
    #[must_use]
    pub fn with_import(mut self, import: ImplementationImport) -> Self {
        self.spec.get_or_insert_with(ImplementationSpec::default).imports.push(import);
        self
    }

    /// Declared additional input TypeInstances.
    #[must_use]
    pub fn additional_type_instances(&self) -> &[AdditionalTypeInstanceDecl] {
        self.spec
            .as_ref()
            .and_then(|s| s.additional_input.as_ref())
            .map_or(&[], |input| input.type_instances.as_slice())
    }
}

/// Metadata block of an Interface revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceMetadata {
    /// Interface path.
    pub path: String,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Input parameter declared by an Interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputParameter {
    /// Parameter name.
    pub name: String,
    /// JSON schema of the parameter, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<serde_json::Value>,
}

/// Input TypeInstance declared by an Interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputTypeInstance {
    /// Input name.
    pub name: String,
    /// Expected Type.
    pub type_ref: TypeRef,
}

/// Declared input of an Interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceInput {
    /// Input parameters.
    #[serde(default)]
    pub parameters: Vec<InputParameter>,
    /// Input TypeInstances.
    #[serde(default)]
    pub type_instances: Vec<InputTypeInstance>,
}

/// A versioned Interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRevision {
    /// Interface revision.
    pub revision: String,
    /// Metadata block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<InterfaceMetadata>,
    /// Declared input.
    #[serde(default)]
    pub input: InterfaceInput,
}

impl InterfaceRevision {
    /// Creates an Interface revision without declared input.
    #[must_use]
    pub fn new(path: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            metadata: Some(InterfaceMetadata {
                path: path.into(),
                display_name: None,
            }),
            input: InterfaceInput::default(),
        }
    }

    /// Interface path, if metadata is present.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.path.as_str())
    }
}

/// A TypeInstance to pass into an Action under a given name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeInstanceBinding {
    /// Name the Implementation expects.
    pub name: String,
    /// TypeInstance ID.
    pub id: String,
}
