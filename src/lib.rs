//! # capact-policy - Policy-driven Implementation resolution
//!
//! Given an abstract Interface, pick a concrete Implementation from the Hub
//! according to a layered, operator-defined Policy, and compute what the
//! Policy asks to inject into it.
//!
//! ## Core Concepts
//!
//! - **Policy**: rule-sets per Interface, merged from Global, Action and
//!   Workflow-step layers; step policies may name Interfaces by import alias
//! - **Rule**: Implementation constraints plus injection data; rules are tried
//!   in priority order
//! - **Filter**: path pattern, attributes, requirements satisfied by available
//!   TypeInstances, and declared requirements
//! - **Injection**: TypeInstances bound by alias or name, YAML-encoded parameters
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use capact_policy::{InMemoryHub, InterfaceRef, Policy, PolicyEnforcedResolver, ResolverConfig};
//!
//! let hub = Arc::new(InMemoryHub::new());
//! let resolver = PolicyEnforcedResolver::new(hub, ResolverConfig::default())?;
//! resolver.set_global_policy(Policy::from_yaml_file("policy.yaml")?)?;
//!
//! let resolution = resolver.list_implementation_revisions_for_interface(
//!     &InterfaceRef::latest("cap.interface.database.postgresql.install"),
//! )?;
//! if let (Some(rule), Some(implementation)) = (&resolution.rule, resolution.implementations.first()) {
//!     let type_instances = resolver.list_required_type_instances_to_inject(rule, implementation)?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod types;

pub mod policy;

pub mod filter;
pub mod sort;

pub mod inject;
pub mod metadata;

pub mod hub;
pub mod resolver;

pub use error::{Issue, IssueList, PolicyError, PolicyResult, TypeInstanceKind, ValidationError};
pub use filter::{filter_implementation_revisions, AvailableTypeRefs, ImplementationFilter};
pub use hub::{HubClient, HubError, InMemoryHub, ListImplementationRevisionsOptions};
pub use inject::{resolve_additional_parameters, resolve_additional_type_instances, resolve_required_type_instances};
pub use policy::{
    merge_policies, AdditionalParameter, AdditionalTypeInstanceToInject, AttributeFilter, FilterRule,
    ImplementationConstraints, InjectData, MergeOrder, Policy, PolicyLayer, RequiredTypeInstanceToInject, Rule,
    RuleIndex, RulesForInterface, WorkflowInjectData, WorkflowInterfaceRef, WorkflowPolicy, WorkflowRule,
    WorkflowRulesForInterface,
};
pub use resolver::{ImplementationResolution, PolicyEnforcedResolver, ResolverConfig};
pub use sort::sort_implementation_revisions;
pub use types::{
    resolve_action_path_from_imports, ImplementationImport, ImplementationRevision, InterfaceRef, InterfaceRevision,
    ManifestRef, TypeInstanceBinding, TypeRef,
};
