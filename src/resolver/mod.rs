//! Policy-enforced Implementation resolution.
//!
//! [`PolicyEnforcedResolver`] combines the policy store with a Hub client: it
//! picks the rule-set for an Interface, walks its rules in priority order and
//! returns the Implementations matching the first rule that yields any.

pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{PolicyError, PolicyResult};
use crate::filter::{AvailableTypeRefs, ImplementationFilter};
use crate::hub::{HubClient, ListImplementationRevisionsOptions};
use crate::inject::{resolve_additional_parameters, resolve_additional_type_instances, resolve_required_type_instances};
use crate::metadata::{find_unresolved_type_refs, validate_policy_metadata, validate_rule_metadata};
use crate::policy::{MergeOrder, Policy, Rule, WorkflowPolicy};
use crate::types::{ImplementationRevision, InterfaceRef, InterfaceRevision, TypeInstanceBinding, TypeRef};

use store::{PolicySnapshot, PolicyStore};

/// Type of the platform every Implementation may assume to be present.
pub const KUBERNETES_PLATFORM_TYPE_PATH: &str = "cap.core.type.platform.kubernetes";

/// Resolver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolverConfig {
    /// Initial merge order of the policy layers.
    pub merge_order: MergeOrder,
    /// Resource Types treated as always available.
    pub constant_type_refs: Vec<TypeRef>,
    /// Maximum queued commands for the policy store.
    pub queue_capacity: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            merge_order: MergeOrder::default(),
            constant_type_refs: vec![TypeRef::new(KUBERNETES_PLATFORM_TYPE_PATH, "0.1.0")],
            queue_capacity: 64,
        }
    }
}

/// Outcome of resolving an Interface.
///
/// `rule` is the rule that produced `implementations`. Both are empty when no
/// rule matched; that is not an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImplementationResolution {
    /// Matching Implementations, sorted by path ascending and revision descending.
    pub implementations: Vec<ImplementationRevision>,
    /// Winning rule.
    pub rule: Option<Rule>,
}

impl ImplementationResolution {
    /// Returns true if nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.implementations.is_empty()
    }
}

/// Hub client wrapper that filters Implementations according to policies.
pub struct PolicyEnforcedResolver {
    hub: Arc<dyn HubClient>,
    store: PolicyStore,
    constant_type_refs: Vec<TypeRef>,
}

impl PolicyEnforcedResolver {
    /// Creates a resolver with empty policy layers.
    ///
    /// # Errors
    /// Returns `Internal` if the policy store cannot be started.
    pub fn new(hub: Arc<dyn HubClient>, config: ResolverConfig) -> PolicyResult<Self> {
        let store = PolicyStore::start(config.merge_order, config.queue_capacity)?;
        Ok(Self {
            hub,
            store,
            constant_type_refs: config.constant_type_refs,
        })
    }

    /// Replaces the global policy.
    ///
    /// # Errors
    /// Returns `Internal` if the policy store has stopped.
    pub fn set_global_policy(&self, policy: Policy) -> PolicyResult<()> {
        self.store.set_global(policy).map(drop)
    }

    /// Replaces the Action policy.
    ///
    /// # Errors
    /// Returns `Internal` if the policy store has stopped.
    pub fn set_action_policy(&self, policy: Policy) -> PolicyResult<()> {
        self.store.set_action(policy).map(drop)
    }

    /// Replaces all workflow step policies. Import aliases must already be resolved.
    ///
    /// # Errors
    /// - `Validation` if a step policy still refers to an Interface by alias
    /// - `Internal` if the policy store has stopped
    pub fn set_workflow_step_policies(&self, policies: Vec<WorkflowPolicy>) -> PolicyResult<()> {
        let policies = policies
            .into_iter()
            .map(Policy::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        self.store.set_workflow_steps(policies).map(drop)
    }

    /// Adds a workflow step policy on top of the stack. Import aliases must
    /// already be resolved with [`WorkflowPolicy::resolve_imports`].
    ///
    /// # Errors
    /// - `Validation` if the step policy still refers to an Interface by alias
    /// - `Internal` if the policy store has stopped
    pub fn push_workflow_step_policy(&self, policy: WorkflowPolicy) -> PolicyResult<()> {
        let policy = Policy::try_from(policy)?;
        self.store.push_workflow_step(policy).map(drop)
    }

    /// Removes the most recently pushed workflow step policy, if any.
    ///
    /// # Errors
    /// Returns `Internal` if the policy store has stopped.
    pub fn pop_workflow_step_policy(&self) -> PolicyResult<Option<Policy>> {
        self.store.pop_workflow_step()
    }

    /// Replaces the merge order.
    ///
    /// # Errors
    /// Returns `Internal` if the policy store has stopped.
    pub fn set_policy_order(&self, order: MergeOrder) -> PolicyResult<()> {
        self.store.set_order(order).map(drop)
    }

    /// Returns the effective merged policy.
    ///
    /// # Errors
    /// Returns `Internal` if the policy store has stopped.
    pub fn policy(&self) -> PolicyResult<Policy> {
        Ok(self.store.snapshot()?.policy.clone())
    }

    /// Lists the Implementations of `interface` allowed by the current policy.
    ///
    /// # Errors
    /// - `Hub` if a Hub call fails
    /// - `Validation` if TypeInstances to inject cannot be resolved
    pub fn list_implementation_revisions_for_interface(
        &self,
        interface: &InterfaceRef,
    ) -> PolicyResult<ImplementationResolution> {
        let interface = self.with_revision(interface)?;
        let snapshot = self.resolved_snapshot()?;

        let Some(rules) = snapshot.index.find(&interface).filter(|rules| !rules.one_of.is_empty()) else {
            tracing::debug!(interface = %interface, "no policy rules for Interface");
            return Ok(ImplementationResolution::default());
        };

        let available = self.available_type_refs()?;

        for (idx, rule) in rules.one_of.iter().enumerate() {
            validate_rule_metadata(rule)?;

            let filter = ImplementationFilter::for_rule(rule, available.clone());
            let opts = ListImplementationRevisionsOptions::new(filter).sorted();
            let implementations = self
                .hub
                .list_implementation_revisions_for_interface(&interface, &opts)
                .map_err(|e| PolicyError::hub("while listing Implementation revisions for Interface", e))?;

            tracing::trace!(interface = %interface, rule = idx, found = implementations.len(), "evaluated policy rule");
            if implementations.is_empty() {
                continue;
            }

            tracing::debug!(interface = %interface, rule = idx, found = implementations.len(), "policy rule matched");
            return Ok(ImplementationResolution {
                implementations,
                rule: Some(rule.clone()),
            });
        }

        tracing::debug!(interface = %interface, "no policy rule yielded Implementations");
        Ok(ImplementationResolution::default())
    }

    /// Required TypeInstances to inject into `implementation`, bound by alias.
    ///
    /// # Errors
    /// - `Validation` if an entry has no TypeRef
    /// - `Validation` if two entries resolve to the same alias
    pub fn list_required_type_instances_to_inject(
        &self,
        rule: &Rule,
        implementation: &ImplementationRevision,
    ) -> PolicyResult<Vec<TypeInstanceBinding>> {
        Ok(resolve_required_type_instances(rule, implementation)?)
    }

    /// Additional TypeInstances to inject into `implementation`, bound by name.
    ///
    /// # Errors
    /// Returns `Validation` if an entry has no TypeRef or names an input the
    /// Implementation does not declare.
    pub fn list_additional_type_instances_to_inject(
        &self,
        rule: &Rule,
        implementation: &ImplementationRevision,
    ) -> PolicyResult<Vec<TypeInstanceBinding>> {
        Ok(resolve_additional_type_instances(rule, implementation)?)
    }

    /// Additional input parameters to inject, YAML-encoded and keyed by name.
    ///
    /// # Errors
    /// Returns `Serialization` if a value cannot be encoded as YAML.
    pub fn list_additional_input_to_inject(&self, rule: &Rule) -> PolicyResult<BTreeMap<String, String>> {
        resolve_additional_parameters(rule)
    }

    /// Finds an Interface revision. Returns `Ok(None)` when it does not exist.
    ///
    /// # Errors
    /// Returns `Hub` if the Hub call fails.
    pub fn find_interface_revision(&self, interface: &InterfaceRef) -> PolicyResult<Option<InterfaceRevision>> {
        self.hub
            .find_interface_revision(interface)
            .map_err(|e| PolicyError::hub("while finding Interface revision", e))
    }

    fn with_revision(&self, interface: &InterfaceRef) -> PolicyResult<InterfaceRef> {
        if interface.revision().is_some() {
            return Ok(interface.clone());
        }

        let revision = self
            .hub
            .get_interface_latest_revision_string(interface)
            .map_err(|e| PolicyError::hub("while fetching latest Interface revision string", e))?;
        Ok(InterfaceRef::new(interface.path.clone(), revision))
    }

    /// Returns a snapshot whose TypeInstances to inject all carry a TypeRef.
    fn resolved_snapshot(&self) -> PolicyResult<Arc<PolicySnapshot>> {
        let snapshot = self.store.snapshot()?;
        let type_refs = find_unresolved_type_refs(self.hub.as_ref(), &snapshot.policy)?;
        if type_refs.is_empty() {
            validate_policy_metadata(&snapshot.policy)?;
            return Ok(snapshot);
        }

        let resolved = match self.store.store_resolved_metadata(snapshot.generation, type_refs.clone())? {
            Some(stored) => stored,
            None => Arc::new(snapshot.with_resolved_type_refs(&type_refs)),
        };
        validate_policy_metadata(&resolved.policy)?;
        Ok(resolved)
    }

    fn available_type_refs(&self) -> PolicyResult<AvailableTypeRefs> {
        let mut available: AvailableTypeRefs = self
            .hub
            .list_type_instances_type_ref()
            .map_err(|e| PolicyError::hub("while listing TypeInstance TypeRefs", e))?
            .into_iter()
            .collect();
        available.extend(self.constant_type_refs.iter().cloned());
        Ok(available)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::hub::{HubError, InMemoryHub};
    use crate::policy::{
        ImplementationConstraints, RulesForInterface, WorkflowInterfaceRef, WorkflowRule, WorkflowRulesForInterface,
    };
    use crate::types::ManifestRef;

    const IFACE: &str = "cap.interface.database.postgresql.install";

    struct FailingHub;

    impl HubClient for FailingHub {
        fn get_interface_latest_revision_string(&self, _: &InterfaceRef) -> Result<String, HubError> {
            Err(HubError::Transport {
                message: "connection refused".to_string(),
            })
        }

        fn find_interface_revision(&self, _: &InterfaceRef) -> Result<Option<InterfaceRevision>, HubError> {
            Ok(None)
        }

        fn list_implementation_revisions_for_interface(
            &self,
            _: &InterfaceRef,
            _: &ListImplementationRevisionsOptions,
        ) -> Result<Vec<ImplementationRevision>, HubError> {
            Err(HubError::Transport {
                message: "connection refused".to_string(),
            })
        }

        fn list_type_instances_type_ref(&self) -> Result<Vec<TypeRef>, HubError> {
            Ok(Vec::new())
        }

        fn find_type_instances_type_ref(&self, _: &[String]) -> Result<HashMap<String, TypeRef>, HubError> {
            Ok(HashMap::new())
        }
    }

    fn policy() -> Policy {
        Policy::new(vec![RulesForInterface::new(
            ManifestRef::path(IFACE),
            vec![Rule::new(ImplementationConstraints::path("cap.implementation.bitnami.*"))],
        )])
    }

    fn step_policy() -> WorkflowPolicy {
        WorkflowPolicy::new(vec![WorkflowRulesForInterface::new(
            WorkflowInterfaceRef::Manifest(ManifestRef::path(IFACE)),
            vec![WorkflowRule::new(ImplementationConstraints::path("cap.implementation.bitnami.*"))],
        )])
    }

    #[test]
    fn default_config() {
        let config = ResolverConfig::default();
        assert_eq!(config.merge_order, MergeOrder::default());
        assert_eq!(
            config.constant_type_refs,
            vec![TypeRef::new("cap.core.type.platform.kubernetes", "0.1.0")]
        );
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ResolverConfig =
            serde_yaml::from_str("mergeOrder: [GLOBAL, ACTION]\nqueueCapacity: 8\n").unwrap();
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.merge_order.as_slice().len(), 2);
        assert_eq!(config.constant_type_refs.len(), 1);
    }

    #[test]
    fn latest_revision_error_has_context() {
        let resolver = PolicyEnforcedResolver::new(Arc::new(FailingHub), ResolverConfig::default()).unwrap();
        let err = resolver
            .list_implementation_revisions_for_interface(&InterfaceRef::latest(IFACE))
            .unwrap_err();
        assert!(err.is_hub());
        assert!(err.to_string().starts_with("while fetching latest Interface revision string"));
    }

    #[test]
    fn list_error_has_context() {
        let resolver = PolicyEnforcedResolver::new(Arc::new(FailingHub), ResolverConfig::default()).unwrap();
        resolver.set_global_policy(policy()).unwrap();
        let err = resolver
            .list_implementation_revisions_for_interface(&InterfaceRef::new(IFACE, "0.1.0"))
            .unwrap_err();
        assert!(err.to_string().contains("while listing Implementation revisions for Interface"));
    }

    #[test]
    fn no_rules_is_not_an_error() {
        let resolver = PolicyEnforcedResolver::new(Arc::new(InMemoryHub::new()), ResolverConfig::default()).unwrap();
        let got = resolver
            .list_implementation_revisions_for_interface(&InterfaceRef::new(IFACE, "0.1.0"))
            .unwrap();
        assert!(got.is_empty());
        assert!(got.rule.is_none());
    }

    #[test]
    fn policy_reflects_layers() {
        let resolver = PolicyEnforcedResolver::new(Arc::new(InMemoryHub::new()), ResolverConfig::default()).unwrap();
        resolver.push_workflow_step_policy(step_policy()).unwrap();
        assert_eq!(resolver.policy().unwrap().rules.len(), 1);
        assert!(resolver.pop_workflow_step_policy().unwrap().is_some());
        assert!(resolver.policy().unwrap().rules.is_empty());
    }

    #[test]
    fn step_policy_with_unresolved_alias_is_rejected() {
        let resolver = PolicyEnforcedResolver::new(Arc::new(InMemoryHub::new()), ResolverConfig::default()).unwrap();
        let step = WorkflowPolicy::new(vec![WorkflowRulesForInterface::new(
            WorkflowInterfaceRef::Alias("postgres.install".to_string()),
            Vec::new(),
        )]);

        let err = resolver.push_workflow_step_policy(step.clone()).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("postgres.install"));
        assert!(resolver.set_workflow_step_policies(vec![step_policy(), step]).unwrap_err().is_validation());
        assert!(resolver.policy().unwrap().rules.is_empty());
    }
}
