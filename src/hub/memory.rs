//! In-memory Hub backend.
//!
//! Holds Interface and Implementation manifests plus TypeInstance Types behind
//! a single `RwLock`. Filtering and sorting happen client side through the
//! same helpers the resolver uses.

use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use crate::filter::filter_implementation_revisions;
use crate::sort::{compare_revisions, sort_implementation_revisions};
use crate::types::{ImplementationRevision, InterfaceRef, InterfaceRevision, TypeRef};

use super::traits::{HubClient, HubError, ListImplementationRevisionsOptions};

fn lock_err(context: &'static str) -> HubError {
    HubError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct HubState {
    interfaces: HashMap<String, Vec<InterfaceRevision>>,
    implementations: Vec<ImplementationRevision>,
    type_instances: HashMap<String, TypeRef>,
}

impl HubState {
    fn latest_interface(&self, path: &str) -> Option<&InterfaceRevision> {
        self.interfaces
            .get(path)?
            .iter()
            .max_by(|a, b| compare_revisions(&a.revision, &b.revision))
    }

    fn resolve_revision(&self, interface: &InterfaceRef) -> Result<String, HubError> {
        if let Some(rev) = interface.revision() {
            return Ok(rev.to_string());
        }
        self.latest_interface(&interface.path)
            .map(|iface| iface.revision.clone())
            .ok_or_else(|| HubError::InterfaceNotFound(interface.path.clone()))
    }
}

/// Thread-safe in-memory Hub.
#[derive(Debug, Default)]
pub struct InMemoryHub {
    state: RwLock<HubState>,
}

impl InMemoryHub {
    /// Creates an empty Hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an Interface revision. Metadata with a path is required.
    ///
    /// # Errors
    /// - `Backend` if the revision has no metadata
    /// - `Backend` if the state lock is poisoned
    pub fn add_interface(&self, interface: InterfaceRevision) -> Result<(), HubError> {
        let Some(path) = interface.path().map(str::to_string) else {
            return Err(HubError::Backend("Interface revision without metadata".to_string()));
        };

        let mut state = self.state.write().map_err(|_| lock_err("hub.add_interface"))?;
        let revisions = state.interfaces.entry(path).or_default();
        revisions.retain(|existing| existing.revision != interface.revision);
        revisions.push(interface);
        Ok(())
    }

    /// Stores an Implementation revision.
    ///
    /// # Errors
    /// Returns `Backend` if the state lock is poisoned.
    pub fn add_implementation(&self, implementation: ImplementationRevision) -> Result<(), HubError> {
        let mut state = self.state.write().map_err(|_| lock_err("hub.add_implementation"))?;
        state.implementations.push(implementation);
        Ok(())
    }

    /// Registers a TypeInstance of the given Type and returns its generated ID.
    ///
    /// # Errors
    /// Returns `Backend` if the state lock is poisoned.
    pub fn create_type_instance(&self, type_ref: TypeRef) -> Result<String, HubError> {
        let id = Uuid::new_v4().to_string();
        self.insert_type_instance(id.clone(), type_ref)?;
        Ok(id)
    }

    /// Registers a TypeInstance under a caller-chosen ID, replacing any previous entry.
    ///
    /// # Errors
    /// Returns `Backend` if the state lock is poisoned.
    pub fn insert_type_instance(&self, id: impl Into<String>, type_ref: TypeRef) -> Result<(), HubError> {
        let mut state = self.state.write().map_err(|_| lock_err("hub.insert_type_instance"))?;
        state.type_instances.insert(id.into(), type_ref);
        Ok(())
    }
}

impl HubClient for InMemoryHub {
    fn get_interface_latest_revision_string(&self, interface: &InterfaceRef) -> Result<String, HubError> {
        let state = self.state.read().map_err(|_| lock_err("hub.latest_revision"))?;
        state
            .latest_interface(&interface.path)
            .map(|iface| iface.revision.clone())
            .ok_or_else(|| HubError::InterfaceNotFound(interface.path.clone()))
    }

    fn find_interface_revision(&self, interface: &InterfaceRef) -> Result<Option<InterfaceRevision>, HubError> {
        let state = self.state.read().map_err(|_| lock_err("hub.find_interface_revision"))?;
        let found = match interface.revision() {
            Some(rev) => state
                .interfaces
                .get(&interface.path)
                .and_then(|revs| revs.iter().find(|iface| iface.revision == rev)),
            None => state.latest_interface(&interface.path),
        };
        Ok(found.cloned())
    }

    fn list_implementation_revisions_for_interface(
        &self,
        interface: &InterfaceRef,
        opts: &ListImplementationRevisionsOptions,
    ) -> Result<Vec<ImplementationRevision>, HubError> {
        let state = self.state.read().map_err(|_| lock_err("hub.list_implementations"))?;
        let implemented = TypeRef::new(interface.path.clone(), state.resolve_revision(interface)?);

        let candidates: Vec<ImplementationRevision> = state
            .implementations
            .iter()
            .filter(|rev| {
                rev.spec
                    .as_ref()
                    .is_some_and(|spec| spec.implements.contains(&implemented))
            })
            .cloned()
            .collect();
        drop(state);

        let mut out = filter_implementation_revisions(candidates, &opts.filter);
        if opts.sort_by_path_asc_and_revision_desc {
            sort_implementation_revisions(&mut out);
        }
        Ok(out)
    }

    fn list_type_instances_type_ref(&self) -> Result<Vec<TypeRef>, HubError> {
        let state = self.state.read().map_err(|_| lock_err("hub.list_type_instances"))?;
        Ok(state.type_instances.values().cloned().collect())
    }

    fn find_type_instances_type_ref(&self, ids: &[String]) -> Result<HashMap<String, TypeRef>, HubError> {
        let state = self.state.read().map_err(|_| lock_err("hub.find_type_instances"))?;
        Ok(ids
            .iter()
            .filter_map(|id| state.type_instances.get(id).map(|t| (id.clone(), t.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ImplementationFilter;

    const IFACE: &str = "cap.interface.database.postgresql.install";

    fn hub() -> InMemoryHub {
        let hub = InMemoryHub::new();
        hub.add_interface(InterfaceRevision::new(IFACE, "0.1.0")).unwrap();
        hub.add_interface(InterfaceRevision::new(IFACE, "0.10.0")).unwrap();
        hub.add_interface(InterfaceRevision::new(IFACE, "0.2.0")).unwrap();

        for (path, rev, iface_rev) in [
            ("cap.implementation.bitnami.postgresql.install", "0.1.0", "0.10.0"),
            ("cap.implementation.bitnami.postgresql.install", "0.2.0", "0.10.0"),
            ("cap.implementation.aws.rds.postgresql.install", "0.1.0", "0.10.0"),
            ("cap.implementation.legacy.postgresql.install", "0.1.0", "0.1.0"),
        ] {
            hub.add_implementation(
                ImplementationRevision::new(path, rev).implementing(TypeRef::new(IFACE, iface_rev)),
            )
            .unwrap();
        }
        hub
    }

    #[test]
    fn latest_revision_is_semver_max() {
        let hub = hub();
        assert_eq!(
            hub.get_interface_latest_revision_string(&InterfaceRef::latest(IFACE)).unwrap(),
            "0.10.0"
        );
        let err = hub
            .get_interface_latest_revision_string(&InterfaceRef::latest("cap.interface.unknown"))
            .unwrap_err();
        assert!(matches!(err, HubError::InterfaceNotFound(_)));
    }

    #[test]
    fn find_interface_revision_handles_latest_and_missing() {
        let hub = hub();
        let latest = hub.find_interface_revision(&InterfaceRef::latest(IFACE)).unwrap().unwrap();
        assert_eq!(latest.revision, "0.10.0");
        let pinned = hub.find_interface_revision(&InterfaceRef::new(IFACE, "0.1.0")).unwrap().unwrap();
        assert_eq!(pinned.revision, "0.1.0");
        assert!(hub.find_interface_revision(&InterfaceRef::new(IFACE, "9.9.9")).unwrap().is_none());
    }

    #[test]
    fn lists_filtered_and_sorted() {
        let hub = hub();
        let opts = ListImplementationRevisionsOptions::new(
            ImplementationFilter::new().path_pattern("cap.implementation.(bitnami|aws).*"),
        )
        .sorted();

        let got = hub
            .list_implementation_revisions_for_interface(&InterfaceRef::latest(IFACE), &opts)
            .unwrap();
        let keys: Vec<_> = got.iter().map(|r| (r.path().unwrap_or_default(), r.revision.as_str())).collect();
        assert_eq!(
            keys,
            vec![
                ("cap.implementation.aws.rds.postgresql.install", "0.1.0"),
                ("cap.implementation.bitnami.postgresql.install", "0.2.0"),
                ("cap.implementation.bitnami.postgresql.install", "0.1.0"),
            ]
        );

        let old = hub
            .list_implementation_revisions_for_interface(
                &InterfaceRef::new(IFACE, "0.1.0"),
                &ListImplementationRevisionsOptions::default(),
            )
            .unwrap();
        assert_eq!(old.len(), 1);
    }

    #[test]
    fn type_instance_lookup() {
        let hub = InMemoryHub::new();
        let t = TypeRef::new("cap.type.gcp.auth.service-account", "0.1.0");
        let id = hub.create_type_instance(t.clone()).unwrap();
        assert!(Uuid::parse_str(&id).is_ok());

        let found = hub
            .find_type_instances_type_ref(&[id.clone(), "missing".to_string()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&id], t);
        assert_eq!(hub.list_type_instances_type_ref().unwrap(), vec![t]);
    }

    #[test]
    fn interface_without_metadata_is_rejected() {
        let hub = InMemoryHub::new();
        assert!(hub.add_interface(InterfaceRevision::default()).is_err());
    }
}
