//! Hub client contract.

use std::collections::HashMap;

use thiserror::Error;

use crate::filter::ImplementationFilter;
use crate::types::{ImplementationRevision, InterfaceRef, InterfaceRevision, TypeRef};

/// Errors reported by a Hub backend.
#[derive(Debug, Error)]
pub enum HubError {
    /// Interface does not exist.
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    /// Transport or remote failure.
    #[error("Hub request failed: {message}")]
    Transport {
        /// Backend specific description.
        message: String,
    },

    /// Backend state is unusable.
    #[error("Hub backend error: {0}")]
    Backend(String),
}

/// Options for listing Implementation revisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListImplementationRevisionsOptions {
    /// Candidate criteria.
    pub filter: ImplementationFilter,
    /// Sort by path ascending, then revision descending.
    pub sort_by_path_asc_and_revision_desc: bool,
}

impl ListImplementationRevisionsOptions {
    /// Creates options with the given filter and no sorting.
    #[must_use]
    pub fn new(filter: ImplementationFilter) -> Self {
        Self {
            filter,
            sort_by_path_asc_and_revision_desc: false,
        }
    }

    /// Requests sorted output.
    #[must_use]
    pub fn sorted(mut self) -> Self {
        self.sort_by_path_asc_and_revision_desc = true;
        self
    }
}

/// Read access to the Hub catalog and TypeInstance storage.
///
/// Implementations must be safe to call from several threads at once.
/// Cancellation and timeouts are the backend's concern.
pub trait HubClient: Send + Sync {
    /// Returns the latest revision of an Interface.
    fn get_interface_latest_revision_string(&self, interface: &InterfaceRef) -> Result<String, HubError>;

    /// Finds an Interface revision. Returns `Ok(None)` when it does not exist.
    fn find_interface_revision(&self, interface: &InterfaceRef) -> Result<Option<InterfaceRevision>, HubError>;

    /// Lists Implementation revisions implementing `interface`.
    fn list_implementation_revisions_for_interface(
        &self,
        interface: &InterfaceRef,
        opts: &ListImplementationRevisionsOptions,
    ) -> Result<Vec<ImplementationRevision>, HubError>;

    /// Lists the Types of all existing TypeInstances.
    fn list_type_instances_type_ref(&self) -> Result<Vec<TypeRef>, HubError>;

    /// Looks up the Types of the given TypeInstances. Unknown IDs are omitted.
    fn find_type_instances_type_ref(&self, ids: &[String]) -> Result<HashMap<String, TypeRef>, HubError>;
}
