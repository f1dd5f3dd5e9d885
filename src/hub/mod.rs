//! Hub collaborator.
//!
//! The resolver reads manifests and TypeInstance metadata through the
//! [`HubClient`] trait. [`InMemoryHub`] is a thread-safe implementation for
//! embedded use and tests.

mod memory;
mod traits;

pub use memory::InMemoryHub;
pub use traits::{HubClient, HubError, ListImplementationRevisionsOptions};
