//! Lifecycle tracking of asynchronously launched worker pods.
//!
//! The pod writes a marker document per lifecycle stage it reaches; anyone
//! holding the run's namespace can read the stage back, so tracking survives
//! restarts of the process that launched the pod.

pub mod store;
pub mod tracker;

pub use store::{DocStoreError, DocumentStore, InMemoryDocumentStore, LocalDocumentStore};
pub use tracker::{PodStatus, PodStatusError, PodStatusTracker};
