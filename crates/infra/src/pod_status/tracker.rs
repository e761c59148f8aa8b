use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::store::{DocStoreError, DocumentStore};

/// Lifecycle stage of a worker pod, in lifecycle order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PodStatus {
    NotStarted,
    Initializing,
    Running,
    Succeeded,
    Failed,
}

impl PodStatus {
    /// Stages probed by [`PodStatusTracker::status`], terminal stages first.
    const PROBE_ORDER: [PodStatus; 4] = [
        PodStatus::Failed,
        PodStatus::Succeeded,
        PodStatus::Running,
        PodStatus::Initializing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PodStatus::NotStarted => "NOT_STARTED",
            PodStatus::Initializing => "INITIALIZING",
            PodStatus::Running => "RUNNING",
            PodStatus::Succeeded => "SUCCEEDED",
            PodStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PodStatus::Succeeded | PodStatus::Failed)
    }

    /// Process exit code of a terminal stage.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            PodStatus::Succeeded => Some(0),
            PodStatus::Failed => Some(1),
            _ => None,
        }
    }
}

impl std::fmt::Display for PodStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PodStatusError {
    /// `NOT_STARTED` is the absence of every marker and cannot be written.
    #[error("status {0} has no marker")]
    NotWritable(PodStatus),
    #[error("only terminal statuses carry a payload, got {0}")]
    NotTerminal(PodStatus),
    /// Output was read before the pod succeeded.
    #[error("missing {status} record for {namespace}")]
    MissingRecord {
        namespace: String,
        status: PodStatus,
    },
    #[error(transparent)]
    Store(#[from] DocStoreError),
}

/// Reads and writes the lifecycle markers of one pod run.
///
/// Markers live at `{namespace}/{name}/{STATUS}`; the presence of a key means
/// the stage was reached. The tracker never blocks waiting for a stage;
/// callers poll and own their timeouts.
pub struct PodStatusTracker {
    store: Arc<dyn DocumentStore>,
    run_namespace: String,
    exit_code: OnceLock<i32>,
}

impl PodStatusTracker {
    pub fn new(store: Arc<dyn DocumentStore>, namespace: &str, name: &str) -> Self {
        Self {
            store,
            run_namespace: format!("{namespace}/{name}"),
            exit_code: OnceLock::new(),
        }
    }

    pub fn run_namespace(&self) -> &str {
        &self.run_namespace
    }

    pub fn key(&self, status: PodStatus) -> String {
        format!("{}/{}", self.run_namespace, status.as_str())
    }

    /// Write the empty marker of `status`; rewriting a marker is allowed.
    pub fn write(&self, status: PodStatus) -> Result<(), PodStatusError> {
        if status == PodStatus::NotStarted {
            return Err(PodStatusError::NotWritable(status));
        }
        self.store.write(&self.key(status), "")?;
        info!(run = %self.run_namespace, %status, "pod status written");
        Ok(())
    }

    /// Write a terminal marker carrying the job's serialized output.
    pub fn write_with_payload(&self, status: PodStatus, payload: &str) -> Result<(), PodStatusError> {
        if !status.is_terminal() {
            return Err(PodStatusError::NotTerminal(status));
        }
        self.store.write(&self.key(status), payload)?;
        info!(run = %self.run_namespace, %status, "pod status written with payload");
        Ok(())
    }

    /// Latest stage whose marker exists, `NOT_STARTED` if none does.
    pub fn status(&self) -> Result<PodStatus, PodStatusError> {
        for status in PodStatus::PROBE_ORDER {
            if self.store.read(&self.key(status))?.is_some() {
                return Ok(status);
            }
        }
        Ok(PodStatus::NotStarted)
    }

    /// Payload of the `SUCCEEDED` marker. Only meaningful once the pod succeeded.
    pub fn output(&self) -> Result<String, PodStatusError> {
        self.store
            .read(&self.key(PodStatus::Succeeded))?
            .ok_or_else(|| PodStatusError::MissingRecord {
                namespace: self.run_namespace.clone(),
                status: PodStatus::Succeeded,
            })
    }

    /// `Some(0)` after success, `Some(1)` after failure, `None` while running.
    /// A terminal code is cached; markers are not re-read afterwards.
    pub fn exit_code(&self) -> Result<Option<i32>, PodStatusError> {
        if let Some(code) = self.exit_code.get() {
            return Ok(Some(*code));
        }

        let status = self.status()?;
        let Some(code) = status.exit_code() else {
            return Ok(None);
        };
        if status == PodStatus::Failed {
            warn!(run = %self.run_namespace, "document store reports pod failed");
        }
        Ok(Some(*self.exit_code.get_or_init(|| code)))
    }

    pub fn has_exited(&self) -> Result<bool, PodStatusError> {
        Ok(self.exit_code()?.is_some())
    }

    /// Remove every marker of this run.
    pub fn clear(&self) -> Result<(), PodStatusError> {
        for status in PodStatus::PROBE_ORDER {
            self.store.delete(&self.key(status))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PodStatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodStatusTracker")
            .field("run_namespace", &self.run_namespace)
            .field("exit_code", &self.exit_code.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod_status::store::{InMemoryDocumentStore, LocalDocumentStore};

    fn tracker() -> (PodStatusTracker, Arc<InMemoryDocumentStore>) {
        let store = InMemoryDocumentStore::arc();
        (PodStatusTracker::new(store.clone(), "jobs", "orchestrator-42"), store)
    }

    #[test]
    fn keys_are_namespaced_per_run() {
        let (t, _) = tracker();
        assert_eq!(t.key(PodStatus::Running), "jobs/orchestrator-42/RUNNING");
    }

    #[test]
    fn no_marker_means_not_started() {
        let (t, _) = tracker();
        assert_eq!(t.status().unwrap(), PodStatus::NotStarted);
        assert_eq!(t.exit_code().unwrap(), None);
        assert!(!t.has_exited().unwrap());
    }

    #[test]
    fn initializing_then_succeeded_with_output() {
        let (t, _) = tracker();
        t.write(PodStatus::Initializing).unwrap();
        assert_eq!(t.status().unwrap(), PodStatus::Initializing);

        t.write_with_payload(PodStatus::Succeeded, "{\"records\":10}").unwrap();
        assert_eq!(t.status().unwrap(), PodStatus::Succeeded);
        assert_eq!(t.output().unwrap(), "{\"records\":10}");
        assert_eq!(t.exit_code().unwrap(), Some(0));
    }

    #[test]
    fn highest_present_stage_wins() {
        let (t, _) = tracker();
        t.write(PodStatus::Running).unwrap();
        t.write(PodStatus::Initializing).unwrap();
        assert_eq!(t.status().unwrap(), PodStatus::Running);

        t.write(PodStatus::Failed).unwrap();
        assert_eq!(t.status().unwrap(), PodStatus::Failed);
        assert_eq!(t.exit_code().unwrap(), Some(1));
    }

    #[test]
    fn rewriting_a_marker_is_idempotent() {
        let (t, store) = tracker();
        t.write(PodStatus::Running).unwrap();
        t.write(PodStatus::Running).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn output_before_success_is_a_missing_record() {
        let (t, _) = tracker();
        t.write(PodStatus::Running).unwrap();
        assert!(matches!(
            t.output(),
            Err(PodStatusError::MissingRecord {
                status: PodStatus::Succeeded,
                ..
            })
        ));
    }

    #[test]
    fn invalid_writes_are_rejected() {
        let (t, store) = tracker();
        assert!(matches!(
            t.write(PodStatus::NotStarted),
            Err(PodStatusError::NotWritable(PodStatus::NotStarted))
        ));
        assert!(matches!(
            t.write_with_payload(PodStatus::Running, "x"),
            Err(PodStatusError::NotTerminal(PodStatus::Running))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn exit_code_is_cached_once_terminal() {
        let (t, _) = tracker();
        t.write(PodStatus::Succeeded).unwrap();
        assert_eq!(t.exit_code().unwrap(), Some(0));

        t.clear().unwrap();
        assert_eq!(t.status().unwrap(), PodStatus::NotStarted);
        assert_eq!(t.exit_code().unwrap(), Some(0));
    }

    #[test]
    fn status_survives_a_new_tracker_over_files() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn DocumentStore> = Arc::new(LocalDocumentStore::new(dir.path()));

        PodStatusTracker::new(store.clone(), "jobs", "pod-a")
            .write(PodStatus::Running)
            .unwrap();

        let reopened = PodStatusTracker::new(store, "jobs", "pod-a");
        assert_eq!(reopened.status().unwrap(), PodStatus::Running);
    }

    #[test]
    fn lifecycle_order() {
        assert!(PodStatus::NotStarted < PodStatus::Initializing);
        assert!(PodStatus::Initializing < PodStatus::Running);
        assert!(PodStatus::Running < PodStatus::Succeeded);
        assert!(PodStatus::Failed.is_terminal());
        assert!(!PodStatus::Running.is_terminal());
    }
}
