//! Remote checkpoint store contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use syncplane_core::ConnectionId;

use super::state::ConnectionState;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateApiError {
    #[error("state api unavailable: {0}")]
    Unavailable(String),
    #[error("state api rejected request: {0}")]
    Rejected(String),
}

/// Where checkpoints are durably stored.
///
/// `upsert_state` must be idempotent: the same state may be re-applied after a
/// retry.
pub trait StateApi: Send + Sync {
    fn get_state(&self, connection_id: ConnectionId)
    -> Result<Option<ConnectionState>, StateApiError>;

    fn upsert_state(
        &self,
        connection_id: ConnectionId,
        state: &ConnectionState,
    ) -> Result<(), StateApiError>;
}

impl<T: StateApi + ?Sized> StateApi for Arc<T> {
    fn get_state(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<ConnectionState>, StateApiError> {
        (**self).get_state(connection_id)
    }

    fn upsert_state(
        &self,
        connection_id: ConnectionId,
        state: &ConnectionState,
    ) -> Result<(), StateApiError> {
        (**self).upsert_state(connection_id, state)
    }
}

/// In-memory state store for tests/dev.
///
/// Keeps a log of every successful upsert and can be told to fail upcoming
/// calls, which is how flush-failure paths are exercised.
#[derive(Debug, Default)]
pub struct InMemoryStateApi {
    states: RwLock<HashMap<ConnectionId, ConnectionState>>,
    writes: Mutex<Vec<(ConnectionId, ConnectionState)>>,
    upsert_calls: AtomicUsize,
    failing_upserts: AtomicUsize,
    failing_reads: AtomicBool,
}

impl InMemoryStateApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seed the stored state without recording a write.
    pub fn insert(&self, connection_id: ConnectionId, state: ConnectionState) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection_id, state);
    }

    /// Make the next `n` upserts fail with `Unavailable`.
    pub fn fail_next_upserts(&self, n: usize) {
        self.failing_upserts.store(n, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.failing_reads.store(fail, Ordering::SeqCst);
    }

    /// Successful upserts, oldest first.
    pub fn writes(&self) -> Vec<(ConnectionId, ConnectionState)> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Upsert attempts, failed ones included.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

impl StateApi for InMemoryStateApi {
    fn get_state(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<ConnectionState>, StateApiError> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(StateApiError::Unavailable("injected read failure".to_string()));
        }
        Ok(self
            .states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&connection_id)
            .cloned())
    }

    fn upsert_state(
        &self,
        connection_id: ConnectionId,
        state: &ConnectionState,
    ) -> Result<(), StateApiError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .failing_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StateApiError::Unavailable("injected upsert failure".to_string()));
        }

        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection_id, state.clone());
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((connection_id, state.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upsert_then_read() {
        let api = InMemoryStateApi::new();
        let id = ConnectionId::new();
        assert_eq!(api.get_state(id).unwrap(), None);

        let state = ConnectionState::Global(json!({"v": 1}));
        api.upsert_state(id, &state).unwrap();
        assert_eq!(api.get_state(id).unwrap(), Some(state.clone()));
        assert_eq!(api.writes(), vec![(id, state)]);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let api = InMemoryStateApi::new();
        let id = ConnectionId::new();
        let state = ConnectionState::Legacy(json!({"v": 1}));

        api.fail_next_upserts(2);
        assert!(api.upsert_state(id, &state).is_err());
        assert!(api.upsert_state(id, &state).is_err());
        assert!(api.upsert_state(id, &state).is_ok());
        assert_eq!(api.upsert_calls(), 3);
        assert_eq!(api.writes().len(), 1);

        api.fail_reads(true);
        assert!(matches!(api.get_state(id), Err(StateApiError::Unavailable(_))));
    }
}
