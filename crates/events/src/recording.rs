//! Recording listener for tests/debugging.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use syncplane_core::ExecutionId;

use crate::event::StateChangeEvent;
use crate::listener::StateChangeListener;

type EventQueue = Arc<Mutex<VecDeque<StateChangeEvent>>>;

/// Registry of state-change events keyed by execution id.
///
/// - One FIFO queue per execution id, created on first event
/// - Safe for concurrent producers; events of one id keep insertion order
/// - Owned by the test that creates it (no process-wide state), so tests can
///   run in parallel without seeing each other's executions
#[derive(Debug, Default)]
pub struct RecordingStateListener {
    queues: RwLock<HashMap<ExecutionId, EventQueue>>,
}

impl RecordingStateListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn queue(&self, execution_id: ExecutionId) -> EventQueue {
        if let Some(q) = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&execution_id)
        {
            return q.clone();
        }

        self.queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(execution_id)
            .or_default()
            .clone()
    }

    /// Remove and return the recorded events of `execution_id`, oldest first.
    pub fn drain(&self, execution_id: ExecutionId) -> VecDeque<StateChangeEvent> {
        let queue = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&execution_id)
            .cloned();

        match queue {
            Some(q) => std::mem::take(&mut *q.lock().unwrap_or_else(PoisonError::into_inner)),
            None => VecDeque::new(),
        }
    }

    /// Execution ids that have published at least one event.
    pub fn execution_ids(&self) -> Vec<ExecutionId> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}

impl StateChangeListener for RecordingStateListener {
    fn add_event(&self, execution_id: ExecutionId, event: StateChangeEvent) {
        debug!(
            execution_id = %execution_id,
            field = %event.field(),
            value = event.value(),
            "workflow state changed"
        );
        self.queue(execution_id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
    }

    fn events(&self, execution_id: ExecutionId) -> VecDeque<StateChangeEvent> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&execution_id)
            .map(|q| q.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StateField;
    use std::thread;

    #[test]
    fn keeps_insertion_order_per_execution() {
        let listener = RecordingStateListener::new();
        let id = ExecutionId::new();

        listener.add_event(id, StateChangeEvent::new(StateField::Running, true));
        listener.add_event(id, StateChangeEvent::new(StateField::Failed, true));
        listener.add_event(id, StateChangeEvent::new(StateField::Running, false));

        let events: Vec<_> = listener.events(id).into_iter().collect();
        assert_eq!(
            events,
            vec![
                StateChangeEvent::new(StateField::Running, true),
                StateChangeEvent::new(StateField::Failed, true),
                StateChangeEvent::new(StateField::Running, false),
            ]
        );
    }

    #[test]
    fn executions_are_isolated() {
        let listener = RecordingStateListener::new();
        let a = ExecutionId::new();
        let b = ExecutionId::new();

        listener.add_event(a, StateChangeEvent::new(StateField::Running, true));

        assert_eq!(listener.events(a).len(), 1);
        assert!(listener.events(b).is_empty());
        assert_eq!(listener.execution_ids(), vec![a]);
    }

    #[test]
    fn drain_empties_the_queue() {
        let listener = RecordingStateListener::new();
        let id = ExecutionId::new();
        listener.add_event(id, StateChangeEvent::new(StateField::Success, true));

        assert_eq!(listener.drain(id).len(), 1);
        assert!(listener.events(id).is_empty());
        assert!(listener.drain(ExecutionId::new()).is_empty());
    }

    #[test]
    fn concurrent_producers_keep_per_execution_order() {
        let listener = RecordingStateListener::arc();
        let ids: Vec<_> = (0..8).map(|_| ExecutionId::new()).collect();

        let handles: Vec<_> = ids
            .iter()
            .copied()
            .map(|id| {
                let listener = listener.clone();
                thread::spawn(move || {
                    for i in 0..200 {
                        listener.add_event(id, StateChangeEvent::new(StateField::Running, i % 2 == 0));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        for id in ids {
            let events = listener.events(id);
            assert_eq!(events.len(), 200);
            for (i, e) in events.iter().enumerate() {
                assert_eq!(e.value(), i % 2 == 0);
            }
        }
    }
}
