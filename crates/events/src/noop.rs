//! Listener that discards every event.

use std::collections::VecDeque;

use syncplane_core::ExecutionId;

use crate::event::StateChangeEvent;
use crate::listener::StateChangeListener;

/// Production listener: nothing is retained, so long-lived executions do not
/// accumulate memory.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoopStateListener;

impl StateChangeListener for NoopStateListener {
    fn add_event(&self, _execution_id: ExecutionId, _event: StateChangeEvent) {}

    fn events(&self, _execution_id: ExecutionId) -> VecDeque<StateChangeEvent> {
        VecDeque::new()
    }
}
