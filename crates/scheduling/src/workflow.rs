//! Mutable flag bag of one workflow execution.

use std::sync::Arc;

use syncplane_core::ExecutionId;
use syncplane_events::{StateChangeEvent, StateChangeListener, StateField};

/// Generates the getter and publishing setter of each flag.
macro_rules! state_flags {
    ($( $field:ident, $getter:ident, $setter:ident => $variant:ident; )+) => {
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
        struct Flags {
            $( $field: bool, )+
        }

        impl WorkflowState {
            $(
                pub fn $getter(&self) -> bool {
                    self.flags.$field
                }

                pub fn $setter(&mut self, value: bool) {
                    self.publish(StateField::$variant, value);
                    self.flags.$field = value;
                }
            )+
        }
    };
}

state_flags! {
    running, is_running, set_running => Running;
    deleted, is_deleted, set_deleted => Deleted;
    skip_scheduling, is_skip_scheduling, set_skip_scheduling => SkipScheduling;
    updated, is_updated, set_updated => Updated;
    cancelled, is_cancelled, set_cancelled => Cancelled;
    failed, is_failed, set_failed => Failed;
    success, is_success, set_success => Success;
    cancelled_for_reset, is_cancelled_for_reset, set_cancelled_for_reset => CancelledForReset;
    done_waiting, is_done_waiting, set_done_waiting => DoneWaiting;
    skip_scheduling_next_workflow, is_skip_scheduling_next_workflow,
        set_skip_scheduling_next_workflow => SkipSchedulingNextWorkflow;
}

/// Status flags of one in-flight execution, bound to a listener.
///
/// Every setter publishes `(field, value)` to the listener and only then
/// updates the flag, so an observer never sees a flag change that was not
/// announced first. Setting a flag to the value it already has still
/// publishes an event.
pub struct WorkflowState {
    execution_id: ExecutionId,
    listener: Arc<dyn StateChangeListener>,
    flags: Flags,
}

impl WorkflowState {
    pub fn new(execution_id: ExecutionId, listener: Arc<dyn StateChangeListener>) -> Self {
        Self {
            execution_id,
            listener,
            flags: Flags::default(),
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn listener(&self) -> &Arc<dyn StateChangeListener> {
        &self.listener
    }

    pub fn get(&self, field: StateField) -> bool {
        let f = &self.flags;
        match field {
            StateField::Running => f.running,
            StateField::Deleted => f.deleted,
            StateField::SkipScheduling => f.skip_scheduling,
            StateField::Updated => f.updated,
            StateField::Cancelled => f.cancelled,
            StateField::Failed => f.failed,
            StateField::Success => f.success,
            StateField::CancelledForReset => f.cancelled_for_reset,
            StateField::DoneWaiting => f.done_waiting,
            StateField::SkipSchedulingNextWorkflow => f.skip_scheduling_next_workflow,
        }
    }

    pub fn set(&mut self, field: StateField, value: bool) {
        match field {
            StateField::Running => self.set_running(value),
            StateField::Deleted => self.set_deleted(value),
            StateField::SkipScheduling => self.set_skip_scheduling(value),
            StateField::Updated => self.set_updated(value),
            StateField::Cancelled => self.set_cancelled(value),
            StateField::Failed => self.set_failed(value),
            StateField::Success => self.set_success(value),
            StateField::CancelledForReset => self.set_cancelled_for_reset(value),
            StateField::DoneWaiting => self.set_done_waiting(value),
            StateField::SkipSchedulingNextWorkflow => {
                self.set_skip_scheduling_next_workflow(value)
            }
        }
    }

    /// Back to defaults between logical runs, one event per field.
    pub fn reset(&mut self) {
        for field in StateField::ALL {
            self.set(field, false);
        }
    }

    fn publish(&self, field: StateField, value: bool) {
        self.listener
            .add_event(self.execution_id, StateChangeEvent::new(field, value));
    }
}

impl std::fmt::Debug for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowState")
            .field("execution_id", &self.execution_id)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}
