//! External connection signals and how they mutate a [`WorkflowState`].
//!
//! Signals arrive while the execution either waits for its next scheduled run
//! or runs a sync. The caller owns the running sync; when a signal requires it
//! to be cancelled the outcome says so and the caller performs the cancel.

use tracing::info;

use crate::workflow::WorkflowState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Flags were updated.
    Applied,
    /// Flags were updated and the running sync must be cancelled by the caller.
    CancelRunningSync,
    /// The signal does not apply in the current state; nothing changed.
    Ignored,
}

impl SignalOutcome {
    pub fn is_applied(&self) -> bool {
        !matches!(self, SignalOutcome::Ignored)
    }
}

impl WorkflowState {
    /// Run now instead of waiting for the schedule.
    pub fn submit_manual_sync(&mut self) -> SignalOutcome {
        if self.is_running() {
            info!(execution_id = %self.execution_id(), "manual sync ignored: a sync is already running");
            return SignalOutcome::Ignored;
        }
        self.set_skip_scheduling(true);
        SignalOutcome::Applied
    }

    pub fn cancel_job(&mut self) -> SignalOutcome {
        if !self.is_running() {
            info!(execution_id = %self.execution_id(), "cancel ignored: no sync is running");
            return SignalOutcome::Ignored;
        }
        self.set_cancelled(true);
        SignalOutcome::CancelRunningSync
    }

    /// Marks the connection deleted, then cancels a running sync if any.
    pub fn delete_connection(&mut self) -> SignalOutcome {
        self.set_deleted(true);
        match self.cancel_job() {
            SignalOutcome::Ignored => SignalOutcome::Applied,
            outcome => outcome,
        }
    }

    pub fn connection_updated(&mut self) -> SignalOutcome {
        self.set_updated(true);
        SignalOutcome::Applied
    }

    /// While a sync runs (done waiting) the reset cancels it; while waiting it
    /// skips the rest of the wait.
    pub fn reset_connection(&mut self) -> SignalOutcome {
        if self.is_done_waiting() {
            self.set_cancelled_for_reset(true);
            SignalOutcome::CancelRunningSync
        } else {
            self.set_skip_scheduling(true);
            SignalOutcome::Applied
        }
    }

    pub fn reset_connection_and_skip_next_scheduling(&mut self) -> SignalOutcome {
        if self.is_done_waiting() {
            self.set_cancelled_for_reset(true);
            self.set_skip_scheduling_next_workflow(true);
            SignalOutcome::CancelRunningSync
        } else {
            self.set_skip_scheduling(true);
            self.set_skip_scheduling_next_workflow(true);
            SignalOutcome::Applied
        }
    }

    /// Whether the wait for the next scheduled run should end early.
    pub fn should_interrupt_waiting(&self) -> bool {
        self.is_skip_scheduling() || self.is_deleted() || self.is_updated() || self.is_cancelled()
    }
}
