use serde::{Deserialize, Serialize};

/// A boolean flag of the workflow state bag.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StateField {
    Running,
    Deleted,
    SkipScheduling,
    Updated,
    Cancelled,
    Failed,
    Success,
    CancelledForReset,
    DoneWaiting,
    SkipSchedulingNextWorkflow,
}

impl StateField {
    /// Every field, in the order `reset()` emits them.
    pub const ALL: [StateField; 10] = [
        StateField::Running,
        StateField::Deleted,
        StateField::SkipScheduling,
        StateField::Updated,
        StateField::Cancelled,
        StateField::Failed,
        StateField::Success,
        StateField::CancelledForReset,
        StateField::DoneWaiting,
        StateField::SkipSchedulingNextWorkflow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateField::Running => "running",
            StateField::Deleted => "deleted",
            StateField::SkipScheduling => "skipScheduling",
            StateField::Updated => "updated",
            StateField::Cancelled => "cancelled",
            StateField::Failed => "failed",
            StateField::Success => "success",
            StateField::CancelledForReset => "cancelledForReset",
            StateField::DoneWaiting => "doneWaiting",
            StateField::SkipSchedulingNextWorkflow => "skipSchedulingNextWorkflow",
        }
    }
}

impl core::fmt::Display for StateField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mutation of one workflow flag.
///
/// Events are immutable and published before the flag they describe changes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateChangeEvent {
    field: StateField,
    value: bool,
}

impl StateChangeEvent {
    pub fn new(field: StateField, value: bool) -> Self {
        Self { field, value }
    }

    pub fn field(&self) -> StateField {
        self.field
    }

    pub fn value(&self) -> bool {
        self.value
    }
}
