//! State-change listener abstraction.
//!
//! Every mutation of a workflow flag is published to a listener **before** the
//! flag changes, so an observer never sees a flag change without the event that
//! announced it.
//!
//! ## Variants
//!
//! - **No-op** (production default): drops every event. Workflow executions are
//!   long-lived and recording their events would grow memory without bound.
//! - **Recording** (tests/debugging): keeps an insertion-ordered queue of events
//!   per execution id.
//!
//! The variant is chosen by configuration name (`"noop"` / `"test"`) through
//! [`ListenerKind`], never by inspecting types at runtime.
//!
//! ## Thread Safety
//!
//! The trait requires `Send + Sync`. Events for one execution id are produced by
//! that execution's single writer; different executions publish concurrently.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use syncplane_core::ExecutionId;

use crate::event::StateChangeEvent;
use crate::noop::NoopStateListener;
use crate::recording::RecordingStateListener;

/// Receives the state-change events of workflow executions.
pub trait StateChangeListener: Send + Sync {
    /// Append `event` to the queue of `execution_id`.
    fn add_event(&self, execution_id: ExecutionId, event: StateChangeEvent);

    /// Events recorded for `execution_id`, oldest first.
    fn events(&self, execution_id: ExecutionId) -> VecDeque<StateChangeEvent>;
}

impl<L> StateChangeListener for Arc<L>
where
    L: StateChangeListener + ?Sized,
{
    fn add_event(&self, execution_id: ExecutionId, event: StateChangeEvent) {
        (**self).add_event(execution_id, event)
    }

    fn events(&self, execution_id: ExecutionId) -> VecDeque<StateChangeEvent> {
        (**self).events(execution_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    #[error("unknown state listener '{0}' (expected 'noop' or 'test')")]
    UnknownKind(String),
}

/// Configuration name of a listener variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ListenerKind {
    #[default]
    #[serde(rename = "noop")]
    Noop,
    #[serde(rename = "test")]
    Recording,
}

impl ListenerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerKind::Noop => "noop",
            ListenerKind::Recording => "test",
        }
    }

    /// Build a listener of this kind. A recording listener starts empty; hand
    /// the returned value (or a clone of it) to whoever inspects the events.
    pub fn build(self) -> StateListener {
        match self {
            ListenerKind::Noop => StateListener::Noop(NoopStateListener),
            ListenerKind::Recording => {
                StateListener::Recording(Arc::new(RecordingStateListener::new()))
            }
        }
    }
}

impl core::str::FromStr for ListenerKind {
    type Err = ListenerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "noop" => Ok(ListenerKind::Noop),
            "test" => Ok(ListenerKind::Recording),
            other => Err(ListenerError::UnknownKind(other.to_string())),
        }
    }
}

impl core::fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured listener (enum dispatch over the two variants).
#[derive(Debug, Clone)]
pub enum StateListener {
    Noop(NoopStateListener),
    Recording(Arc<RecordingStateListener>),
}

impl StateListener {
    pub fn kind(&self) -> ListenerKind {
        match self {
            StateListener::Noop(_) => ListenerKind::Noop,
            StateListener::Recording(_) => ListenerKind::Recording,
        }
    }

    /// The recording registry, when this is the recording variant.
    pub fn recording(&self) -> Option<&Arc<RecordingStateListener>> {
        match self {
            StateListener::Recording(r) => Some(r),
            StateListener::Noop(_) => None,
        }
    }
}

impl StateChangeListener for StateListener {
    fn add_event(&self, execution_id: ExecutionId, event: StateChangeEvent) {
        match self {
            StateListener::Noop(l) => l.add_event(execution_id, event),
            StateListener::Recording(l) => l.add_event(execution_id, event),
        }
    }

    fn events(&self, execution_id: ExecutionId) -> VecDeque<StateChangeEvent> {
        match self {
            StateListener::Noop(l) => l.events(execution_id),
            StateListener::Recording(l) => l.events(execution_id),
        }
    }
}
