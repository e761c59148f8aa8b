//! Workflow state-change events and the listeners that receive them.

pub mod event;
pub mod listener;
pub mod noop;
pub mod recording;

pub use event::{StateChangeEvent, StateField};
pub use listener::{ListenerError, ListenerKind, StateChangeListener, StateListener};
pub use noop::NoopStateListener;
pub use recording::RecordingStateListener;
