//! Retry, backoff and workflow-state supervision of sync jobs.
//!
//! ## Components
//!
//! - `BackoffPolicy`: failure ordinal to wait duration (pure)
//! - `RetryManager`: complete/partial failure tracks, retry limits, backoff delegation
//! - `WorkflowState`: flag bag of one execution; every mutation is published first
//! - signals: how external connection signals mutate the flag bag
//!
//! `RetryManager` and `WorkflowState` are single-writer per execution; callers
//! serialize mutations for one execution id.

pub mod backoff;
pub mod retry;
pub mod signals;
pub mod workflow;

pub use backoff::{BackoffConfig, BackoffPolicy};
pub use retry::{FailureClass, RetryConfig, RetryLimits, RetryManager, RetryState};
pub use signals::SignalOutcome;
pub use workflow::WorkflowState;
