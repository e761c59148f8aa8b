//! `syncplane-core` — identifiers and errors shared by every control-plane crate.
//!
//! This crate has **no infrastructure concerns**: no IO, no threads, no logging.

pub mod error;
pub mod id;

pub use error::{CoreError, CoreResult};
pub use id::{ConnectionId, ExecutionId, WorkspaceId};
