//! Control-plane infrastructure: task-queue routing, checkpoint persistence,
//! pod lifecycle tracking and configuration loading.

pub mod config;
pub mod persistence;
pub mod pod_status;
pub mod routing;

pub use config::ControlPlaneConfig;
