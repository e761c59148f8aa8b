use serde::{Deserialize, Serialize};

/// Data-residency tag of a connection or workspace.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Geography {
    #[default]
    Auto,
    Us,
    Eu,
}

impl Geography {
    pub fn as_str(&self) -> &'static str {
        match self {
            Geography::Auto => "AUTO",
            Geography::Us => "US",
            Geography::Eu => "EU",
        }
    }
}

impl std::fmt::Display for Geography {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work a worker executes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Sync,
    Check,
    Discover,
    Spec,
    ResetConnection,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::Sync,
        JobType::Check,
        JobType::Discover,
        JobType::Spec,
        JobType::ResetConnection,
    ];

    /// Job types routed by workspace rather than by connection.
    pub fn is_workspace_routable(&self) -> bool {
        matches!(self, JobType::Check | JobType::Discover)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Sync => "sync",
            JobType::Check => "check",
            JobType::Discover => "discover",
            JobType::Spec => "spec",
            JobType::ResetConnection => "reset_connection",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
