use super::types::{Geography, JobType};

/// Maps a placement to a physical task-queue name.
pub trait TaskQueueMapper: Send + Sync {
    fn task_queue(&self, geography: Geography, job_type: JobType) -> String;
}

impl<F> TaskQueueMapper for F
where
    F: Fn(Geography, JobType) -> String + Send + Sync,
{
    fn task_queue(&self, geography: Geography, job_type: JobType) -> String {
        self(geography, job_type)
    }
}

/// `[PREFIX_][GEOGRAPHY_]BASE`, e.g. `SYNC`, `EU_SYNC`, `EXPANDED_EU_CHECK_CONNECTION`.
///
/// `AUTO` and `US` share the unprefixed default queues.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultTaskQueueMapper {
    placement_prefix: Option<String>,
}

impl DefaultTaskQueueMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_placement_prefix(prefix: impl Into<String>) -> Self {
        Self {
            placement_prefix: Some(prefix.into()),
        }
    }

    pub fn base_queue(job_type: JobType) -> &'static str {
        match job_type {
            JobType::Sync => "SYNC",
            JobType::Check => "CHECK_CONNECTION",
            JobType::Discover => "DISCOVER_SCHEMA",
            JobType::Spec => "GET_SPEC",
            JobType::ResetConnection => "RESET_CONNECTION",
        }
    }
}

impl TaskQueueMapper for DefaultTaskQueueMapper {
    fn task_queue(&self, geography: Geography, job_type: JobType) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if let Some(prefix) = self.placement_prefix.as_deref() {
            parts.push(prefix);
        }
        if !matches!(geography, Geography::Auto | Geography::Us) {
            parts.push(geography.as_str());
        }
        parts.push(Self::base_queue(job_type));
        parts.join("_")
    }
}
