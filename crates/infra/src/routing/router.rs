use std::sync::Arc;

use tracing::debug;

use syncplane_core::{ConnectionId, WorkspaceId};

use super::lookup::{FeatureFlagClient, FlagContext, GeographyLookup, LookupError};
use super::mapper::{DefaultTaskQueueMapper, TaskQueueMapper};
use super::types::{Geography, JobType};

pub const USE_EXPANDED_PLACEMENT_FLAG: &str = "platform.use-expanded-placement";
pub const USE_FULLY_EXPANDED_PLACEMENT_FLAG: &str = "platform.use-fully-expanded-placement";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// Programmer error: the job type cannot be routed by workspace.
    #[error("job type '{0}' cannot be routed by workspace")]
    UnsupportedJobType(JobType),
    #[error(transparent)]
    Lookup(#[from] LookupError),
}

/// Picks the task queue of a job.
///
/// With the expanded-placement flag off the base mapping is used whatever the
/// fully-expanded flag says. With it on, the fully-expanded flag selects
/// between the two expanded mappings.
///
/// Placement flags are evaluated against the owning workspace only for check
/// and discover jobs. Sync, spec and reset jobs are evaluated against the
/// connection, so a connection-level flag override moves that connection's
/// sync traffic even when its workspace has the flag off.
pub struct RouterService {
    lookup: Arc<dyn GeographyLookup>,
    flags: Arc<dyn FeatureFlagClient>,
    base: Arc<dyn TaskQueueMapper>,
    expanded: Arc<dyn TaskQueueMapper>,
    fully_expanded: Arc<dyn TaskQueueMapper>,
}

impl RouterService {
    pub fn new(
        lookup: Arc<dyn GeographyLookup>,
        flags: Arc<dyn FeatureFlagClient>,
        base: Arc<dyn TaskQueueMapper>,
        expanded: Arc<dyn TaskQueueMapper>,
        fully_expanded: Arc<dyn TaskQueueMapper>,
    ) -> Self {
        Self {
            lookup,
            flags,
            base,
            expanded,
            fully_expanded,
        }
    }

    /// Router over [`DefaultTaskQueueMapper`]s, the expanded variants
    /// prefixed with `EXPANDED` and `FULLY_EXPANDED`.
    pub fn with_default_mappers(
        lookup: Arc<dyn GeographyLookup>,
        flags: Arc<dyn FeatureFlagClient>,
    ) -> Self {
        Self::new(
            lookup,
            flags,
            Arc::new(DefaultTaskQueueMapper::new()),
            Arc::new(DefaultTaskQueueMapper::with_placement_prefix("EXPANDED")),
            Arc::new(DefaultTaskQueueMapper::with_placement_prefix("FULLY_EXPANDED")),
        )
    }

    /// Route a connection's job. Check and discover jobs are evaluated against
    /// the flags of the owning workspace; everything else against the
    /// connection.
    pub fn get_task_queue(
        &self,
        connection_id: ConnectionId,
        job_type: JobType,
    ) -> Result<String, RoutingError> {
        let geography = self.lookup.geography_for_connection(connection_id)?;
        let context = if job_type.is_workspace_routable() {
            FlagContext::Workspace(self.lookup.workspace_for_connection(connection_id)?)
        } else {
            FlagContext::Connection(connection_id)
        };

        let queue = self.select(geography, job_type, &context);
        debug!(connection_id = %connection_id, %job_type, %geography, queue = %queue, "routed job");
        Ok(queue)
    }

    /// Route a workspace-scoped job (check/discover before a connection exists).
    pub fn get_task_queue_for_workspace(
        &self,
        workspace_id: WorkspaceId,
        job_type: JobType,
    ) -> Result<String, RoutingError> {
        if !job_type.is_workspace_routable() {
            return Err(RoutingError::UnsupportedJobType(job_type));
        }

        let geography = self.lookup.geography_for_workspace(workspace_id)?;
        let queue = self.select(geography, job_type, &FlagContext::Workspace(workspace_id));
        debug!(workspace_id = %workspace_id, %job_type, %geography, queue = %queue, "routed job");
        Ok(queue)
    }

    fn select(&self, geography: Geography, job_type: JobType, context: &FlagContext) -> String {
        let mapper = if !self.flags.bool_variation(USE_EXPANDED_PLACEMENT_FLAG, context) {
            &self.base
        } else if self.flags.bool_variation(USE_FULLY_EXPANDED_PLACEMENT_FLAG, context) {
            &self.fully_expanded
        } else {
            &self.expanded
        };
        mapper.task_queue(geography, job_type)
    }
}
