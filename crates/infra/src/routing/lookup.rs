//! Collaborators consulted while routing: geography/workspace lookups and
//! feature-flag evaluation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use syncplane_core::{ConnectionId, WorkspaceId};

use super::types::Geography;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(WorkspaceId),
    #[error("lookup unavailable: {0}")]
    Unavailable(String),
}

/// Resolves where connections and workspaces live.
pub trait GeographyLookup: Send + Sync {
    fn geography_for_connection(&self, id: ConnectionId) -> Result<Geography, LookupError>;

    fn workspace_for_connection(&self, id: ConnectionId) -> Result<WorkspaceId, LookupError>;

    fn geography_for_workspace(&self, id: WorkspaceId) -> Result<Geography, LookupError>;
}

impl<T: GeographyLookup + ?Sized> GeographyLookup for Arc<T> {
    fn geography_for_connection(&self, id: ConnectionId) -> Result<Geography, LookupError> {
        (**self).geography_for_connection(id)
    }

    fn workspace_for_connection(&self, id: ConnectionId) -> Result<WorkspaceId, LookupError> {
        (**self).workspace_for_connection(id)
    }

    fn geography_for_workspace(&self, id: WorkspaceId) -> Result<Geography, LookupError> {
        (**self).geography_for_workspace(id)
    }
}

/// Entity a flag is evaluated for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FlagContext {
    Workspace(WorkspaceId),
    Connection(ConnectionId),
}

/// Boolean feature-flag evaluation. Always answers; falling back to a default
/// on evaluation failure is the flag client's job.
pub trait FeatureFlagClient: Send + Sync {
    fn bool_variation(&self, flag: &str, context: &FlagContext) -> bool;
}

impl<T: FeatureFlagClient + ?Sized> FeatureFlagClient for Arc<T> {
    fn bool_variation(&self, flag: &str, context: &FlagContext) -> bool {
        (**self).bool_variation(flag, context)
    }
}

/// In-memory lookup for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryGeographyLookup {
    connections: RwLock<HashMap<ConnectionId, (WorkspaceId, Geography)>>,
    workspaces: RwLock<HashMap<WorkspaceId, Geography>>,
}

impl InMemoryGeographyLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn insert_workspace(&self, id: WorkspaceId, geography: Geography) {
        self.workspaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, geography);
    }

    pub fn insert_connection(&self, id: ConnectionId, workspace: WorkspaceId, geography: Geography) {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, (workspace, geography));
    }

    fn connection(&self, id: ConnectionId) -> Result<(WorkspaceId, Geography), LookupError> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied()
            .ok_or(LookupError::ConnectionNotFound(id))
    }
}

impl GeographyLookup for InMemoryGeographyLookup {
    fn geography_for_connection(&self, id: ConnectionId) -> Result<Geography, LookupError> {
        self.connection(id).map(|(_, g)| g)
    }

    fn workspace_for_connection(&self, id: ConnectionId) -> Result<WorkspaceId, LookupError> {
        self.connection(id).map(|(w, _)| w)
    }

    fn geography_for_workspace(&self, id: WorkspaceId) -> Result<Geography, LookupError> {
        self.workspaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied()
            .ok_or(LookupError::WorkspaceNotFound(id))
    }
}

/// Flag client answering from fixed values: a per-context override wins over
/// the flag's global value, which wins over `false`.
#[derive(Debug, Default)]
pub struct StaticFeatureFlags {
    global: RwLock<HashMap<String, bool>>,
    enabled_for: RwLock<HashSet<(String, FlagContext)>>,
}

impl StaticFeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set(&self, flag: impl Into<String>, value: bool) {
        self.global
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(flag.into(), value);
    }

    pub fn enable_for(&self, flag: impl Into<String>, context: FlagContext) {
        self.enabled_for
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((flag.into(), context));
    }
}

impl FeatureFlagClient for StaticFeatureFlags {
    fn bool_variation(&self, flag: &str, context: &FlagContext) -> bool {
        if self
            .enabled_for
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(flag.to_string(), *context))
        {
            return true;
        }
        self.global
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(flag)
            .copied()
            .unwrap_or(false)
    }
}
