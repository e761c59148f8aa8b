//! Task-queue routing.
//!
//! A job is routed to a named execution queue from the geography of its
//! connection (or workspace) and two placement feature flags. The queue names
//! themselves come from an injected [`TaskQueueMapper`]; the router only picks
//! which mapping variant applies.

pub mod lookup;
pub mod mapper;
pub mod router;
pub mod types;

pub use lookup::{
    FeatureFlagClient, FlagContext, GeographyLookup, InMemoryGeographyLookup, LookupError,
    StaticFeatureFlags,
};
pub use mapper::{DefaultTaskQueueMapper, TaskQueueMapper};
pub use router::{
    RouterService, RoutingError, USE_EXPANDED_PLACEMENT_FLAG, USE_FULLY_EXPANDED_PLACEMENT_FLAG,
};
pub use types::{Geography, JobType};
