//! Buffered persistence of sync checkpoints.
//!
//! ## Design
//!
//! - The producer (`persist`) only touches an in-memory buffer
//! - A dedicated flusher thread swaps the buffer out and upserts it on a fixed
//!   period; failures are merged into the next cycle instead of retried
//! - `close` waits (bounded) for the flusher to stop, then performs the only
//!   retried flush
//!
//! ## Components
//!
//! - `StateMessage` / `ConnectionState`: checkpoint messages and what is persisted
//! - `StateAggregator`: last-write-wins accumulation of checkpoints
//! - `StateApi`: remote checkpoint store (in-memory implementation for tests/dev)
//! - `SyncPersistence`: the buffered persister

pub mod aggregator;
pub mod api;
pub mod persister;
pub mod state;

pub use aggregator::StateAggregator;
pub use api::{InMemoryStateApi, StateApi, StateApiError};
pub use persister::{
    CloseOutcome, ConnectionContext, PersistenceError, SyncPersistence, SyncPersistenceConfig,
};
pub use state::{ConnectionState, StateMessage, StateType, StreamDescriptor, StreamState};
