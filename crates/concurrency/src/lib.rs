//! Closable queue primitives used between producer and consumer threads.
//!
//! ## Components
//!
//! - `ClosableQueue`: the shared contract (add / poll / close / is_done)
//! - `BoundedConcurrentQueue`: non-blocking, capacity-bounded, read/write close lock
//! - `ClosableBlockingQueue`: blocking add/poll with a timeout, woken by close
//!
//! A queue is *done* once it is closed **and** drained. Consumers loop on
//! `!queue.is_done()`; producers stop once `add` returns `false` and
//! `is_closed()` is true.

pub mod blocking;
pub mod bounded;
pub mod queue;

pub use blocking::ClosableBlockingQueue;
pub use bounded::BoundedConcurrentQueue;
pub use queue::ClosableQueue;
