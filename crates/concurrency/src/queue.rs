//! Queue contract shared by the bounded and blocking variants.

/// FIFO queue with explicit close semantics.
///
/// Invariants every implementation upholds:
/// - once `close()` has returned, no `add` succeeds;
/// - `is_done()` is `is_closed() && len() == 0`, and once true stays true;
/// - `len()` is O(1).
pub trait ClosableQueue<T> {
    /// Offer an item. Returns `false` when the queue is closed or full.
    fn add(&self, item: T) -> bool;

    /// Remove the head of the queue, if any.
    fn poll(&self) -> Option<T>;

    /// Number of items currently queued.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_closed(&self) -> bool;

    /// Closed and fully drained.
    fn is_done(&self) -> bool {
        self.is_closed() && self.is_empty()
    }

    /// Stop accepting new items. Idempotent.
    fn close(&self);
}
