//! Non-blocking bounded queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::queue::ClosableQueue;

/// Capacity-bounded FIFO queue that never blocks.
///
/// Producers take the read side of `close_lock`, so any number of them can add
/// concurrently; `close()` takes the write side and therefore waits for every
/// in-flight `add` to land before flipping the flag. After `close()` returns no
/// `add` can succeed, which is what makes `is_done()` trustworthy for
/// consumers.
///
/// `size` is tracked next to the items so `len()`/`is_done()` never touch the
/// item lock. A slot is reserved in `size` before the push, so `size` may
/// briefly exceed the number of poppable items, never the reverse.
#[derive(Debug)]
pub struct BoundedConcurrentQueue<T> {
    items: Mutex<VecDeque<T>>,
    size: AtomicUsize,
    capacity: usize,
    closed: AtomicBool,
    close_lock: RwLock<()>,
}

impl<T> BoundedConcurrentQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            size: AtomicUsize::new(0),
            capacity,
            closed: AtomicBool::new(false),
            close_lock: RwLock::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn reserve_slot(&self) -> bool {
        self.size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok()
    }
}

impl<T> ClosableQueue<T> for BoundedConcurrentQueue<T> {
    fn add(&self, item: T) -> bool {
        let _read = self.close_lock.read().unwrap_or_else(PoisonError::into_inner);

        if self.closed.load(Ordering::Acquire) || !self.reserve_slot() {
            return false;
        }

        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(item);
        true
    }

    fn poll(&self) -> Option<T> {
        let item = self
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()?;
        self.size.fetch_sub(1, Ordering::AcqRel);
        Some(item)
    }

    fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        let _write = self.close_lock.write().unwrap_or_else(PoisonError::into_inner);
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(remaining = self.len(), "bounded queue closed");
        }
    }
}
