//! Blocking bounded queue with timeouts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::queue::ClosableQueue;

/// Default time `add`/`poll` wait for space or data.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded FIFO queue whose `add` and `poll` block up to a timeout.
///
/// The closed flag lives under the same mutex as the items, so an `add` and a
/// `close` are strictly ordered: an `add` that observes the queue open has
/// pushed before `close` can acquire the lock. `close` wakes every waiter.
#[derive(Debug)]
pub struct ClosableBlockingQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    size: AtomicUsize,
    capacity: usize,
    timeout: Duration,
}

impl<T> ClosableBlockingQueue<T> {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            size: AtomicUsize::new(0),
            capacity,
            timeout,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, DEFAULT_WAIT_TIMEOUT)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait on `cvar` until `deadline`. Returns `None` once the deadline passed.
    fn wait_until<'a>(
        &self,
        cvar: &Condvar,
        guard: MutexGuard<'a, State<T>>,
        deadline: Instant,
    ) -> Option<MutexGuard<'a, State<T>>> {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        let (guard, _) = cvar
            .wait_timeout(guard, remaining)
            .unwrap_or_else(PoisonError::into_inner);
        Some(guard)
    }
}

impl<T> ClosableQueue<T> for ClosableBlockingQueue<T> {
    /// Blocks while the queue is full, for at most the configured timeout.
    fn add(&self, item: T) -> bool {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.lock();

        loop {
            if state.closed {
                return false;
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                self.size.fetch_add(1, Ordering::AcqRel);
                self.not_empty.notify_one();
                return true;
            }
            state = match self.wait_until(&self.not_full, state, deadline) {
                Some(s) => s,
                None => return false,
            };
        }
    }

    /// Blocks while the queue is empty and open, for at most the configured
    /// timeout. Returns `None` immediately once the queue is done.
    fn poll(&self) -> Option<T> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.lock();

        loop {
            if let Some(item) = state.items.pop_front() {
                self.size.fetch_sub(1, Ordering::AcqRel);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self.wait_until(&self.not_empty, state, deadline)?;
        }
    }

    fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            state.closed = true;
            debug!(remaining = state.items.len(), "blocking queue closed");
        }
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}
