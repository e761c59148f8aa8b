//! Buffered, periodically flushed checkpoint persister.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use syncplane_core::ConnectionId;
use syncplane_scheduling::BackoffPolicy;

use super::aggregator::StateAggregator;
use super::api::{StateApi, StateApiError};
use super::state::{ConnectionState, StateMessage, StateType, StreamDescriptor};

/// Upper bound of the close-path retry delay, in multiples of the retry interval.
const FINAL_FLUSH_MAX_BACKOFF_FACTOR: u32 = 32;
/// Jitter added on top of each close-path retry delay (fraction of the delay).
const FINAL_FLUSH_JITTER: f64 = 0.1;

/// Persister configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncPersistenceConfig {
    /// Interval between periodic flushes
    pub flush_period: Duration,
    /// Delay before the first periodic flush
    pub initial_delay: Duration,
    /// How long `close` waits for an in-flight flush
    pub termination_timeout: Duration,
    /// Attempts of the close-path flush
    pub final_flush_attempts: u32,
    /// Base delay between close-path attempts
    pub final_flush_retry_interval: Duration,
}

impl Default for SyncPersistenceConfig {
    fn default() -> Self {
        Self {
            flush_period: Duration::from_secs(10),
            initial_delay: Duration::ZERO,
            termination_timeout: Duration::from_secs(60),
            final_flush_attempts: 5,
            final_flush_retry_interval: Duration::from_secs(1),
        }
    }
}

/// What the running sync is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub connection_id: ConnectionId,
    pub job_id: Option<i64>,
    pub attempt_number: Option<u32>,
    /// Streams that must carry state after a legacy-to-stream migration.
    pub incremental_streams: Vec<StreamDescriptor>,
}

impl ConnectionContext {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            job_id: None,
            attempt_number: None,
            incremental_streams: Vec::new(),
        }
    }

    pub fn with_attempt(mut self, job_id: i64, attempt_number: u32) -> Self {
        self.job_id = Some(job_id);
        self.attempt_number = Some(attempt_number);
        self
    }

    pub fn with_incremental_streams(mut self, streams: Vec<StreamDescriptor>) -> Self {
        self.incremental_streams = streams;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    #[error("invalid connection id {actual}, expected {expected}")]
    ConnectionMismatch {
        expected: ConnectionId,
        actual: ConnectionId,
    },
    #[error("persister is closed")]
    Closed,
    #[error("connection context is required to validate a state migration")]
    MissingConnectionContext,
    #[error(
        "sync ran during a migration from legacy to per-stream state and stream '{0}' has no state; \
         the job must be retried to store state properly"
    )]
    MissingStreamState(StreamDescriptor),
    #[error(transparent)]
    Api(#[from] StateApiError),
}

/// Result of [`SyncPersistence::close`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    NothingToFlush,
    Flushed { attempts: u32 },
    /// The in-flight flush did not finish in time; no final flush was attempted.
    DrainTimedOut,
    FinalFlushFailed(StateApiError),
    MigrationValidationFailed(PersistenceError),
}

#[derive(Debug)]
struct Flusher {
    shutdown: mpsc::Sender<()>,
    done: mpsc::Receiver<()>,
    join: Option<thread::JoinHandle<()>>,
}

#[derive(Debug)]
enum FlusherSlot {
    Idle,
    Running(Flusher),
    Closed,
}

/// Captures the checkpoints of one connection's sync and persists them.
///
/// - `persist` never blocks on the remote store and never fails because of it
/// - one flusher thread per persister, started by the first `persist`
/// - a failed periodic flush is merged into the next one, never dropped
/// - `close` is the only path that retries a flush
pub struct SyncPersistence {
    inner: Arc<Inner>,
    slot: Mutex<FlusherSlot>,
}

struct Inner {
    api: Arc<dyn StateApi>,
    config: SyncPersistenceConfig,
    connection_id: OnceLock<ConnectionId>,
    context: Mutex<Option<ConnectionContext>>,
    buffer: Mutex<StateAggregator>,
    /// Swapped-out buffer whose flush has not succeeded yet.
    pending: Mutex<Option<StateAggregator>>,
    only_flush_at_end: AtomicBool,
    last_flush: Mutex<Option<DateTime<Utc>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncPersistence {
    pub fn new(api: Arc<dyn StateApi>, config: SyncPersistenceConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                config,
                connection_id: OnceLock::new(),
                context: Mutex::new(None),
                buffer: Mutex::new(StateAggregator::new()),
                pending: Mutex::new(None),
                only_flush_at_end: AtomicBool::new(false),
                last_flush: Mutex::new(None),
            }),
            slot: Mutex::new(FlusherSlot::Idle),
        }
    }

    pub fn config(&self) -> &SyncPersistenceConfig {
        &self.inner.config
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.inner.connection_id.get().copied()
    }

    pub fn set_connection_context(&self, context: ConnectionContext) -> Result<(), PersistenceError> {
        self.bind(context.connection_id)?;
        *lock(&self.inner.context) = Some(context);
        Ok(())
    }

    /// Buffer a checkpoint of `connection_id`.
    ///
    /// The first call binds the persister to `connection_id`; a later call with
    /// another id is rejected. Remote store failures never surface here.
    pub fn persist(
        &self,
        connection_id: ConnectionId,
        message: StateMessage,
    ) -> Result<(), PersistenceError> {
        let mut slot = lock(&self.slot);
        if matches!(*slot, FlusherSlot::Closed) {
            return Err(PersistenceError::Closed);
        }
        self.bind(connection_id)?;

        let incoming = message.state_type();
        lock(&self.inner.buffer).ingest(message);
        self.start_background_flush(&mut slot, connection_id, incoming);
        Ok(())
    }

    /// Whether a legacy-to-stream migration deferred every flush to `close`.
    pub fn is_flushing_only_at_end(&self) -> bool {
        self.inner.only_flush_at_end.load(Ordering::Acquire)
    }

    pub fn is_flusher_running(&self) -> bool {
        matches!(*lock(&self.slot), FlusherSlot::Running(_))
    }

    pub fn last_successful_flush(&self) -> Option<DateTime<Utc>> {
        *lock(&self.inner.last_flush)
    }

    /// Stop the flusher and persist what is left.
    ///
    /// Waits up to `termination_timeout` for an in-flight flush. If it does
    /// not finish, no final flush is attempted (it could race the in-flight
    /// write) and the most recent checkpoints may be lost.
    pub fn close(&self) -> CloseOutcome {
        let previous = std::mem::replace(&mut *lock(&self.slot), FlusherSlot::Closed);

        if let FlusherSlot::Running(mut flusher) = previous {
            let _ = flusher.shutdown.send(());
            match flusher.done.recv_timeout(self.inner.config.termination_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if let Some(join) = flusher.join.take() {
                        let _ = join.join();
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        connection_id = ?self.connection_id(),
                        timeout = ?self.inner.config.termination_timeout,
                        "pending persist operation took too long to complete, most recent states may have been lost"
                    );
                    return CloseOutcome::DrainTimedOut;
                }
            }
        }

        let Some(connection_id) = self.connection_id() else {
            return CloseOutcome::NothingToFlush;
        };
        if !self.inner.has_states_to_flush() {
            return CloseOutcome::NothingToFlush;
        }

        let mut pending = self.inner.prepare_for_flush();

        if self.is_flushing_only_at_end() {
            if let Err(err) = self.inner.validate_stream_migration(pending.as_ref()) {
                error!(connection_id = %connection_id, error = %err, "state migration validation failed, final flush skipped");
                return CloseOutcome::MigrationValidationFailed(err);
            }
        }

        self.inner.final_flush(connection_id, &mut pending)
    }

    fn bind(&self, connection_id: ConnectionId) -> Result<(), PersistenceError> {
        let bound = *self.inner.connection_id.get_or_init(|| connection_id);
        if bound != connection_id {
            return Err(PersistenceError::ConnectionMismatch {
                expected: bound,
                actual: connection_id,
            });
        }
        Ok(())
    }

    fn start_background_flush(
        &self,
        slot: &mut FlusherSlot,
        connection_id: ConnectionId,
        incoming: StateType,
    ) {
        if !matches!(slot, FlusherSlot::Idle) || self.is_flushing_only_at_end() {
            return;
        }

        let current = match self.inner.api.get_state(connection_id) {
            Ok(current) => current,
            Err(err) => {
                warn!(
                    connection_id = %connection_id,
                    error = %err,
                    "failed to check current state, it will be retried next time a state is persisted"
                );
                return;
            }
        };

        if is_migration(current.as_ref(), incoming) && incoming == StateType::Stream {
            info!(
                connection_id = %connection_id,
                "state type migration from LEGACY to STREAM detected, all states will be persisted at the end of the sync"
            );
            self.inner.only_flush_at_end.store(true, Ordering::Release);
            return;
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let inner = self.inner.clone();

        match thread::Builder::new()
            .name("state-flush".to_string())
            .spawn(move || run_flusher(inner, connection_id, shutdown_rx, done_tx))
        {
            Ok(join) => {
                info!(connection_id = %connection_id, "starting state flush thread");
                *slot = FlusherSlot::Running(Flusher {
                    shutdown: shutdown_tx,
                    done: done_rx,
                    join: Some(join),
                });
            }
            Err(err) => {
                error!(
                    connection_id = %connection_id,
                    error = %err,
                    "failed to spawn state flush thread, it will be retried on the next persist"
                );
            }
        }
    }
}

impl std::fmt::Debug for SyncPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPersistence")
            .field("connection_id", &self.connection_id())
            .field("config", &self.inner.config)
            .field("only_flush_at_end", &self.is_flushing_only_at_end())
            .finish_non_exhaustive()
    }
}

fn is_migration(current: Option<&ConnectionState>, incoming: StateType) -> bool {
    current.is_some_and(|s| !s.is_empty() && s.state_type() == StateType::Legacy)
        && incoming != StateType::Legacy
}

fn run_flusher(
    inner: Arc<Inner>,
    connection_id: ConnectionId,
    shutdown_rx: mpsc::Receiver<()>,
    done_tx: mpsc::Sender<()>,
) {
    let mut wait = inner.config.initial_delay;

    loop {
        match shutdown_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        inner.flush_cycle(connection_id);
        wait = inner.config.flush_period;
    }

    debug!(connection_id = %connection_id, "state flush thread stopped");
    let _ = done_tx.send(());
}

impl Inner {
    fn has_states_to_flush(&self) -> bool {
        !lock(&self.buffer).is_empty() || lock(&self.pending).is_some()
    }

    /// Swap the buffer out and merge it into the pending one.
    fn prepare_for_flush(&self) -> MutexGuard<'_, Option<StateAggregator>> {
        let fresh = std::mem::take(&mut *lock(&self.buffer));
        let mut pending = lock(&self.pending);
        match pending.as_mut() {
            Some(previous) => previous.ingest_all(fresh),
            None => *pending = Some(fresh),
        }
        pending
    }

    /// Upsert the pending state. Returns `Ok(false)` when there was nothing to
    /// write. The pending state is only cleared on success.
    fn flush_pending(
        &self,
        connection_id: ConnectionId,
        pending: &mut Option<StateAggregator>,
    ) -> Result<bool, StateApiError> {
        let Some(state) = pending.as_ref().and_then(StateAggregator::aggregated) else {
            *pending = None;
            return Ok(false);
        };

        self.api.upsert_state(connection_id, &state)?;
        *pending = None;
        *lock(&self.last_flush) = Some(Utc::now());
        Ok(true)
    }

    /// One periodic cycle. Failures are logged and left for the next cycle.
    fn flush_cycle(&self, connection_id: ConnectionId) {
        let mut pending = self.prepare_for_flush();
        match self.flush_pending(connection_id, &mut pending) {
            Ok(true) => debug!(connection_id = %connection_id, "persisted state"),
            Ok(false) => {}
            Err(err) => warn!(
                connection_id = %connection_id,
                error = %err,
                "failed to persist state, it will be retried as part of the next flush"
            ),
        }
    }

    fn validate_stream_migration(
        &self,
        pending: Option<&StateAggregator>,
    ) -> Result<(), PersistenceError> {
        let Some(state) = pending.and_then(StateAggregator::aggregated) else {
            return Ok(());
        };
        if state.state_type() != StateType::Stream {
            return Ok(());
        }

        let context = lock(&self.context);
        let context = context
            .as_ref()
            .ok_or(PersistenceError::MissingConnectionContext)?;
        match context
            .incremental_streams
            .iter()
            .find(|s| state.stream_data(s).is_none())
        {
            Some(missing) => Err(PersistenceError::MissingStreamState(missing.clone())),
            None => Ok(()),
        }
    }

    fn final_flush(
        &self,
        connection_id: ConnectionId,
        pending: &mut Option<StateAggregator>,
    ) -> CloseOutcome {
        let attempts = self.config.final_flush_attempts.max(1);
        let interval = self.config.final_flush_retry_interval;
        let backoff = BackoffPolicy::new(
            interval,
            interval.saturating_mul(FINAL_FLUSH_MAX_BACKOFF_FACTOR),
            2,
        );

        let mut attempt = 1;
        loop {
            match self.flush_pending(connection_id, pending) {
                Ok(true) => {
                    info!(connection_id = %connection_id, attempt, "final state flush succeeded");
                    return CloseOutcome::Flushed { attempts: attempt };
                }
                Ok(false) => return CloseOutcome::NothingToFlush,
                Err(err) if attempt >= attempts => {
                    error!(
                        connection_id = %connection_id,
                        attempts,
                        error = %err,
                        "final state flush failed, most recent states were not persisted"
                    );
                    return CloseOutcome::FinalFlushFailed(err);
                }
                Err(err) => {
                    let delay = match &backoff {
                        Ok(policy) => policy.get_backoff(attempt),
                        Err(_) => interval,
                    };
                    warn!(
                        connection_id = %connection_id,
                        attempt,
                        error = %err,
                        "final state flush failed, retrying"
                    );
                    thread::sleep(with_jitter(delay, attempt));
                    attempt += 1;
                }
            }
        }
    }
}

/// Deterministic jitter in `[0, FINAL_FLUSH_JITTER * delay)`.
fn with_jitter(delay: Duration, attempt: u32) -> Duration {
    let pseudo_random = f64::from(attempt.wrapping_mul(17) % 100) / 100.0;
    let jitter = delay.as_secs_f64() * FINAL_FLUSH_JITTER * pseudo_random;
    delay.saturating_add(Duration::try_from_secs_f64(jitter).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::api::InMemoryStateApi;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn stream(name: &str, cursor: i64) -> StateMessage {
        StateMessage::stream(StreamDescriptor::new(name), json!({ "cursor": cursor }))
    }

    /// Periodic flushing effectively disabled; tests drive cycles by hand.
    fn manual_config() -> SyncPersistenceConfig {
        SyncPersistenceConfig {
            flush_period: Duration::from_secs(3_600),
            initial_delay: Duration::from_secs(3_600),
            termination_timeout: Duration::from_secs(5),
            final_flush_attempts: 3,
            final_flush_retry_interval: Duration::from_millis(1),
        }
    }

    fn persister(config: SyncPersistenceConfig) -> (SyncPersistence, Arc<InMemoryStateApi>) {
        syncplane_observability::init_for_tests();
        let api = InMemoryStateApi::arc();
        (SyncPersistence::new(api.clone(), config), api)
    }

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn two_persists_before_a_flush_are_written_once_merged() {
        let (p, api) = persister(manual_config());
        let id = ConnectionId::new();

        p.persist(id, stream("a", 1)).unwrap();
        p.persist(id, stream("b", 1)).unwrap();
        p.persist(id, stream("a", 2)).unwrap();
        assert!(p.is_flusher_running());

        p.inner.flush_cycle(id);
        p.inner.flush_cycle(id);

        let writes = api.writes();
        assert_eq!(writes.len(), 1);
        let (written_id, state) = &writes[0];
        assert_eq!(*written_id, id);
        assert_eq!(state.stream_data(&StreamDescriptor::new("a")), Some(&json!({"cursor": 2})));
        assert_eq!(state.stream_data(&StreamDescriptor::new("b")), Some(&json!({"cursor": 1})));
        assert!(p.last_successful_flush().is_some());

        assert_eq!(p.close(), CloseOutcome::NothingToFlush);
    }

    #[test]
    fn rebinding_to_another_connection_is_rejected() {
        let (p, _) = persister(manual_config());
        let id = ConnectionId::new();
        let other = ConnectionId::new();

        p.persist(id, stream("a", 1)).unwrap();
        assert_eq!(
            p.persist(other, stream("a", 2)),
            Err(PersistenceError::ConnectionMismatch {
                expected: id,
                actual: other
            })
        );
        assert!(matches!(
            p.set_connection_context(ConnectionContext::new(other)),
            Err(PersistenceError::ConnectionMismatch { .. })
        ));
        assert_eq!(p.connection_id(), Some(id));
        p.close();
    }

    #[test]
    fn failed_flush_is_merged_into_the_next_one() {
        let (p, api) = persister(manual_config());
        let id = ConnectionId::new();

        api.fail_next_upserts(1);
        p.persist(id, stream("a", 1)).unwrap();
        p.inner.flush_cycle(id);
        assert!(api.writes().is_empty());

        p.persist(id, stream("b", 7)).unwrap();
        p.inner.flush_cycle(id);

        let writes = api.writes();
        assert_eq!(writes.len(), 1);
        let state = &writes[0].1;
        assert_eq!(state.stream_data(&StreamDescriptor::new("a")), Some(&json!({"cursor": 1})));
        assert_eq!(state.stream_data(&StreamDescriptor::new("b")), Some(&json!({"cursor": 7})));
        assert_eq!(api.upsert_calls(), 2);
        p.close();
    }

    #[test]
    fn close_flushes_what_a_failed_cycle_left_behind() {
        let (p, api) = persister(manual_config());
        let id = ConnectionId::new();

        api.fail_next_upserts(1);
        p.persist(id, stream("a", 1)).unwrap();
        p.inner.flush_cycle(id);

        assert_eq!(p.close(), CloseOutcome::Flushed { attempts: 1 });
        assert_eq!(api.writes().len(), 1);
    }

    #[test]
    fn close_retries_the_final_flush() {
        let (p, api) = persister(manual_config());
        let id = ConnectionId::new();

        p.persist(id, stream("a", 1)).unwrap();
        api.fail_next_upserts(2);

        assert_eq!(p.close(), CloseOutcome::Flushed { attempts: 3 });
        assert_eq!(api.upsert_calls(), 3);
        assert_eq!(api.writes().len(), 1);
    }

    #[test]
    fn close_reports_exhausted_final_flush() {
        let (p, api) = persister(SyncPersistenceConfig {
            final_flush_attempts: 2,
            ..manual_config()
        });
        let id = ConnectionId::new();

        p.persist(id, stream("a", 1)).unwrap();
        api.fail_next_upserts(10);

        assert!(matches!(
            p.close(),
            CloseOutcome::FinalFlushFailed(StateApiError::Unavailable(_))
        ));
        assert_eq!(api.upsert_calls(), 2);
        assert!(api.writes().is_empty());
    }

    #[test]
    fn close_without_data_has_nothing_to_flush() {
        let (p, api) = persister(manual_config());
        assert_eq!(p.close(), CloseOutcome::NothingToFlush);
        assert_eq!(p.close(), CloseOutcome::NothingToFlush);
        assert_eq!(api.upsert_calls(), 0);
    }

    #[test]
    fn persist_after_close_is_rejected() {
        let (p, _) = persister(manual_config());
        p.close();
        assert_eq!(
            p.persist(ConnectionId::new(), stream("a", 1)),
            Err(PersistenceError::Closed)
        );
    }

    #[test]
    fn periodic_flush_runs_on_its_own() {
        let (p, api) = persister(SyncPersistenceConfig {
            flush_period: Duration::from_millis(20),
            initial_delay: Duration::ZERO,
            ..manual_config()
        });
        let id = ConnectionId::new();

        p.persist(id, stream("a", 1)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || !api.writes().is_empty()));

        p.persist(id, stream("a", 2)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || api.writes().len() >= 2));

        assert_eq!(p.close(), CloseOutcome::NothingToFlush);
        let (_, last) = api.writes().pop().unwrap();
        assert_eq!(last.stream_data(&StreamDescriptor::new("a")), Some(&json!({"cursor": 2})));
    }

    /// Upserts block long enough to outlive a short termination timeout.
    struct SlowApi {
        inner: InMemoryStateApi,
        entered: AtomicUsize,
        delay: Duration,
    }

    impl StateApi for SlowApi {
        fn get_state(
            &self,
            connection_id: ConnectionId,
        ) -> Result<Option<ConnectionState>, StateApiError> {
            self.inner.get_state(connection_id)
        }

        fn upsert_state(
            &self,
            connection_id: ConnectionId,
            state: &ConnectionState,
        ) -> Result<(), StateApiError> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.inner.upsert_state(connection_id, state)
        }
    }

    #[test]
    fn close_gives_up_when_the_in_flight_flush_is_too_slow() {
        let api = Arc::new(SlowApi {
            inner: InMemoryStateApi::new(),
            entered: AtomicUsize::new(0),
            delay: Duration::from_millis(300),
        });
        let p = SyncPersistence::new(
            api.clone(),
            SyncPersistenceConfig {
                initial_delay: Duration::ZERO,
                termination_timeout: Duration::from_millis(20),
                ..manual_config()
            },
        );
        let id = ConnectionId::new();

        p.persist(id, stream("a", 1)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || api.entered.load(Ordering::SeqCst) > 0));
        p.persist(id, stream("b", 1)).unwrap();

        assert_eq!(p.close(), CloseOutcome::DrainTimedOut);
        // No final flush raced the in-flight one.
        assert_eq!(api.entered.load(Ordering::SeqCst), 1);
    }

    fn seeded_legacy(api: &InMemoryStateApi, id: ConnectionId) {
        api.insert(id, ConnectionState::Legacy(json!({"cursor": 5})));
    }

    #[test]
    fn legacy_to_stream_migration_flushes_only_at_the_end() {
        let (p, api) = persister(manual_config());
        let id = ConnectionId::new();
        seeded_legacy(&api, id);
        p.set_connection_context(
            ConnectionContext::new(id)
                .with_attempt(42, 1)
                .with_incremental_streams(vec![StreamDescriptor::new("a"), StreamDescriptor::new("b")]),
        )
        .unwrap();

        p.persist(id, stream("a", 1)).unwrap();
        p.persist(id, stream("b", 1)).unwrap();
        assert!(p.is_flushing_only_at_end());
        assert!(!p.is_flusher_running());
        assert!(api.writes().is_empty());

        assert_eq!(p.close(), CloseOutcome::Flushed { attempts: 1 });
        let writes = api.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1.streams().count(), 2);
    }

    #[test]
    fn migration_missing_an_incremental_stream_is_not_persisted() {
        let (p, api) = persister(manual_config());
        let id = ConnectionId::new();
        seeded_legacy(&api, id);
        p.set_connection_context(
            ConnectionContext::new(id)
                .with_incremental_streams(vec![StreamDescriptor::new("a"), StreamDescriptor::new("b")]),
        )
        .unwrap();

        p.persist(id, stream("a", 1)).unwrap();

        assert_eq!(
            p.close(),
            CloseOutcome::MigrationValidationFailed(PersistenceError::MissingStreamState(
                StreamDescriptor::new("b")
            ))
        );
        assert_eq!(api.upsert_calls(), 0);
    }

    #[test]
    fn migration_without_context_is_not_persisted() {
        let (p, api) = persister(manual_config());
        let id = ConnectionId::new();
        seeded_legacy(&api, id);

        p.persist(id, stream("a", 1)).unwrap();
        assert_eq!(
            p.close(),
            CloseOutcome::MigrationValidationFailed(PersistenceError::MissingConnectionContext)
        );
    }

    #[test]
    fn legacy_to_global_is_not_deferred() {
        let (p, api) = persister(manual_config());
        let id = ConnectionId::new();
        seeded_legacy(&api, id);

        p.persist(id, StateMessage::global(json!({"v": 1}))).unwrap();
        assert!(!p.is_flushing_only_at_end());
        assert!(p.is_flusher_running());
        p.close();
    }

    #[test]
    fn empty_legacy_state_is_not_a_migration() {
        let (p, api) = persister(manual_config());
        let id = ConnectionId::new();
        api.insert(id, ConnectionState::Legacy(json!({})));

        p.persist(id, stream("a", 1)).unwrap();
        assert!(!p.is_flushing_only_at_end());
        assert!(p.is_flusher_running());
        p.close();
    }

    #[test]
    fn failed_state_check_defers_the_flusher_start() {
        let (p, api) = persister(manual_config());
        let id = ConnectionId::new();

        api.fail_reads(true);
        p.persist(id, stream("a", 1)).unwrap();
        assert!(!p.is_flusher_running());

        api.fail_reads(false);
        p.persist(id, stream("a", 2)).unwrap();
        assert!(p.is_flusher_running());

        assert_eq!(p.close(), CloseOutcome::Flushed { attempts: 1 });
    }

    #[test]
    fn concurrent_first_persists_start_one_flusher() {
        let (p, api) = persister(manual_config());
        let p = Arc::new(p);
        let id = ConnectionId::new();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let p = p.clone();
                thread::spawn(move || p.persist(id, stream(&format!("s{i}"), i)))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        assert!(p.is_flusher_running());
        assert_eq!(p.close(), CloseOutcome::Flushed { attempts: 1 });
        assert_eq!(api.writes()[0].1.streams().count(), 8);
    }

    #[test]
    fn jitter_is_bounded() {
        let delay = Duration::from_millis(1_000);
        for attempt in 0..200 {
            let d = with_jitter(delay, attempt);
            assert!(d >= delay);
            assert!(d <= Duration::from_millis(1_100));
        }
    }

    #[test]
    fn jitter_saturates_on_huge_delays() {
        assert_eq!(with_jitter(Duration::MAX, 3), Duration::MAX);
        let near_max = Duration::MAX - Duration::from_secs(1);
        assert!(with_jitter(near_max, 7) >= near_max);
    }
}
