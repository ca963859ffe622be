//! Buffered audit trail persisting to rollover indices.
//!
//! Recording an event is a short, non-blocking push onto a bounded queue.
//! A background task drains the queue in batches, routes each event to the
//! index for its timestamp, and writes the batch with retries:
//!
//! ```text
//! record() ──► queue (bounded) ──► consumer task ──► bulk_index per index
//!                  │                    │                 │
//!                  └─ full: drop+warn   └─ every flush    └─ transient error:
//!                                          interval or       backoff and retry,
//!                                          full batch        then drop+error
//! ```
//!
//! Document ids are ULIDs assigned when the event is queued, so a retried
//! batch rewrites the same ids and the store's append-only semantics keep
//! each event exactly once.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;
use ulid::{Generator, Ulid};

use vigil_core::observability::audit_span;

use crate::error::{AuditError, Result};
use crate::event::{AuditEvent, AuditEventType};
use crate::index_name::resolve;
use crate::metrics::{self, DropReason};
use crate::service::AuditTrail;
use crate::settings::IndexSettings;
use crate::store::IndexStore;

/// Upper bound of the retry backoff.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Lifecycle state of an [`IndexAuditTrail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailState {
    /// Created, consumer not running. Events are queued.
    Initialized,
    /// `start()` in progress.
    Starting,
    /// Consumer running.
    Started,
    /// `stop()` in progress. New events are rejected.
    Stopping,
    /// Consumer finished.
    Stopped,
    /// Startup failed.
    Failed,
}

impl TrailState {
    const fn accepts_events(self) -> bool {
        matches!(self, Self::Initialized | Self::Starting | Self::Started)
    }
}

impl fmt::Display for TrailState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initialized => "initialized",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone)]
struct QueuedEvent {
    id: Ulid,
    event: AuditEvent,
}

/// Queue and lifecycle state, guarded together so a state change and the
/// final drain cannot interleave with a push.
struct Shared {
    state: TrailState,
    pending: VecDeque<QueuedEvent>,
    in_flight: Vec<QueuedEvent>,
    ids: Generator,
}

struct Inner {
    store: Arc<dyn IndexStore>,
    settings: IndexSettings,
    node_name: String,
    events: BTreeSet<AuditEventType>,
    shared: Mutex<Shared>,
    known_indices: Mutex<HashSet<String>>,
    batch_ready: Notify,
}

/// Audit trail writing to an [`IndexStore`].
pub struct IndexAuditTrail {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for IndexAuditTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexAuditTrail")
            .field("node_name", &self.inner.node_name)
            .field("prefix", &self.inner.settings.prefix)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl IndexAuditTrail {
    /// Creates a trail in the `Initialized` state.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSettings` if `settings` do not validate.
    pub fn new(
        store: Arc<dyn IndexStore>,
        settings: IndexSettings,
        node_name: impl Into<String>,
    ) -> Result<Self> {
        settings.validate()?;
        let (shutdown, _) = watch::channel(false);
        let events = settings.events.effective();
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                node_name: node_name.into(),
                events,
                shared: Mutex::new(Shared {
                    state: TrailState::Initialized,
                    pending: VecDeque::with_capacity(settings.bulk_size),
                    in_flight: Vec::new(),
                    ids: Generator::new(),
                }),
                settings,
                known_indices: Mutex::new(HashSet::new()),
                batch_ready: Notify::new(),
            }),
            shutdown,
            consumer: Mutex::new(None),
        })
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TrailState {
        self.inner.lock_shared().map_or(TrailState::Failed, |s| s.state)
    }

    /// Returns the index settings.
    #[must_use]
    pub fn settings(&self) -> &IndexSettings {
        &self.inner.settings
    }

    /// Returns a copy of the oldest event not yet persisted.
    ///
    /// Events being written stay visible until their batch completes, so
    /// `None` means everything recorded so far has been handled.
    #[must_use]
    pub fn peek(&self) -> Option<AuditEvent> {
        let shared = self.inner.lock_shared().ok()?;
        shared
            .in_flight
            .first()
            .or_else(|| shared.pending.front())
            .map(|queued| queued.event.clone())
    }

    /// Returns the number of events queued or being written.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner
            .lock_shared()
            .map_or(0, |s| s.pending.len() + s.in_flight.len())
    }

    /// Creates the current index and spawns the consumer task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Lifecycle` if the trail was already started or was stopped
    /// while starting, or the store error if the index cannot be created
    /// (the trail is then `Failed`).
    pub async fn start(&self) -> Result<()> {
        self.inner.transition(TrailState::Initialized, TrailState::Starting)?;

        let index = resolve(
            &self.inner.settings.prefix,
            Utc::now(),
            self.inner.settings.rollover,
        );
        if let Err(err) = self.inner.ensure_index(&index).await {
            tracing::error!(index, error = %err, "failed to start index audit trail");
            let _ = self.inner.transition(TrailState::Starting, TrailState::Failed);
            return Err(err);
        }

        let inner = Arc::clone(&self.inner);
        let shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(
            async move { inner.run(shutdown).await }
                .instrument(audit_span("consume", &self.inner.settings.prefix)),
        );
        if let Ok(mut consumer) = self.consumer.lock() {
            *consumer = Some(handle);
        }

        // stop() ran while the index was being created
        if let Err(err) = self.inner.transition(TrailState::Starting, TrailState::Started) {
            let handle = self.consumer.lock().ok().and_then(|mut c| c.take());
            if let Some(handle) = handle {
                let _ = self.shutdown.send(true);
                if let Err(join) = handle.await {
                    tracing::error!(error = %join, "index audit trail consumer panicked");
                }
            }
            tracing::warn!(error = %err, "index audit trail stopped during startup");
            return Err(err);
        }
        tracing::info!(
            prefix = %self.inner.settings.prefix,
            rollover = %self.inner.settings.rollover,
            "index audit trail started"
        );
        Ok(())
    }

    /// Stops accepting events, flushes the queue and joins the consumer.
    ///
    /// Stopping a stopped trail is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Lifecycle` if another `stop()` is in progress.
    pub async fn stop(&self) -> Result<()> {
        let previous = {
            let mut shared = self.inner.lock_shared()?;
            let previous = shared.state;
            match previous {
                TrailState::Stopped => return Ok(()),
                TrailState::Stopping => {
                    return Err(AuditError::Lifecycle {
                        state: previous.to_string(),
                    });
                }
                _ => shared.state = TrailState::Stopping,
            }
            previous
        };

        let handle = self.consumer.lock().ok().and_then(|mut c| c.take());
        if let Some(handle) = handle {
            let _ = self.shutdown.send(true);
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "index audit trail consumer panicked");
            }
        } else {
            // never started: drain inline
            self.inner.flush_all().await;
        }

        self.inner.set_state(TrailState::Stopped);
        tracing::info!(from = %previous, "index audit trail stopped");
        Ok(())
    }

    /// Queues an event for indexing without blocking.
    ///
    /// Returns false if the event was dropped or its type is not audited by
    /// this trail.
    pub fn enqueue(&self, event: AuditEvent) -> bool {
        self.inner.enqueue(event)
    }
}

impl Drop for IndexAuditTrail {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

impl AuditTrail for IndexAuditTrail {
    fn name(&self) -> &str {
        "index"
    }

    fn node_name(&self) -> &str {
        &self.inner.node_name
    }

    fn accepts(&self, event_type: AuditEventType) -> bool {
        self.inner.events.contains(&event_type)
    }

    fn record(&self, event: AuditEvent) {
        self.inner.enqueue(event);
    }
}

impl Inner {
    fn lock_shared(&self) -> Result<MutexGuard<'_, Shared>> {
        self.shared
            .lock()
            .map_err(|_| AuditError::storage("audit queue lock poisoned"))
    }

    fn set_state(&self, state: TrailState) {
        if let Ok(mut shared) = self.lock_shared() {
            shared.state = state;
        }
    }

    fn transition(&self, from: TrailState, to: TrailState) -> Result<()> {
        let mut shared = self.lock_shared()?;
        if shared.state != from {
            return Err(AuditError::Lifecycle {
                state: shared.state.to_string(),
            });
        }
        shared.state = to;
        Ok(())
    }

    fn enqueue(&self, event: AuditEvent) -> bool {
        let event_type = event.event_type;
        if !self.events.contains(&event_type) {
            tracing::debug!(%event_type, "event type not audited by index trail");
            return false;
        }

        let Ok(mut shared) = self.lock_shared() else {
            metrics::record_dropped(DropReason::NotRunning, 1);
            return false;
        };

        if !shared.state.accepts_events() {
            let state = shared.state;
            drop(shared);
            tracing::debug!(%state, %event_type, "index audit trail not accepting events");
            metrics::record_dropped(DropReason::NotRunning, 1);
            return false;
        }

        if shared.pending.len() >= self.settings.queue_max_size {
            drop(shared);
            tracing::warn!(
                %event_type,
                queue_max_size = self.settings.queue_max_size,
                "audit queue is full, dropping event"
            );
            metrics::record_dropped(DropReason::QueueFull, 1);
            return false;
        }

        let id = shared
            .ids
            .generate()
            .unwrap_or_else(|_| Ulid::new());
        shared.pending.push_back(QueuedEvent { id, event });
        let batch_ready = shared.pending.len() >= self.settings.bulk_size;
        drop(shared);

        metrics::record_enqueued(event_type);
        if batch_ready {
            self.batch_ready.notify_one();
        }
        true
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.flush_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = self.batch_ready.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            self.flush_all().await;
        }

        self.flush_all().await;
        tracing::debug!("index audit trail consumer exited");
    }

    /// Writes batches until the queue is empty.
    async fn flush_all(&self) {
        loop {
            let batch = match self.lock_shared() {
                Ok(mut shared) => {
                    let take = shared.pending.len().min(self.settings.bulk_size);
                    let batch: Vec<QueuedEvent> = shared.pending.drain(..take).collect();
                    shared.in_flight.clone_from(&batch);
                    batch
                }
                Err(err) => {
                    tracing::error!(error = %err, "cannot drain audit queue");
                    return;
                }
            };
            if batch.is_empty() {
                return;
            }

            self.write_batch(batch).await;

            if let Ok(mut shared) = self.lock_shared() {
                shared.in_flight.clear();
            }
        }
    }

    async fn write_batch(&self, batch: Vec<QueuedEvent>) {
        let mut by_index: BTreeMap<String, Vec<(String, Value)>> = BTreeMap::new();
        for queued in batch {
            let index = resolve(
                &self.settings.prefix,
                queued.event.timestamp,
                self.settings.rollover,
            );
            match queued.event.to_document() {
                Ok(document) => by_index
                    .entry(index)
                    .or_default()
                    .push((queued.id.to_string(), document)),
                Err(err) => {
                    tracing::error!(id = %queued.id, error = %err, "cannot serialize audit event");
                    metrics::record_dropped(DropReason::RetriesExhausted, 1);
                }
            }
        }

        for (index, documents) in by_index {
            self.write_with_retry(&index, documents)
                .instrument(audit_span("bulk", &index))
                .await;
        }
    }

    async fn write_with_retry(&self, index: &str, documents: Vec<(String, Value)>) {
        let count = documents.len();
        let mut backoff = self.settings.retry_backoff();
        let mut attempt: u32 = 0;

        loop {
            let started = Instant::now();
            let result = match self.ensure_index(index).await {
                Ok(()) => self.store.bulk_index(index, documents.clone()).await,
                Err(err) => Err(err),
            };

            match result {
                Ok(response) => {
                    metrics::record_bulk_written(
                        index,
                        response.created as u64,
                        started.elapsed().as_secs_f64(),
                    );
                    tracing::debug!(
                        index,
                        created = response.created,
                        duplicates = response.duplicates,
                        attempt,
                        "audit batch written"
                    );
                    return;
                }
                Err(err) => {
                    metrics::record_bulk_failure(index);
                    if !err.is_transient() || attempt >= self.settings.max_retries {
                        tracing::error!(
                            index,
                            events = count,
                            attempts = attempt + 1,
                            error = %err,
                            "dropping audit batch"
                        );
                        metrics::record_dropped(DropReason::RetriesExhausted, count as u64);
                        return;
                    }
                    attempt += 1;
                    tracing::warn!(
                        index,
                        attempt,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "audit batch write failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_RETRY_BACKOFF);
                }
            }
        }
    }

    async fn ensure_index(&self, index: &str) -> Result<()> {
        let known = self
            .known_indices
            .lock()
            .map(|k| k.contains(index))
            .unwrap_or(false);
        if known {
            return Ok(());
        }
        self.store.create_index(index).await?;
        if let Ok(mut k) = self.known_indices.lock() {
            k.insert(index.to_string());
        }
        Ok(())
    }
}
