//! Priority enrichment queue and worker pool
//!
//! Records that survive dedup land here for asynchronous enrichment
//! (geocoding backfill, photo lookup). The queue is an explicit handle
//! passed to whoever needs it; workers drain it highest-priority first,
//! FIFO within a priority. Failed attempts are re-queued after exponential
//! backoff until the attempt budget runs out, at which point the item moves
//! to the dead list for operator review. Dead items are never dropped.

use crate::clients::maps::{MapsError, MapsPlatform};
use crate::models::{QueueItem, QueuePriority};
use crate::store::PlaceStore;
use chrono::Utc;
use placelore_common::config::PipelineConfig;
use placelore_common::events::{EventBus, PipelineEvent};
use placelore_common::{Error, Result};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Cap on photo URLs attached to a record during enrichment
const MAX_PHOTOS: usize = 5;

/// Fallback poll interval for workers, guards against missed wakeups
const WORKER_POLL_MS: u64 = 250;

/// Enqueue rejection
#[derive(Debug, Error, PartialEq)]
pub enum EnqueueError {
    #[error("Enrichment queue is full (capacity {0})")]
    QueueFull(usize),
}

/// Point-in-time queue counters, serialized for the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub in_progress: usize,
    pub retry_wait: usize,
    pub done: u64,
    pub dead: usize,
}

#[derive(Default)]
struct QueueState {
    high: VecDeque<QueueItem>,
    medium: VecDeque<QueueItem>,
    low: VecDeque<QueueItem>,
    /// Records currently being enriched by a worker
    in_progress: HashSet<Uuid>,
    /// Records sleeping out a backoff delay before re-queueing
    retry_wait: HashSet<Uuid>,
    /// Records marked dead out-of-band while in flight or awaiting retry
    cancelled: HashSet<Uuid>,
    done: u64,
    dead: Vec<QueueItem>,
}

impl QueueState {
    fn lane(&mut self, priority: QueuePriority) -> &mut VecDeque<QueueItem> {
        match priority {
            QueuePriority::High => &mut self.high,
            QueuePriority::Medium => &mut self.medium,
            QueuePriority::Low => &mut self.low,
        }
    }

    fn queued(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    /// Total items the queue is responsible for (excluding done and dead)
    fn live(&self) -> usize {
        self.queued() + self.in_progress.len() + self.retry_wait.len()
    }

    fn holds(&self, record_id: Uuid) -> bool {
        self.in_progress.contains(&record_id)
            || self.retry_wait.contains(&record_id)
            || self
                .high
                .iter()
                .chain(self.medium.iter())
                .chain(self.low.iter())
                .any(|i| i.record_id == record_id)
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    max_attempts: u32,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
    shutdown: AtomicBool,
}

/// Bounded priority queue for enrichment work
///
/// Cheaply cloneable handle; all clones share the same queue.
#[derive(Clone)]
pub struct EnrichmentQueue {
    inner: Arc<QueueInner>,
}

impl EnrichmentQueue {
    pub fn new(capacity: usize, max_attempts: u32, backoff_base_ms: u64, backoff_cap_ms: u64) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                capacity,
                max_attempts,
                backoff_base_ms,
                backoff_cap_ms,
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.queue_capacity,
            config.max_attempts,
            config.backoff_base_ms,
            config.backoff_cap_ms,
        )
    }

    /// Add a record to the queue
    ///
    /// Rejects when the queue is at capacity; a record already queued or in
    /// flight is not enqueued twice.
    pub async fn enqueue(&self, record_id: Uuid, priority: QueuePriority) -> std::result::Result<(), EnqueueError> {
        let mut state = self.inner.state.lock().await;

        if state.holds(record_id) {
            tracing::debug!(record_id = %record_id, "Record already queued, skipping");
            return Ok(());
        }
        if state.live() >= self.inner.capacity {
            tracing::warn!(
                record_id = %record_id,
                capacity = self.inner.capacity,
                "Enrichment queue full, rejecting"
            );
            return Err(EnqueueError::QueueFull(self.inner.capacity));
        }

        state.lane(priority).push_back(QueueItem::new(record_id, priority));
        drop(state);
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Pop the next item: highest priority first, FIFO within a priority
    ///
    /// The popped record is tracked as in-progress until the worker settles
    /// it via the retry/done/dead paths.
    pub async fn try_dequeue(&self) -> Option<QueueItem> {
        let mut state = self.inner.state.lock().await;
        let item = state
            .high
            .pop_front()
            .or_else(|| state.medium.pop_front())
            .or_else(|| state.low.pop_front())?;
        state.in_progress.insert(item.record_id);
        Some(item)
    }

    /// Mark a record dead out-of-band (operator cancellation)
    ///
    /// Queued items move to the dead list immediately; items in flight or
    /// awaiting retry are flagged and moved when they next settle.
    pub async fn mark_dead(&self, record_id: Uuid) -> Result<()> {
        let mut state = self.inner.state.lock().await;

        for priority in [QueuePriority::High, QueuePriority::Medium, QueuePriority::Low] {
            let lane = state.lane(priority);
            if let Some(pos) = lane.iter().position(|i| i.record_id == record_id) {
                let mut item = lane
                    .remove(pos)
                    .ok_or_else(|| Error::Internal("Queue lane position vanished".to_string()))?;
                item.last_error = Some("Cancelled".to_string());
                state.dead.push(item);
                return Ok(());
            }
        }

        if state.in_progress.contains(&record_id) || state.retry_wait.contains(&record_id) {
            state.cancelled.insert(record_id);
            return Ok(());
        }

        Err(Error::NotFound(format!(
            "Record {} is not in the enrichment queue",
            record_id
        )))
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock().await;
        QueueStats {
            queued: state.queued(),
            high: state.high.len(),
            medium: state.medium.len(),
            low: state.low.len(),
            in_progress: state.in_progress.len(),
            retry_wait: state.retry_wait.len(),
            done: state.done,
            dead: state.dead.len(),
        }
    }

    /// Snapshot of the dead list
    pub async fn dead_items(&self) -> Vec<QueueItem> {
        self.inner.state.lock().await.dead.clone()
    }

    /// Stop all workers after their current item
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Spawn the worker pool
    pub fn start_workers(
        &self,
        count: usize,
        enricher: Arc<dyn Enricher>,
        events: EventBus,
    ) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|worker_id| {
                let queue = self.clone();
                let enricher = enricher.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker_id, "Enrichment worker started");
                    queue.worker_loop(enricher, events).await;
                    tracing::debug!(worker_id, "Enrichment worker stopped");
                })
            })
            .collect()
    }

    async fn worker_loop(&self, enricher: Arc<dyn Enricher>, events: EventBus) {
        while !self.inner.shutdown.load(Ordering::SeqCst) {
            match self.try_dequeue().await {
                Some(item) => self.process_item(item, &enricher, &events).await,
                None => {
                    tokio::select! {
                        _ = self.inner.notify.notified() => {}
                        _ = tokio::time::sleep(Duration::from_millis(WORKER_POLL_MS)) => {}
                    }
                }
            }
        }
    }

    async fn process_item(&self, mut item: QueueItem, enricher: &Arc<dyn Enricher>, events: &EventBus) {
        let record_id = item.record_id;
        // Enrichment runs outside the queue lock
        let result = enricher.enrich(record_id).await;

        let mut state = self.inner.state.lock().await;
        state.in_progress.remove(&record_id);

        match result {
            Ok(()) => {
                state.done += 1;
                state.cancelled.remove(&record_id);
                drop(state);
                tracing::info!(record_id = %record_id, "Enrichment completed");
                events.emit(PipelineEvent::EnrichmentCompleted {
                    record_id,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                item.attempts += 1;
                item.last_error = Some(e.to_string());

                if state.cancelled.remove(&record_id) || item.attempts >= self.inner.max_attempts {
                    let attempts = item.attempts;
                    let error = e.to_string();
                    state.dead.push(item);
                    drop(state);
                    tracing::warn!(
                        record_id = %record_id,
                        attempts,
                        error = %error,
                        "Enrichment exhausted, moved to dead list"
                    );
                    events.emit(PipelineEvent::EnrichmentDead {
                        record_id,
                        attempts,
                        error,
                        timestamp: Utc::now(),
                    });
                } else {
                    state.retry_wait.insert(record_id);
                    drop(state);
                    let delay = self.backoff_delay(item.attempts);
                    tracing::debug!(
                        record_id = %record_id,
                        attempts = item.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Enrichment failed, backing off"
                    );
                    events.emit(PipelineEvent::EnrichmentRetry {
                        record_id,
                        attempts: item.attempts,
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });

                    let queue = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        queue.requeue(item).await;
                    });
                }
            }
        }
    }

    /// Return a backed-off item to its lane after the delay
    async fn requeue(&self, item: QueueItem) {
        let mut state = self.inner.state.lock().await;
        state.retry_wait.remove(&item.record_id);

        if state.cancelled.remove(&item.record_id) {
            state.dead.push(item);
            return;
        }

        let priority = item.priority;
        state.lane(priority).push_back(item);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Delay before attempt `attempts + 1`: base doubling per failure, capped
    fn backoff_delay(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        let ms = self
            .inner
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.inner.backoff_cap_ms);
        Duration::from_millis(ms)
    }
}

// ============================================================================
// Enrichers
// ============================================================================

/// Seam between the queue machinery and the actual enrichment work
#[async_trait::async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, record_id: Uuid) -> Result<()>;
}

/// Production enricher: geocoding backfill plus photo lookup
pub struct PlaceEnricher {
    store: Arc<dyn PlaceStore>,
    maps: Arc<dyn MapsPlatform>,
}

impl PlaceEnricher {
    pub fn new(store: Arc<dyn PlaceStore>, maps: Arc<dyn MapsPlatform>) -> Self {
        Self { store, maps }
    }
}

#[async_trait::async_trait]
impl Enricher for PlaceEnricher {
    async fn enrich(&self, record_id: Uuid) -> Result<()> {
        let place = self
            .store
            .get_by_id(record_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Place {} not found", record_id)))?;

        let mut record = place.record.clone();
        let mut changed = false;

        if record.coordinates.is_none() && !record.address.is_empty() {
            match self.maps.geocode(&record.address).await {
                Ok(point) => {
                    record.coordinates = Some(point);
                    record.missing_fields.retain(|f| f != "coordinates");
                    changed = true;
                }
                // Unresolvable addresses stay unresolved; not a retry case
                Err(MapsError::NoResult(_)) => {
                    tracing::debug!(record_id = %record_id, "Address did not geocode");
                }
                Err(e) => return Err(Error::Internal(format!("Geocoding failed: {}", e))),
            }
        }

        if record.images.is_empty() {
            if let Some(coordinates) = record.coordinates {
                match self.maps.photo_urls(&record.name, &coordinates).await {
                    Ok(urls) => {
                        if !urls.is_empty() {
                            record.images = urls.into_iter().take(MAX_PHOTOS).collect();
                            changed = true;
                        }
                    }
                    Err(MapsError::NoResult(_)) => {}
                    Err(e) => return Err(Error::Internal(format!("Photo lookup failed: {}", e))),
                }
            }
        }

        if changed {
            self.store.update_record(record_id, &record).await?;
        }
        Ok(())
    }
}
