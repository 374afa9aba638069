//! Per-document batching writer for CRDT update blobs.
//!
//! Producers enqueue small update blobs at high frequency; this crate
//! debounces them per doc, bounds batches by size and count, coalesces each
//! batch into a single blob via [`doc_codec::merge_updates`], and hands the
//! result to an [`UpdateSink`]. This is where the 10x-100x write-amplification
//! reduction happens.
//!
//! Guarantees, enforced per doc:
//!
//! - at most one flush is in flight at any time (a second request sets a
//!   "flush again" bit and is folded into the next run);
//! - a failed flush requeues its updates ahead of anything enqueued in the
//!   meantime and re-arms the timers, so updates are never dropped;
//! - two timers govern time-based flushing: a debounce timer re-armed on
//!   every enqueue, and a hard deadline armed once per batch that later
//!   enqueues never push back;
//! - after [`DocBatcher::shutdown`] begins, new enqueues bypass batching and
//!   are appended synchronously under the doc lock, so no acknowledgement is
//!   given without durability.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use tokio::{
    sync::{Mutex, Notify, mpsc},
    task::JoinHandle,
};

mod config;
mod events;
mod metrics;
mod sink;

pub use self::{
    config::{BatchConfig, BatchPreset, ConfigError},
    events::{BatchEvent, FlushReason},
    metrics::{BatcherMetrics, MetricsSnapshot},
    sink::{SinkError, UpdateSink},
};

/// A flush attempt failed; the affected updates were requeued.
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    /// The sink rejected an append.
    #[error("update sink error: {0}")]
    Sink(SinkError),
}

/// An enqueue during shutdown could not be appended synchronously.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    /// The sink rejected the shutdown-mode append.
    #[error("update sink error: {0}")]
    Sink(SinkError),
}

/// One queued update awaiting flush.
#[derive(Debug, Clone)]
struct PendingUpdate {
    payload: Bytes,
    client_id: Option<String>,
}

/// Mutable per-doc queue state, guarded by the doc mutex.
#[derive(Default)]
struct DocQueue {
    pending: Vec<PendingUpdate>,
    pending_bytes: usize,
    debounce: Option<JoinHandle<()>>,
    deadline: Option<JoinHandle<()>>,
    flush_in_flight: bool,
    flush_again: bool,
}

impl DocQueue {
    fn push(&mut self, update: PendingUpdate) {
        self.pending_bytes += update.payload.len();
        self.pending.push(update);
    }

    /// Swaps the pending queue out for flushing.
    fn take_batch(&mut self) -> Vec<PendingUpdate> {
        self.pending_bytes = 0;
        std::mem::take(&mut self.pending)
    }

    /// Puts un-persisted updates back, ahead of anything enqueued meanwhile.
    fn restore(&mut self, mut updates: Vec<PendingUpdate>) {
        updates.extend(self.pending.drain(..));
        self.pending_bytes = updates.iter().map(|u| u.payload.len()).sum();
        self.pending = updates;
    }

    fn cancel_timers(&mut self) {
        if let Some(handle) = self.debounce.take() {
            handle.abort();
        }
        if let Some(handle) = self.deadline.take() {
            handle.abort();
        }
    }
}

/// Per-doc slot: the queue plus a notifier for flush completion.
#[derive(Default)]
struct DocSlot {
    queue: Mutex<DocQueue>,
    flush_done: Notify,
}

struct Inner {
    sink: Arc<dyn UpdateSink>,
    config: BatchConfig,
    slots: StdMutex<HashMap<String, Arc<DocSlot>>>,
    metrics: BatcherMetrics,
    events: StdMutex<Option<mpsc::UnboundedSender<BatchEvent>>>,
    shutting_down: AtomicBool,
}

/// Outcome of a single flush attempt.
enum FlushOutcome {
    /// This call drained the queue (or ran at least one batch).
    Flushed,
    /// Nothing was pending.
    Idle,
    /// Another flush was in flight; it will run again on completion.
    Deferred,
}

/// What a successful batch write looked like.
struct BatchWrite {
    appended: usize,
    bytes_in: usize,
    bytes_out: usize,
}

/// A batch write that failed partway.
struct BatchWriteFailure {
    /// Updates durably appended before the failure.
    persisted: usize,
    error: SinkError,
}

/// The batching writer. Clones share the same queues and counters.
#[derive(Clone)]
pub struct DocBatcher {
    inner: Arc<Inner>,
}

impl DocBatcher {
    /// Creates a batcher over the given sink.
    ///
    /// Rejects invalid configurations, see [`BatchConfig::validate`].
    pub fn new(sink: Arc<dyn UpdateSink>, config: BatchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                sink,
                config,
                slots: StdMutex::new(HashMap::new()),
                metrics: BatcherMetrics::default(),
                events: StdMutex::new(None),
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    /// Registers an event subscriber, replacing any previous one.
    ///
    /// Without a subscriber no events are constructed or sent.
    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<BatchEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.events.lock().unwrap() = Some(tx);
        rx
    }

    /// Point-in-time view of the batching counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// `true` once [`DocBatcher::shutdown`] has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Queues one update for a doc.
    ///
    /// Returns as soon as the update is queued; durability follows at the
    /// next flush. If a size or count bound is hit, the flush runs before
    /// returning (its errors are logged and the updates requeued, never
    /// surfaced here). In shutdown mode the update is appended synchronously
    /// under the doc lock instead, and sink errors are surfaced.
    pub async fn enqueue(
        &self,
        doc_name: &str,
        payload: Bytes,
        client_id: Option<String>,
    ) -> Result<(), EnqueueError> {
        self.inner.metrics.record_enqueue();

        if self.is_shutting_down() {
            let slot = self.slot(doc_name);
            // The doc lock is held across the append so one producer's
            // shutdown-mode writes reach the log in call order.
            let _queue = slot.queue.lock().await;
            let len = payload.len();
            self.inner
                .sink
                .append(doc_name, &payload, client_id.as_deref())
                .await
                .map_err(EnqueueError::Sink)?;
            self.inner.metrics.record_bypass(len as u64);
            return Ok(());
        }

        let slot = self.slot(doc_name);
        let trigger = {
            let mut queue = slot.queue.lock().await;
            queue.push(PendingUpdate {
                payload,
                client_id,
            });
            self.emit(|| BatchEvent::Enqueued {
                doc_name: doc_name.to_string(),
                queue_len: queue.pending.len(),
                queue_bytes: queue.pending_bytes,
            });

            if queue.pending.len() >= self.inner.config.max_batch_count {
                Some(FlushReason::Count)
            } else if queue.pending_bytes >= self.inner.config.max_batch_bytes {
                Some(FlushReason::Size)
            } else {
                self.arm_debounce(doc_name, &mut queue);
                self.arm_deadline(doc_name, &mut queue);
                None
            }
        };

        if let Some(reason) = trigger {
            if let Err(err) = self.flush_now(doc_name, reason).await {
                tracing::warn!(
                    doc_name,
                    error = %err,
                    "bound-triggered flush failed; updates requeued"
                );
            }
        }
        Ok(())
    }

    /// Flushes a doc's pending updates and waits until none remain.
    ///
    /// This is the consistency hook: read paths call it before querying the
    /// log so acknowledged updates are visible.
    pub async fn flush_doc(&self, doc_name: &str) -> Result<(), FlushError> {
        self.flush_and_wait(doc_name, FlushReason::Manual).await
    }

    /// Flushes every doc with pending updates, awaiting in-flight flushes.
    pub async fn flush_all(&self) -> Result<(), FlushError> {
        self.flush_all_with_reason(FlushReason::Manual).await
    }

    /// Drains the batcher for process shutdown.
    ///
    /// Cancels all timers, switches new enqueues to synchronous appends, and
    /// flushes everything still queued. After this returns successfully,
    /// every previously acknowledged update is durable.
    pub async fn shutdown(&self) -> Result<(), FlushError> {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let slots = self.all_slots();
        for (_, slot) in &slots {
            slot.queue.lock().await.cancel_timers();
        }

        let result = self.flush_all_with_reason(FlushReason::Shutdown).await;
        self.emit(|| BatchEvent::Shutdown);
        result
    }

    async fn flush_all_with_reason(&self, reason: FlushReason) -> Result<(), FlushError> {
        let mut first_error = None;
        for (doc_name, _) in self.all_slots() {
            if let Err(err) = self.flush_and_wait(&doc_name, reason).await {
                tracing::error!(doc_name = %doc_name, error = %err, "flush failed; updates requeued");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Flushes and waits out any concurrent flush until the queue is empty.
    async fn flush_and_wait(&self, doc_name: &str, reason: FlushReason) -> Result<(), FlushError> {
        let slot = self.slot(doc_name);
        loop {
            let outcome = self.flush_now(doc_name, reason).await?;
            let notified = slot.flush_done.notified();
            {
                let queue = slot.queue.lock().await;
                if !queue.flush_in_flight && queue.pending.is_empty() {
                    return Ok(());
                }
            }
            if matches!(outcome, FlushOutcome::Deferred) {
                notified.await;
            }
        }
    }

    /// Runs one flush for a doc, serialized by the in-flight flag.
    async fn flush_now(
        &self,
        doc_name: &str,
        reason: FlushReason,
    ) -> Result<FlushOutcome, FlushError> {
        let slot = self.slot(doc_name);
        loop {
            let batch = {
                let mut queue = slot.queue.lock().await;
                if queue.flush_in_flight {
                    queue.flush_again = true;
                    return Ok(FlushOutcome::Deferred);
                }
                queue.cancel_timers();
                if queue.pending.is_empty() {
                    return Ok(FlushOutcome::Idle);
                }
                queue.flush_in_flight = true;
                queue.take_batch()
            };

            let update_count = batch.len();
            let result = self.write_batch(doc_name, &batch).await;

            let mut queue = slot.queue.lock().await;
            queue.flush_in_flight = false;
            match result {
                Ok(write) => {
                    self.inner.metrics.record_flush(
                        reason,
                        write.appended as u64,
                        write.bytes_in as u64,
                        write.bytes_out as u64,
                    );
                    self.emit(|| BatchEvent::Flushed {
                        doc_name: doc_name.to_string(),
                        update_count,
                        final_bytes: write.bytes_out,
                        reason,
                    });
                    let run_again = queue.flush_again || !queue.pending.is_empty();
                    queue.flush_again = false;
                    slot.flush_done.notify_waiters();
                    if run_again {
                        drop(queue);
                        continue;
                    }
                    return Ok(FlushOutcome::Flushed);
                }
                Err(failure) => {
                    self.inner.metrics.record_error();
                    let mut batch = batch;
                    let unpersisted = batch.split_off(failure.persisted);
                    queue.restore(unpersisted);
                    queue.flush_again = false;
                    if !self.is_shutting_down() {
                        self.arm_debounce(doc_name, &mut queue);
                        self.arm_deadline(doc_name, &mut queue);
                    }
                    slot.flush_done.notify_waiters();
                    return Err(FlushError::Sink(failure.error));
                }
            }
        }
    }

    /// Writes one batch to the sink, coalescing when configured.
    ///
    /// A [`doc_codec::CodecError`] during coalescing is not fatal: the blobs
    /// are appended individually, preserving order.
    async fn write_batch(
        &self,
        doc_name: &str,
        batch: &[PendingUpdate],
    ) -> Result<BatchWrite, BatchWriteFailure> {
        let bytes_in: usize = batch.iter().map(|u| u.payload.len()).sum();

        if self.inner.config.coalesce && batch.len() >= 2 {
            let blobs: Vec<&[u8]> = batch.iter().map(|u| u.payload.as_ref()).collect();
            match doc_codec::merge_updates(&blobs) {
                Ok(merged) => {
                    let client_id = shared_client_id(batch);
                    self.inner
                        .sink
                        .append(doc_name, &merged, client_id)
                        .await
                        .map_err(|error| BatchWriteFailure {
                            persisted: 0,
                            error,
                        })?;
                    return Ok(BatchWrite {
                        appended: 1,
                        bytes_in,
                        bytes_out: merged.len(),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        doc_name,
                        error = %err,
                        "coalescing failed; appending blobs individually"
                    );
                }
            }
        }

        let mut persisted = 0;
        for update in batch {
            self.inner
                .sink
                .append(doc_name, &update.payload, update.client_id.as_deref())
                .await
                .map_err(|error| BatchWriteFailure { persisted, error })?;
            persisted += 1;
        }
        Ok(BatchWrite {
            appended: persisted,
            bytes_in,
            bytes_out: bytes_in,
        })
    }

    /// (Re)arms the debounce timer; every enqueue pushes it out again.
    fn arm_debounce(&self, doc_name: &str, queue: &mut DocQueue) {
        if let Some(handle) = queue.debounce.take() {
            handle.abort();
        }
        let batcher = self.clone();
        let doc = doc_name.to_string();
        let delay = self.inner.config.debounce;
        queue.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            batcher.release_timer(&doc, Timer::Debounce).await;
            if let Err(err) = batcher.flush_now(&doc, FlushReason::Debounce).await {
                tracing::warn!(doc_name = %doc, error = %err, "debounce flush failed; updates requeued");
            }
        }));
    }

    /// Arms the hard deadline once per batch; later enqueues leave it alone.
    fn arm_deadline(&self, doc_name: &str, queue: &mut DocQueue) {
        if queue.deadline.is_some() {
            return;
        }
        let batcher = self.clone();
        let doc = doc_name.to_string();
        let delay = self.inner.config.batch_timeout;
        queue.deadline = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            batcher.release_timer(&doc, Timer::Deadline).await;
            if let Err(err) = batcher.flush_now(&doc, FlushReason::Deadline).await {
                tracing::warn!(doc_name = %doc, error = %err, "deadline flush failed; updates requeued");
            }
        }));
    }

    /// Drops a fired timer's registration so the flush path cannot abort the
    /// timer task mid-write.
    async fn release_timer(&self, doc_name: &str, timer: Timer) {
        let slot = self.slot(doc_name);
        let mut queue = slot.queue.lock().await;
        match timer {
            Timer::Debounce => queue.debounce = None,
            Timer::Deadline => queue.deadline = None,
        }
    }

    fn slot(&self, doc_name: &str) -> Arc<DocSlot> {
        let mut slots = self.inner.slots.lock().unwrap();
        slots
            .entry(doc_name.to_string())
            .or_insert_with(|| Arc::new(DocSlot::default()))
            .clone()
    }

    fn all_slots(&self) -> Vec<(String, Arc<DocSlot>)> {
        let slots = self.inner.slots.lock().unwrap();
        slots
            .iter()
            .map(|(doc, slot)| (doc.clone(), slot.clone()))
            .collect()
    }

    fn emit(&self, event: impl FnOnce() -> BatchEvent) {
        let mut guard = self.inner.events.lock().unwrap();
        if let Some(tx) = guard.as_ref() {
            if tx.send(event()).is_err() {
                // Subscriber went away; stop constructing events.
                *guard = None;
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Timer {
    Debounce,
    Deadline,
}

/// The client id to attach to a coalesced record: kept only when every
/// update in the batch came from the same producer.
fn shared_client_id(batch: &[PendingUpdate]) -> Option<&str> {
    let first = batch.first()?.client_id.as_deref();
    batch
        .iter()
        .all(|u| u.client_id.as_deref() == first)
        .then_some(first)
        .flatten()
}

impl BatcherMetrics {
    /// Counts a shutdown-mode synchronous append.
    fn record_bypass(&self, bytes: u64) {
        // One record in, one record out: neutral for the coalescing and
        // compression figures.
        self.record_flush(FlushReason::Shutdown, 1, bytes, bytes);
    }
}

#[cfg(test)]
mod tests;
