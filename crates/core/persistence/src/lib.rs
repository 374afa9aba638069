//! Persistence service for the collaborative annotation store.
//!
//! The public facade over the update log, snapshot engine, batching writer,
//! compaction engine, and delete coordinator. Construct it explicitly with a
//! connected [`PersistenceDb`]; lifetime management (signal handlers, the
//! final [`PersistenceService::shutdown`] call) belongs to the process edge.
//!
//! Consistency model: every read operation flushes the batcher first, so a
//! `load` reflects every `persist` acknowledged before it despite the
//! asynchronous batching in between.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex as StdMutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use backon::Retryable;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use doc_batcher::{BatchConfig, BatchEvent, DocBatcher, MetricsSnapshot, SinkError, UpdateSink};
use persistence_db::{
    Checksum, HealthSnapshot, NewSnapshot, PersistenceDb, Snapshot, UpdateId, UpdateRecord,
    updates,
};
use tokio::task::JoinHandle;

mod compaction;
mod delete;
mod doc_name;
mod error;
mod retry;

pub use self::{
    compaction::{CompactOutcome, CompactionConfig},
    delete::{DeleteMode, HARD_DELETE_CONFIRMATION},
    doc_name::{DocNameError, ParsedDocName},
    error::Error,
};

/// Read-only compaction status for a doc.
#[derive(Debug, Clone)]
pub struct CompactStatus {
    /// Updates currently in the log
    pub update_count: i64,
    /// Total pending update bytes
    pub total_bytes: i64,
    /// Oldest pending update, if any
    pub oldest_update: Option<DateTime<Utc>>,
    /// Newest pending update, if any
    pub newest_update: Option<DateTime<Utc>>,
    /// Snapshots currently stored
    pub snapshot_count: i64,
    /// Creation time of the newest snapshot, if any
    pub latest_snapshot_at: Option<DateTime<Utc>>,
    /// Whether the thresholds recommend compacting now
    pub recommend_compact: bool,
}

/// Result of a snapshot save.
#[derive(Debug, Clone)]
pub enum SaveSnapshotOutcome {
    /// A new snapshot row was written.
    Saved(Snapshot),
    /// An identical snapshot (same checksum) already existed; nothing was
    /// written.
    Duplicate {
        /// Checksum shared by the submitted blob and the stored snapshot
        checksum: Checksum,
    },
}

struct ServiceInner {
    db: PersistenceDb,
    batcher: DocBatcher,
    compaction: CompactionConfig,
    /// Serializes compaction runs per doc.
    compact_locks: StdMutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    shutting_down: AtomicBool,
    auto_compact_task: StdMutex<Option<JoinHandle<()>>>,
}

/// The persistence service. Clones share the same state.
#[derive(Clone)]
pub struct PersistenceService {
    inner: Arc<ServiceInner>,
}

impl PersistenceService {
    /// Builds the service over a connected database.
    ///
    /// When `compaction.auto_compact` is enabled, a background task watches
    /// batch flushes and runs the threshold check after each one; its
    /// failures are logged, never surfaced to producers.
    pub fn new(
        db: PersistenceDb,
        batch_config: BatchConfig,
        compaction: CompactionConfig,
    ) -> Result<Self, Error> {
        let sink = LogSink { db: db.clone() };
        let batcher = DocBatcher::new(Arc::new(sink), batch_config)?;

        let auto_compact = compaction.auto_compact;
        let events = auto_compact.then(|| batcher.subscribe_events());

        let service = Self {
            inner: Arc::new(ServiceInner {
                db,
                batcher,
                compaction,
                compact_locks: StdMutex::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
                auto_compact_task: StdMutex::new(None),
            }),
        };

        if let Some(events) = events {
            let task = spawn_auto_compact(Arc::downgrade(&service.inner), events);
            *service.inner.auto_compact_task.lock().unwrap() = Some(task);
        }

        Ok(service)
    }

    /// Queues one update blob for durable storage.
    ///
    /// Acknowledges as soon as the update is queued; durability follows at
    /// the next flush (at-least-once). During shutdown the write goes to the
    /// log synchronously instead, so the acknowledgement still implies
    /// durability.
    pub async fn persist(
        &self,
        doc_name: &str,
        payload: Bytes,
        client_id: Option<String>,
    ) -> Result<(), Error> {
        self.logged("persist", doc_name, async {
            validate_doc_name(doc_name)?;
            if payload.is_empty() {
                return Err(Error::Validation("update payload must not be empty".into()));
            }
            self.inner.batcher.enqueue(doc_name, payload, client_id).await?;
            Ok(())
        })
        .await
    }

    /// Appends one update directly to the log, bypassing batching.
    ///
    /// Used by ingestion paths that need the assigned record id back.
    /// Triggers the same non-blocking post-append compaction check as a
    /// batch flush.
    pub async fn append_now(
        &self,
        doc_name: &str,
        payload: &[u8],
        client_id: Option<&str>,
    ) -> Result<(UpdateId, DateTime<Utc>), Error> {
        self.logged("append", doc_name, async {
            validate_doc_name(doc_name)?;
            if payload.is_empty() {
                return Err(Error::Validation("update payload must not be empty".into()));
            }
            let appended = (|| self.inner.db.append_update(doc_name, payload, client_id))
                .retry(retry::policy())
                .when(persistence_db::Error::is_retryable)
                .notify(retry::notify("update append"))
                .await?;

            if self.inner.compaction.auto_compact {
                let service = self.clone();
                let doc = doc_name.to_string();
                tokio::spawn(async move {
                    match service.compact_serialized(&doc, false).await {
                        Ok(_) => {}
                        // Persistence must not fail because compaction failed.
                        Err(err) => {
                            tracing::warn!(doc_name = %doc, error = %err, "post-append compaction check failed");
                        }
                    }
                });
            }
            Ok(appended)
        })
        .await
    }

    /// Loads a doc as a single merged state blob.
    ///
    /// Folds the latest snapshot (if any) with every newer update. Returns
    /// `None` for a doc that has neither snapshots nor updates.
    pub async fn load(&self, doc_name: &str) -> Result<Option<Vec<u8>>, Error> {
        self.logged("load", doc_name, async {
            validate_doc_name(doc_name)?;
            self.inner.batcher.flush_doc(doc_name).await?;

            let snapshot = (|| self.inner.db.latest_snapshot(doc_name))
                .retry(retry::policy())
                .when(persistence_db::Error::is_retryable)
                .notify(retry::notify("snapshot load"))
                .await?;

            let updates = match &snapshot {
                Some(snapshot) => {
                    (|| self.inner.db.updates_since(doc_name, snapshot.created_at))
                        .retry(retry::policy())
                        .when(persistence_db::Error::is_retryable)
                        .notify(retry::notify("update read"))
                        .await?
                }
                None => {
                    (|| self.inner.db.updates_all(doc_name))
                        .retry(retry::policy())
                        .when(persistence_db::Error::is_retryable)
                        .notify(retry::notify("update read"))
                        .await?
                }
            };

            if snapshot.is_none() && updates.is_empty() {
                return Ok(None);
            }

            let blob = doc_codec::fold(
                snapshot.as_ref().map(|s| s.state.as_slice()),
                updates.iter().map(|u| u.payload.as_slice()),
            )?;
            Ok(Some(blob))
        })
        .await
    }

    /// All raw update records for a doc in `(timestamp, id)` ascending order.
    pub async fn read_all(&self, doc_name: &str) -> Result<Vec<UpdateRecord>, Error> {
        self.logged("read_all", doc_name, async {
            validate_doc_name(doc_name)?;
            self.inner.batcher.flush_doc(doc_name).await?;
            let records = (|| self.inner.db.updates_all(doc_name))
                .retry(retry::policy())
                .when(persistence_db::Error::is_retryable)
                .notify(retry::notify("update read"))
                .await?;
            Ok(records)
        })
        .await
    }

    /// Deletes a doc's update records, optionally only those older than
    /// `before`. Snapshots are not touched. Returns the deleted count.
    pub async fn clear_updates(
        &self,
        doc_name: &str,
        before: Option<DateTime<Utc>>,
    ) -> Result<u64, Error> {
        self.logged("clear_updates", doc_name, async {
            validate_doc_name(doc_name)?;
            self.inner.batcher.flush_doc(doc_name).await?;
            let deleted = match before {
                Some(before) => self.inner.db.clear_updates_before(doc_name, before).await?,
                None => self.inner.db.clear_updates(doc_name).await?,
            };
            Ok(deleted)
        })
        .await
    }

    /// Stores a full-state snapshot for a doc, idempotently by checksum.
    pub async fn save_snapshot(
        &self,
        doc_name: &str,
        state: Vec<u8>,
        panels: Option<serde_json::Value>,
    ) -> Result<SaveSnapshotOutcome, Error> {
        self.logged("save_snapshot", doc_name, async {
            validate_doc_name(doc_name)?;
            if state.is_empty() {
                return Err(Error::Validation(
                    "snapshot state must not be empty".into(),
                ));
            }
            self.inner.batcher.flush_doc(doc_name).await?;

            let checksum = Checksum::of(&state);
            let existing = self
                .inner
                .db
                .snapshot_by_checksum(doc_name, &checksum)
                .await?;
            if existing.is_some() {
                return Ok(SaveSnapshotOutcome::Duplicate { checksum });
            }

            let saved = self
                .inner
                .db
                .save_snapshot(NewSnapshot {
                    doc_name,
                    note_id: doc_name::note_id_of(doc_name),
                    state: &state,
                    expected_checksum: Some(&checksum),
                    update_count: None,
                    panels: panels.as_ref(),
                })
                .await?;

            self.inner
                .db
                .prune_snapshots(doc_name, self.inner.compaction.keep_snapshots)
                .await?;

            Ok(SaveSnapshotOutcome::Saved(saved))
        })
        .await
    }

    /// Loads a snapshot: the newest one, or the one with the given checksum.
    pub async fn load_snapshot(
        &self,
        doc_name: &str,
        checksum: Option<&Checksum>,
    ) -> Result<Option<Snapshot>, Error> {
        self.logged("load_snapshot", doc_name, async {
            validate_doc_name(doc_name)?;
            self.inner.batcher.flush_doc(doc_name).await?;
            let snapshot = match checksum {
                Some(checksum) => self.inner.db.snapshot_by_checksum(doc_name, checksum).await?,
                None => self.inner.db.latest_snapshot(doc_name).await?,
            };
            Ok(snapshot)
        })
        .await
    }

    /// Deletes all but the most recent `keep` snapshots for a doc.
    pub async fn prune_snapshots(&self, doc_name: &str, keep: i64) -> Result<u64, Error> {
        self.logged("prune_snapshots", doc_name, async {
            validate_doc_name(doc_name)?;
            let pruned = self.inner.db.prune_snapshots(doc_name, keep.max(0)).await?;
            Ok(pruned)
        })
        .await
    }

    /// Compacts a doc's update log into a snapshot.
    ///
    /// With `force = false` the compaction thresholds decide; `force = true`
    /// always compacts a non-empty log.
    pub async fn compact(&self, doc_name: &str, force: bool) -> Result<CompactOutcome, Error> {
        self.logged("compact", doc_name, async {
            validate_doc_name(doc_name)?;
            if self.is_shutting_down() {
                return Err(Error::ShuttingDown);
            }
            self.inner.batcher.flush_doc(doc_name).await?;
            self.compact_serialized(doc_name, force).await
        })
        .await
    }

    /// Read-only compaction status and recommendation for a doc.
    pub async fn compact_status(&self, doc_name: &str) -> Result<CompactStatus, Error> {
        self.logged("compact_status", doc_name, async {
            validate_doc_name(doc_name)?;
            self.inner.batcher.flush_doc(doc_name).await?;

            let stats = self.inner.db.update_log_stats(doc_name).await?;
            let snapshot_count = self.inner.db.snapshot_count(doc_name).await?;
            let latest = self.inner.db.latest_snapshot(doc_name).await?;

            Ok(CompactStatus {
                update_count: stats.count,
                total_bytes: stats.total_bytes,
                oldest_update: stats.oldest,
                newest_update: stats.newest,
                snapshot_count,
                latest_snapshot_at: latest.map(|s| s.created_at),
                recommend_compact: compaction::should_compact(
                    &stats,
                    Utc::now(),
                    &self.inner.compaction,
                ),
            })
        })
        .await
    }

    /// Deletes a document across the update log, snapshots, and annotation
    /// tables, atomically.
    ///
    /// A hard delete must carry the [`HARD_DELETE_CONFIRMATION`] token;
    /// anything else is an authorization error and nothing is mutated.
    pub async fn delete_doc(
        &self,
        doc_name: &str,
        mode: DeleteMode,
        confirmation: Option<&str>,
    ) -> Result<(), Error> {
        self.logged("delete_doc", doc_name, async {
            validate_doc_name(doc_name)?;
            if self.is_shutting_down() {
                return Err(Error::ShuttingDown);
            }
            if mode == DeleteMode::Hard && confirmation != Some(HARD_DELETE_CONFIRMATION) {
                return Err(Error::Authorization(
                    "hard delete requires the permanent-delete confirmation token".into(),
                ));
            }
            // The cascade spans panel docs too, so drain everything.
            self.inner.batcher.flush_all().await?;
            delete::delete_doc(&self.inner.db, doc_name, mode).await
        })
        .await
    }

    /// Probes database liveness. Never errors; see [`PersistenceDb::health`].
    pub async fn health(&self) -> HealthSnapshot {
        self.inner.db.health().await
    }

    /// Point-in-time batching counters.
    pub fn batch_metrics(&self) -> MetricsSnapshot {
        self.inner.batcher.metrics()
    }

    /// `true` once [`PersistenceService::shutdown`] has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Cooperative drain for process shutdown.
    ///
    /// Stops the auto-compaction watcher, drains the batcher (late persists
    /// are appended synchronously), and closes the pool. After this returns
    /// successfully every acknowledged update is durable.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        if let Some(task) = self.inner.auto_compact_task.lock().unwrap().take() {
            task.abort();
        }
        let drain = self.inner.batcher.shutdown().await;
        self.inner.db.close().await;
        drain?;
        Ok(())
    }

    /// Spawns the periodic compaction sweep.
    ///
    /// The caller owns the handle and aborts it at process shutdown. Each
    /// tick checks every doc that currently has updates; failures are logged
    /// and the sweep continues.
    pub fn spawn_sweep(&self) -> JoinHandle<()> {
        let service = self.clone();
        let interval = self.inner.compaction.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the sweep
            // starts one full interval after startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if service.is_shutting_down() {
                    break;
                }
                service.sweep_once().await;
            }
        })
    }

    /// One pass of the background sweep.
    async fn sweep_once(&self) {
        let docs = match updates::sql::distinct_docs(&self.inner.db).await {
            Ok(docs) => docs,
            Err(err) => {
                tracing::warn!(error = %err, "compaction sweep could not list docs");
                return;
            }
        };
        for doc_name in docs {
            if self.is_shutting_down() {
                return;
            }
            match self.compact_serialized(&doc_name, false).await {
                Ok(CompactOutcome::Compacted {
                    compacted_count, ..
                }) => {
                    tracing::debug!(doc_name = %doc_name, compacted_count, "sweep compacted doc");
                }
                Ok(CompactOutcome::Skipped { .. }) => {}
                Err(err) => {
                    tracing::warn!(doc_name = %doc_name, error = %err, "sweep compaction failed");
                }
            }
        }
    }

    /// Runs a compaction while holding the doc's compaction lock.
    async fn compact_serialized(
        &self,
        doc_name: &str,
        force: bool,
    ) -> Result<CompactOutcome, Error> {
        let lock = {
            let mut locks = self.inner.compact_locks.lock().unwrap();
            locks
                .entry(doc_name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;
        compaction::compact_doc(&self.inner.db, doc_name, &self.inner.compaction, force).await
    }

    /// Wraps an operation with the structured per-operation log line.
    async fn logged<T>(
        &self,
        action: &'static str,
        doc_name: &str,
        op: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        let started = Instant::now();
        let result = op.await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                tracing::info!(action, doc_name, success = true, duration_ms, "persistence op");
            }
            Err(err) => {
                tracing::warn!(
                    action,
                    doc_name,
                    success = false,
                    duration_ms,
                    error = %err,
                    error_sources = monitoring::logging::error_source(err),
                    "persistence op"
                );
            }
        }
        result
    }
}

/// Post-flush compaction watcher.
///
/// Holds only a weak reference so the service (and its pool) can drop; the
/// task ends when the event stream closes or the service is gone.
fn spawn_auto_compact(
    inner: Weak<ServiceInner>,
    mut events: tokio::sync::mpsc::UnboundedReceiver<BatchEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let BatchEvent::Flushed { doc_name, .. } = event else {
                continue;
            };
            let Some(strong) = inner.upgrade() else {
                break;
            };
            let service = PersistenceService { inner: strong };
            if service.is_shutting_down() {
                break;
            }
            match service.compact_serialized(&doc_name, false).await {
                Ok(CompactOutcome::Compacted {
                    compacted_count, ..
                }) => {
                    tracing::debug!(
                        doc_name = %doc_name,
                        compacted_count,
                        "auto-compacted doc after flush"
                    );
                }
                Ok(CompactOutcome::Skipped { .. }) => {}
                // Persistence must not fail because compaction failed.
                Err(err) => {
                    tracing::warn!(doc_name = %doc_name, error = %err, "auto-compaction failed");
                }
            }
        }
    })
}

/// Appends flushed batches to the update log, with the standard retry
/// policy on transient failures.
struct LogSink {
    db: PersistenceDb,
}

#[async_trait::async_trait]
impl UpdateSink for LogSink {
    async fn append(
        &self,
        doc_name: &str,
        payload: &[u8],
        client_id: Option<&str>,
    ) -> Result<(), SinkError> {
        (|| self.db.append_update(doc_name, payload, client_id))
            .retry(retry::policy())
            .when(persistence_db::Error::is_retryable)
            .notify(retry::notify("update append"))
            .await
            .map(|_| ())
            .map_err(|err| Box::new(err) as SinkError)
    }
}

fn validate_doc_name(doc_name: &str) -> Result<(), Error> {
    if doc_name.trim().is_empty() {
        return Err(Error::Validation("doc name must not be empty".into()));
    }
    Ok(())
}
