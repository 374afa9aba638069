//! Per-process batching counters.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::events::FlushReason;

/// Shared atomic counters updated on the hot path.
///
/// Readers take a [`MetricsSnapshot`]; the counters themselves are never
/// reset for the lifetime of the process.
#[derive(Debug, Default)]
pub struct BatcherMetrics {
    enqueued: AtomicU64,
    flushed_batches: AtomicU64,
    appended_records: AtomicU64,
    flush_debounce: AtomicU64,
    flush_deadline: AtomicU64,
    flush_size: AtomicU64,
    flush_count: AtomicU64,
    flush_manual: AtomicU64,
    flush_shutdown: AtomicU64,
    errors: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    last_flush_unix_ms: AtomicU64,
}

impl BatcherMetrics {
    pub(crate) fn record_enqueue(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(
        &self,
        reason: FlushReason,
        appended: u64,
        bytes_in: u64,
        bytes_out: u64,
    ) {
        self.flushed_batches.fetch_add(1, Ordering::Relaxed);
        self.appended_records.fetch_add(appended, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
        let counter = match reason {
            FlushReason::Debounce => &self.flush_debounce,
            FlushReason::Deadline => &self.flush_deadline,
            FlushReason::Size => &self.flush_size,
            FlushReason::Count => &self.flush_count,
            FlushReason::Manual => &self.flush_manual,
            FlushReason::Shutdown => &self.flush_shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.last_flush_unix_ms.store(now_ms, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A point-in-time copy of all counters with the derived ratios.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let enqueued = self.enqueued.load(Ordering::Relaxed);
        let flushed_batches = self.flushed_batches.load(Ordering::Relaxed);
        let appended_records = self.appended_records.load(Ordering::Relaxed);
        let bytes_in = self.bytes_in.load(Ordering::Relaxed);
        let bytes_out = self.bytes_out.load(Ordering::Relaxed);

        MetricsSnapshot {
            enqueued,
            flushed_batches,
            appended_records,
            coalesced: enqueued.saturating_sub(appended_records),
            flush_debounce: self.flush_debounce.load(Ordering::Relaxed),
            flush_deadline: self.flush_deadline.load(Ordering::Relaxed),
            flush_size: self.flush_size.load(Ordering::Relaxed),
            flush_count: self.flush_count.load(Ordering::Relaxed),
            flush_manual: self.flush_manual.load(Ordering::Relaxed),
            flush_shutdown: self.flush_shutdown.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_in,
            bytes_out,
            average_batch_size: if flushed_batches == 0 {
                0.0
            } else {
                enqueued as f64 / flushed_batches as f64
            },
            compression_ratio: if bytes_out == 0 {
                1.0
            } else {
                bytes_in as f64 / bytes_out as f64
            },
            last_flush_unix_ms: self.last_flush_unix_ms.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the batching counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    /// Updates accepted by `enqueue` (including shutdown-mode bypasses)
    pub enqueued: u64,
    /// Batches durably written
    pub flushed_batches: u64,
    /// Update records actually appended to the log
    pub appended_records: u64,
    /// Updates saved by coalescing (`enqueued - appended_records`)
    pub coalesced: u64,
    /// Flushes triggered by the debounce timer
    pub flush_debounce: u64,
    /// Flushes triggered by the hard deadline timer
    pub flush_deadline: u64,
    /// Flushes triggered by the byte bound
    pub flush_size: u64,
    /// Flushes triggered by the count bound
    pub flush_count: u64,
    /// Explicitly requested flushes
    pub flush_manual: u64,
    /// Flushes performed during the shutdown drain
    pub flush_shutdown: u64,
    /// Failed flush attempts (updates were requeued, not lost)
    pub errors: u64,
    /// Payload bytes entering the batcher
    pub bytes_in: u64,
    /// Payload bytes written to the log after coalescing
    pub bytes_out: u64,
    /// `enqueued / flushed_batches`
    pub average_batch_size: f64,
    /// `bytes_in / bytes_out`; > 1 means coalescing is paying off
    pub compression_ratio: f64,
    /// Unix timestamp (ms) of the most recent successful flush
    pub last_flush_unix_ms: u64,
}
