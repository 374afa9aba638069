//! Observability events emitted by the batching writer.

/// Why a flush ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The debounce quiet-period elapsed.
    Debounce,
    /// The hard per-batch deadline elapsed.
    Deadline,
    /// The pending byte total reached `max_batch_bytes`.
    Size,
    /// The pending update count reached `max_batch_count`.
    Count,
    /// An explicit `flush_doc` / `flush_all` call.
    Manual,
    /// The drain performed during shutdown.
    Shutdown,
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlushReason::Debounce => "debounce",
            FlushReason::Deadline => "deadline",
            FlushReason::Size => "size",
            FlushReason::Count => "count",
            FlushReason::Manual => "manual",
            FlushReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Event stream for tests and diagnostics.
///
/// Nothing is emitted unless a subscriber was registered with
/// [`crate::DocBatcher::subscribe_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    /// An update was queued for a doc.
    Enqueued {
        doc_name: String,
        queue_len: usize,
        queue_bytes: usize,
    },
    /// A batch was durably written.
    Flushed {
        doc_name: String,
        update_count: usize,
        final_bytes: usize,
        reason: FlushReason,
    },
    /// The batcher finished its shutdown drain.
    Shutdown,
}
