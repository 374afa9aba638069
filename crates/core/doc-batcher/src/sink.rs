//! The seam between the batching writer and the update log.

/// Boxed error returned by a sink implementation.
pub type SinkError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Destination for flushed update blobs.
///
/// The persistence layer implements this over the update log; tests use
/// in-memory fakes. A successful return means the blob is durably stored -
/// the batcher treats any error as "nothing was written" and requeues.
#[async_trait::async_trait]
pub trait UpdateSink: Send + Sync + 'static {
    /// Durably appends one update blob for a doc.
    async fn append(
        &self,
        doc_name: &str,
        payload: &[u8],
        client_id: Option<&str>,
    ) -> Result<(), SinkError>;
}
