//! Error taxonomy for the persistence service.
//!
//! One sum type covering every failure kind the service surfaces. The HTTP
//! layer maps variants to status codes; nothing here carries transport
//! concerns.

/// Errors surfaced by [`crate::PersistenceService`] operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad input: empty doc name, empty payload, malformed doc-name prefix.
    /// Caller fault, never retryable.
    #[error("validation error: {0}")]
    Validation(String),

    /// A hard delete was requested without the confirmation token.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// The addressed entity does not exist. Most lookups return `None`
    /// instead; only deletes of missing notes report this.
    #[error("not found: {0}")]
    NotFound(String),

    /// Terminal database failure, after the retry budget is spent.
    #[error("storage error: {0}")]
    Storage(#[from] persistence_db::Error),

    /// A batcher flush failed; the affected updates were requeued.
    #[error("storage error during flush: {0}")]
    Flush(#[from] doc_batcher::FlushError),

    /// A stored or submitted blob is not a valid CRDT update/snapshot.
    /// Never retryable.
    #[error("codec error: {0}")]
    Codec(#[from] doc_codec::CodecError),

    /// Invalid configuration rejected at construction time.
    #[error("config error: {0}")]
    Config(#[from] doc_batcher::ConfigError),

    /// The operation cannot be serviced because shutdown is in progress.
    #[error("service is shutting down")]
    ShuttingDown,
}

impl From<doc_batcher::EnqueueError> for Error {
    fn from(err: doc_batcher::EnqueueError) -> Self {
        // Only produced by shutdown-mode synchronous appends; a sink failure
        // there is a storage failure from the caller's perspective.
        match err {
            doc_batcher::EnqueueError::Sink(inner) => match inner.downcast() {
                Ok(db_err) => Error::Storage(*db_err),
                Err(other) => Error::Flush(doc_batcher::FlushError::Sink(other)),
            },
        }
    }
}
