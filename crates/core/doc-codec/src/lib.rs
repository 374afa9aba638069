//! Opaque codec over CRDT update and snapshot blobs.
//!
//! The persistence core treats document payloads as opaque byte sequences
//! everywhere except here. This crate wraps the `yrs` CRDT library behind
//! three primitives:
//!
//! - [`merge_updates`]: combine several update blobs into one semantically
//!   equivalent (typically smaller) blob. Used by the batching writer to
//!   coalesce a batch before it is appended to the update log.
//! - [`DocState`]: an in-memory document that update blobs can be folded
//!   into, and whose full state can be re-encoded. Used by compaction and by
//!   `load` when no snapshot exists.
//! - [`fold`]: snapshot + updates → single full-state blob.
//!
//! Update blobs carry the Yjs v1 update encoding. Merging is associative and
//! order-independent over blobs targeting the same logical document; callers
//! that receive a [`CodecError`] must treat it as non-retryable (the blob is
//! malformed, retrying cannot help).

use yrs::{
    Doc, ReadTxn, StateVector, Transact, Update,
    updates::{decoder::Decode, encoder::Encode},
};

/// An update or snapshot blob could not be decoded or applied.
///
/// Non-retryable: the input bytes are malformed. The batching writer falls
/// back to persisting blobs individually; read paths surface this to the
/// caller.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The blob is not a valid v1-encoded update.
    #[error("malformed update blob: {0}")]
    Decode(#[from] yrs::encoding::read::Error),

    /// The update decoded but could not be integrated into the document.
    #[error("update could not be applied: {0}")]
    Apply(#[from] yrs::error::UpdateError),
}

/// Merges several update blobs into a single equivalent update blob.
///
/// Order of the inputs does not matter. An empty input yields the encoding of
/// an empty update, which applies as a no-op.
pub fn merge_updates<T: AsRef<[u8]>>(blobs: &[T]) -> Result<Vec<u8>, CodecError> {
    let updates = blobs
        .iter()
        .map(|blob| Update::decode_v1(blob.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Update::merge_updates(updates).encode_v1())
}

/// An in-memory CRDT document that blobs can be folded into.
///
/// Both snapshot blobs (full-state encodings) and incremental update blobs
/// apply the same way; a snapshot is simply an update against the empty
/// state.
pub struct DocState {
    doc: Doc,
}

impl DocState {
    /// A fresh, empty document.
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Folds one blob into the document.
    pub fn apply(&mut self, blob: &[u8]) -> Result<(), CodecError> {
        let update = Update::decode_v1(blob)?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)?;
        Ok(())
    }

    /// Encodes the full document state as a snapshot blob.
    ///
    /// The result is a v1 update against the empty state vector, so it can
    /// later be re-applied to a fresh [`DocState`] (or merged with further
    /// updates) without special handling.
    pub fn encode_full(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }
}

impl Default for DocState {
    fn default() -> Self {
        Self::new()
    }
}

/// Rebuilds full document state from an optional snapshot plus updates.
///
/// Applies the snapshot first (if any), then each update, and re-encodes the
/// result. This is the reconstruction step shared by `load` and compaction.
pub fn fold<T: AsRef<[u8]>>(
    snapshot: Option<&[u8]>,
    updates: impl IntoIterator<Item = T>,
) -> Result<Vec<u8>, CodecError> {
    let mut state = DocState::new();
    if let Some(blob) = snapshot {
        state.apply(blob)?;
    }
    for update in updates {
        state.apply(update.as_ref())?;
    }
    Ok(state.encode_full())
}
