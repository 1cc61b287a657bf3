//! Error types for repository locking.

use packvault_store::{ObjectId, StoreError};
use thiserror::Error;

use crate::descriptor::LockDescriptor;

/// Errors returned by lock acquisition, refresh and release.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds a conflicting lock.
    ///
    /// Permanent within one acquisition attempt; callers decide whether and
    /// when to try again.
    #[error("{}", already_locked_message(.holder, .holder_id))]
    AlreadyLocked {
        /// Descriptor of the conflicting holder, for diagnostics.
        holder: Box<LockDescriptor>,
        /// Store id of the conflicting lock object.
        holder_id: ObjectId,
    },

    /// A lock object in the repository failed to decode.
    #[error("invalid lock object {}: {source}; consider repairing the repository", .id.short())]
    InvalidLock {
        /// Id of the undecodable object.
        id: ObjectId,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// Our own lock object disappeared from the store while we were trying
    /// to revive it. The lock is gone for good; re-acquire instead.
    #[error("lock was removed in the meantime")]
    LockVanished,

    /// Encoding our own descriptor failed. Not expected for well-formed
    /// descriptors.
    #[error("failed to encode lock descriptor: {source}")]
    Encode {
        /// Underlying encode failure.
        #[source]
        source: serde_json::Error,
    },

    /// Transport-level store failure that survived the scanner's retries.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl LockError {
    /// Whether this error reports a conflicting lock held by someone else.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyLocked { .. })
    }

    /// Whether this error reports an undecodable lock object.
    #[must_use]
    pub fn is_invalid_lock(&self) -> bool {
        matches!(self, Self::InvalidLock { .. })
    }
}

fn already_locked_message(holder: &LockDescriptor, holder_id: &ObjectId) -> String {
    let mode = if holder.exclusive { "exclusively " } else { "" };
    format!(
        "repository is already locked {mode}by {holder}\nstorage ID {}",
        holder_id.short()
    )
}
