//! Object store contract for packvault repositories
//!
//! A repository is a flat namespace of opaque, content-addressed objects kept
//! on a remote backend. This crate defines the id type, the kind namespacing,
//! and the [`ObjectStore`] trait consumed by the higher layers, together with
//! an in-memory backend used by tests.
//!
//! The contract is deliberately small: backends offer list, load, save and
//! remove of whole objects. There is no compare-and-swap, and visibility of a
//! freshly saved object on other clients is only eventual.

mod id;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use id::{ObjectId, ID_LEN};
pub use memory::MemoryStore;

/// Namespace of an object within a repository.
///
/// Kinds keep coordination objects (locks) apart from data objects; backends
/// typically map each kind to its own prefix or directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    /// Coordination locks. See the `packvault-lock` crate.
    Lock,
    /// Snapshot records describing a completed backup run.
    Snapshot,
    /// Index objects mapping blob ids to pack files.
    Index,
    /// Pack files holding the actual data blobs.
    Pack,
}

impl ObjectKind {
    /// Directory name used by path-shaped backends for this kind.
    #[must_use]
    pub const fn dirname(self) -> &'static str {
        match self {
            ObjectKind::Lock => "locks",
            ObjectKind::Snapshot => "snapshots",
            ObjectKind::Index => "index",
            ObjectKind::Pack => "packs",
        }
    }
}

/// Errors surfaced by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested object does not exist (or no longer exists).
    #[error("{kind:?} object {} not found", .id.short())]
    NotFound {
        /// Namespace that was queried.
        kind: ObjectKind,
        /// Id that was requested.
        id: ObjectId,
    },

    /// Transient transport-level failure talking to the backend.
    #[error("backend request failed: {reason}")]
    Backend {
        /// Human-readable failure description.
        reason: String,
    },
}

impl StoreError {
    /// Shorthand for a transport failure with the given description.
    #[must_use]
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }
}

/// Capabilities a repository backend offers to the coordination layer.
///
/// Implementations must serialize concurrent writes to distinct ids safely
/// and tolerate concurrent removes. Saved objects become visible to `list`
/// on well-behaved backends within a short settle window; callers that need
/// read-after-write across processes must account for that delay.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Enumerate all objects of a kind as `(id, size)` pairs.
    ///
    /// Zero-size entries are real: interrupted uploads may leave empty
    /// placeholders behind, and callers decide how to treat them.
    async fn list(&self, kind: ObjectKind) -> Result<Vec<(ObjectId, u64)>, StoreError>;

    /// Load the raw bytes of one object.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the object vanished and
    /// [`StoreError::Backend`] for transport failures. Decoding the bytes is
    /// the caller's concern.
    async fn load(&self, kind: ObjectKind, id: ObjectId) -> Result<Vec<u8>, StoreError>;

    /// Save a new object, returning its content-addressed id.
    ///
    /// Existing objects are never overwritten; saving identical bytes is
    /// idempotent and yields the same id.
    async fn save(&self, kind: ObjectKind, data: Vec<u8>) -> Result<ObjectId, StoreError>;

    /// Remove an object. Removing an absent object is not an error.
    async fn remove(&self, kind: ObjectKind, id: ObjectId) -> Result<(), StoreError>;

    /// Advisory hint for how many requests the backend handles well in
    /// parallel.
    fn connections(&self) -> usize {
        5
    }
}
