//! In-memory store backend.
//!
//! Keeps every object in a map guarded by a mutex. Strongly consistent, so
//! tests exercising the coordination protocol can drive it with very short
//! settle delays. Offers a couple of seams real backends do not: raw object
//! injection (for placing malformed or empty objects) and scripted load
//! failures (for simulating flaky transports).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::{ObjectId, ObjectKind, ObjectStore, StoreError};

/// Map-backed [`ObjectStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(ObjectKind, ObjectId), Vec<u8>>>,
    // Number of upcoming load calls that should fail with a transport error.
    load_faults: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<(ObjectKind, ObjectId), Vec<u8>>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Place raw bytes directly, bypassing nothing but the async machinery.
    ///
    /// Useful for injecting zero-byte placeholders or malformed objects.
    pub fn insert_raw(&self, kind: ObjectKind, data: &[u8]) -> ObjectId {
        let id = ObjectId::hash(data);
        self.objects().insert((kind, id), data.to_vec());
        id
    }

    /// Arrange for the next `n` `load` calls to fail with a transport error.
    pub fn fail_next_loads(&self, n: usize) {
        self.load_faults.store(n, Ordering::SeqCst);
    }

    /// Whether an object of the given kind and id is present.
    #[must_use]
    pub fn contains(&self, kind: ObjectKind, id: ObjectId) -> bool {
        self.objects().contains_key(&(kind, id))
    }

    /// Number of objects of the given kind.
    #[must_use]
    pub fn count(&self, kind: ObjectKind) -> usize {
        self.objects().keys().filter(|(k, _)| *k == kind).count()
    }

    /// Ids of all objects of the given kind, in byte order.
    #[must_use]
    pub fn ids(&self, kind: ObjectKind) -> Vec<ObjectId> {
        self.objects()
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| *id)
            .collect()
    }

    fn take_load_fault(&self) -> bool {
        self.load_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, kind: ObjectKind) -> Result<Vec<(ObjectId, u64)>, StoreError> {
        Ok(self
            .objects()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, id), data)| (*id, data.len() as u64))
            .collect())
    }

    async fn load(&self, kind: ObjectKind, id: ObjectId) -> Result<Vec<u8>, StoreError> {
        if self.take_load_fault() {
            return Err(StoreError::backend("injected load failure"));
        }
        self.objects()
            .get(&(kind, id))
            .cloned()
            .ok_or(StoreError::NotFound { kind, id })
    }

    async fn save(&self, kind: ObjectKind, data: Vec<u8>) -> Result<ObjectId, StoreError> {
        let id = ObjectId::hash(&data);
        self.objects().entry((kind, id)).or_insert(data);
        Ok(id)
    }

    async fn remove(&self, kind: ObjectKind, id: ObjectId) -> Result<(), StoreError> {
        self.objects().remove(&(kind, id));
        Ok(())
    }
}
