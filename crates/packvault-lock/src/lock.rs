//! Repository lock lifecycle: acquisition, refresh, release.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use packvault_store::{ObjectId, ObjectKind, ObjectStore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::delay::{cancellable, cancellable_sleep, with_grace, UNLOCK_GRACE_PERIOD};
use crate::descriptor::LockDescriptor;
use crate::error::LockError;
use crate::probe::process_alive;
use crate::scan::check_for_other_locks;
use crate::LockConfig;

/// A process's lock on a repository.
///
/// There are two kinds of locks: exclusive and non-exclusive. Any number of
/// non-exclusive locks may coexist, but an exclusive lock tolerates no
/// neighbours of either kind. A held lock must be [refreshed](Self::refresh)
/// regularly or other clients will eventually consider it stale.
///
/// Only the stamp time and the store id change over a lock's life; both sit
/// behind a mutex so a refresh timer and a releasing caller may run from
/// different threads.
pub struct Lock {
    exclusive: bool,
    hostname: String,
    username: String,
    pid: u32,
    uid: u32,
    gid: u32,
    state: Mutex<LockState>,
    store: Arc<dyn ObjectStore>,
    config: LockConfig,
}

#[derive(Debug, Clone, Copy)]
struct LockState {
    time: DateTime<Utc>,
    id: Option<ObjectId>,
}

impl Lock {
    /// Acquire a new lock on the repository.
    ///
    /// Conflict detection is two-phased: the lock namespace is scanned before
    /// our descriptor is written and scanned again after a settle delay, so
    /// that two racing acquirers see each other even on a backend that only
    /// offers eventual visibility. When the second scan finds a conflict our
    /// own descriptor is removed again before the error is returned; both
    /// sides of a symmetric race therefore fail, and retrying is left to the
    /// caller.
    ///
    /// # Errors
    ///
    /// [`LockError::AlreadyLocked`] when a conflicting lock is present,
    /// [`LockError::InvalidLock`] when the namespace holds undecodable
    /// objects, [`LockError::Store`] for persistent transport failures and
    /// [`LockError::Cancelled`] when the token fires. In the latter case any
    /// descriptor we already published is removed under the cleanup grace
    /// window.
    pub async fn acquire(
        cancel: &CancellationToken,
        store: Arc<dyn ObjectStore>,
        exclusive: bool,
        config: LockConfig,
    ) -> Result<Self, LockError> {
        let descriptor = LockDescriptor::capture(exclusive);
        debug!(exclusive, pid = descriptor.pid, "acquiring repository lock");

        check_for_other_locks(cancel, store.as_ref(), exclusive, None, &config).await?;

        let lock = Self::from_descriptor(&descriptor, None, store, config);
        let id = lock.save_descriptor(cancel, &descriptor).await?;
        debug!(id = %id.short(), "lock published");
        lock.state().id = Some(id);

        if let Err(err) = lock.post_publish_check(cancel).await {
            // Roll our descriptor back; cleanup still gets the grace window.
            let _ = lock.release(cancel).await;
            return Err(err);
        }
        Ok(lock)
    }

    pub(crate) fn from_descriptor(
        descriptor: &LockDescriptor,
        id: Option<ObjectId>,
        store: Arc<dyn ObjectStore>,
        config: LockConfig,
    ) -> Self {
        Self {
            exclusive: descriptor.exclusive,
            hostname: descriptor.hostname.clone(),
            username: descriptor.username.clone(),
            pid: descriptor.pid,
            uid: descriptor.uid,
            gid: descriptor.gid,
            state: Mutex::new(LockState {
                time: descriptor.time,
                id,
            }),
            store,
            config,
        }
    }

    async fn post_publish_check(&self, cancel: &CancellationToken) -> Result<(), LockError> {
        // Peer descriptors written concurrently with ours need a moment to
        // become listable.
        cancellable_sleep(cancel, self.config.settle_delay).await?;
        check_for_other_locks(
            cancel,
            self.store.as_ref(),
            self.exclusive,
            self.id(),
            &self.config,
        )
        .await
    }

    /// Replace the lock object in the store with a freshly stamped one.
    ///
    /// Callers invoke this on a schedule to keep the lock from going stale.
    /// The new descriptor is written first and the superseded one removed
    /// afterwards, under the cleanup grace window so a cancellation between
    /// the two steps does not strand the old object. Refreshing a lock that
    /// is not currently held does nothing.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<(), LockError> {
        if self.id().is_none() {
            debug!("refresh on a lock that is not held; nothing to do");
            return Ok(());
        }

        let time = Utc::now();
        self.state().time = time;
        let new_id = self.save_descriptor(cancel, &self.snapshot(time)).await?;
        let old_id = self.state().id.replace(new_id);
        debug!(new_id = %new_id.short(), "lock refreshed");

        match old_id {
            Some(old_id) => self.remove_with_grace(cancel, old_id).await,
            None => Ok(()),
        }
    }

    /// Variant of [`refresh`](Self::refresh) for a lock that may already have
    /// been classified stale and removed by another client.
    ///
    /// Reviving is only sound while our original lock object still exists:
    /// once it is gone a peer may have concluded the repository is free and
    /// begun an exclusive operation. The original's existence is therefore
    /// proven before the replacement is written and proven *again* after the
    /// settle delay; if the second proof fails the replacement is removed and
    /// [`LockError::LockVanished`] is returned, leaving the caller to
    /// re-acquire from scratch.
    pub async fn refresh_stale(&self, cancel: &CancellationToken) -> Result<(), LockError> {
        let Some(old_id) = self.id() else {
            return Err(LockError::LockVanished);
        };
        if !self.check_existence(cancel, old_id).await? {
            return Err(LockError::LockVanished);
        }

        let time = Utc::now();
        self.state().time = time;
        let new_id = self.save_descriptor(cancel, &self.snapshot(time)).await?;

        let verdict = match cancellable_sleep(cancel, self.config.settle_delay).await {
            Ok(()) => self.check_existence(cancel, old_id).await,
            Err(err) => Err(err),
        };
        match verdict {
            Ok(true) => {}
            Ok(false) => {
                let _ = self.remove_with_grace(cancel, new_id).await;
                return Err(LockError::LockVanished);
            }
            Err(err) => {
                let _ = self.remove_with_grace(cancel, new_id).await;
                return Err(err);
            }
        }

        let old_id = self.state().id.replace(new_id);
        debug!(new_id = %new_id.short(), "stale lock revived");
        match old_id {
            Some(old_id) => self.remove_with_grace(cancel, old_id).await,
            None => Ok(()),
        }
    }

    /// Remove the lock from the repository.
    ///
    /// Idempotent: releasing a lock that was never published, or was already
    /// released, is a no-op. The store call runs under the cleanup grace
    /// window, so a lock still gets released while the surrounding operation
    /// is being torn down by ^C.
    pub async fn release(&self, cancel: &CancellationToken) -> Result<(), LockError> {
        let Some(id) = self.state().id.take() else {
            return Ok(());
        };
        debug!(id = %id.short(), "releasing lock");
        self.remove_with_grace(cancel, id).await
    }

    /// Whether this lock should be considered abandoned.
    ///
    /// A lock is stale when its stamp time is older than the configured
    /// threshold, or when it was created on the current host by a process
    /// that no longer runs. When the current hostname cannot be determined
    /// the lock is kept: liveness of the holder cannot be judged, and age
    /// alone has not condemned it. Liveness of holders on *other* hosts is
    /// unknowable here, so for those only age applies.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        let time = self.state().time;
        let threshold = chrono::Duration::from_std(self.config.stale_timeout)
            .unwrap_or(chrono::Duration::MAX);
        if Utc::now() - time > threshold {
            debug!(pid = self.pid, "lock is stale, stamp is too old");
            return true;
        }

        let Ok(current) = hostname::get() else {
            return false;
        };
        if current.to_string_lossy() != self.hostname {
            return false;
        }

        if !process_alive(self.pid) {
            debug!(pid = self.pid, "lock holder process is gone, lock is stale");
            return true;
        }
        false
    }

    /// Store id of the published lock object, while one is held.
    #[must_use]
    pub fn id(&self) -> Option<ObjectId> {
        self.state().id
    }

    /// Time the lock was last stamped.
    #[must_use]
    pub fn time(&self) -> DateTime<Utc> {
        self.state().time
    }

    /// Whether this is a writer lock.
    #[must_use]
    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    /// Wire descriptor for the lock's current stamp time.
    fn snapshot(&self, time: DateTime<Utc>) -> LockDescriptor {
        LockDescriptor {
            time,
            exclusive: self.exclusive,
            hostname: self.hostname.clone(),
            username: self.username.clone(),
            pid: self.pid,
            uid: self.uid,
            gid: self.gid,
        }
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn save_descriptor(
        &self,
        cancel: &CancellationToken,
        descriptor: &LockDescriptor,
    ) -> Result<ObjectId, LockError> {
        let bytes =
            serde_json::to_vec(descriptor).map_err(|source| LockError::Encode { source })?;
        cancellable(cancel, self.store.save(ObjectKind::Lock, bytes)).await
    }

    async fn check_existence(
        &self,
        cancel: &CancellationToken,
        id: ObjectId,
    ) -> Result<bool, LockError> {
        let entries = cancellable(cancel, self.store.list(ObjectKind::Lock)).await?;
        Ok(entries.into_iter().any(|(listed, _)| listed == id))
    }

    async fn remove_with_grace(
        &self,
        cancel: &CancellationToken,
        id: ObjectId,
    ) -> Result<(), LockError> {
        match with_grace(
            cancel,
            UNLOCK_GRACE_PERIOD,
            self.store.remove(ObjectKind::Lock, id),
        )
        .await
        {
            Some(res) => Ok(res?),
            None => Err(LockError::Cancelled),
        }
    }
}

impl fmt::Display for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let LockState { time, id } = *self.state();
        write!(f, "{}", self.snapshot(time))?;
        if let Some(id) = id {
            write!(f, "\nstorage ID {}", id.short())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let LockState { time, id } = *self.state();
        f.debug_struct("Lock")
            .field("exclusive", &self.exclusive)
            .field("hostname", &self.hostname)
            .field("pid", &self.pid)
            .field("time", &time)
            .field("id", &id)
            .finish_non_exhaustive()
    }
}

/// Load a lock someone else holds, for inspection.
///
/// The returned value carries the foreign holder's identity, keeps the given
/// id, and can be formatted and staleness-classified, but of course must not
/// be refreshed or released by us unless we have independently concluded it
/// is abandoned.
pub async fn load_lock(
    cancel: &CancellationToken,
    store: Arc<dyn ObjectStore>,
    id: ObjectId,
) -> Result<Lock, LockError> {
    let bytes = cancellable(cancel, store.load(ObjectKind::Lock, id)).await?;
    let descriptor: LockDescriptor =
        serde_json::from_slice(&bytes).map_err(|source| LockError::InvalidLock { id, source })?;
    Ok(Lock::from_descriptor(
        &descriptor,
        Some(id),
        store,
        LockConfig::default(),
    ))
}
