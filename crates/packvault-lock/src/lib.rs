//! Repository locking for packvault
//!
//! Independent packvault processes, possibly on different hosts, coordinate
//! access to a shared repository through lock objects kept in the repository
//! itself; there is no central coordinator. Writers (prune, forget) take an
//! exclusive lock, readers (backup, restore, check) take non-exclusive ones,
//! and the usual readers-writer rules apply at repository granularity.
//!
//! The object store offers no compare-and-swap, so acquisition is two-phased:
//! scan, publish our descriptor, wait a settle delay, scan again. A held lock
//! is refreshed periodically by replacing its object with a freshly stamped
//! one, and locks whose stamp is old or whose local holder process has died
//! are classified stale so crashed clients cannot block the repository
//! forever.

mod delay;
mod descriptor;
mod error;
mod lock;
mod probe;
mod scan;
mod signal;

use std::time::Duration;

pub use delay::UNLOCK_GRACE_PERIOD;
pub use descriptor::LockDescriptor;
pub use error::LockError;
pub use lock::{load_lock, Lock};
pub use scan::for_all_locks;
pub use signal::install_hangup_guard;

/// Tunables of the locking protocol.
///
/// Passed to [`Lock::acquire`] and inherited by the resulting lock. The
/// defaults are meant for real repositories; tests driving a local store use
/// [`LockConfig::fast`] instead of mutating process-wide state.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Pause between publishing our descriptor and re-scanning, so that a
    /// peer's concurrent write has time to become visible.
    pub settle_delay: Duration,
    /// First backoff of the conflict scanner's retry loop; doubles on every
    /// further retry.
    pub initial_retry_delay: Duration,
    /// Age at which a lock is considered stale regardless of its holder.
    pub stale_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(200),
            initial_retry_delay: Duration::from_secs(5),
            stale_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl LockConfig {
    /// Configuration with near-zero delays, for tests driving a local store.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            settle_delay: Duration::from_millis(1),
            initial_retry_delay: Duration::from_millis(5),
            ..Self::default()
        }
    }
}
