//! Conflict scanning over the repository's lock namespace.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use packvault_store::{ObjectId, ObjectKind, ObjectStore, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::delay::{cancellable, cancellable_sleep};
use crate::descriptor::LockDescriptor;
use crate::error::LockError;
use crate::LockConfig;

/// Attempts the scanner makes before surfacing transient failures.
const SCAN_ATTEMPTS: u32 = 4;

/// Enumerate all lock objects and feed them to `cb`.
///
/// Loads run in parallel, bounded by the backend's advertised connection
/// count; the callback itself is never invoked concurrently. Ids in
/// `exclude` and zero-byte placeholders are skipped, and a lock that
/// disappears between listing and loading is treated as released rather than
/// as an error. The callback receives the decode result per lock; returning
/// an error stops the enumeration and propagates it.
pub async fn for_all_locks<F>(
    cancel: &CancellationToken,
    store: &dyn ObjectStore,
    exclude: &HashSet<ObjectId>,
    mut cb: F,
) -> Result<(), LockError>
where
    F: FnMut(ObjectId, Result<LockDescriptor, LockError>) -> Result<(), LockError>,
{
    let entries = cancellable(cancel, store.list(ObjectKind::Lock)).await?;
    let pending: Vec<ObjectId> = entries
        .into_iter()
        // Interrupted uploads may leave empty placeholders; nobody holds those.
        .filter(|(id, size)| *size > 0 && !exclude.contains(id))
        .map(|(id, _)| id)
        .collect();

    // Lock objects are tiny and decoding is practically free, so the limit
    // only needs to track what the backend handles well in parallel.
    let mut loads = stream::iter(pending)
        .map(|id| async move { (id, load_descriptor(store, id).await) })
        .buffer_unordered(store.connections().max(1));

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return Err(LockError::Cancelled),
            item = loads.next() => item,
        };
        let Some((id, loaded)) = next else { break };
        match loaded {
            Err(LockError::Store(StoreError::NotFound { .. })) => {
                debug!(id = %id.short(), "lock disappeared mid-scan");
            }
            res => cb(id, res)?,
        }
    }
    Ok(())
}

/// Load and decode a single lock descriptor.
pub(crate) async fn load_descriptor(
    store: &dyn ObjectStore,
    id: ObjectId,
) -> Result<LockDescriptor, LockError> {
    let bytes = store.load(ObjectKind::Lock, id).await?;
    serde_json::from_slice(&bytes).map_err(|source| LockError::InvalidLock { id, source })
}

/// Look for locks that conflict with the lock we hold or want.
///
/// A would-be writer conflicts with any other lock; a would-be reader only
/// with writers. Conflicts are permanent: they are returned immediately
/// without using up the retry budget. Transient failures are retried up to
/// [`SCAN_ATTEMPTS`] times with a doubling, cancellable backoff; locks proven
/// compatible in one attempt are not fetched again in the next.
pub(crate) async fn check_for_other_locks(
    cancel: &CancellationToken,
    store: &dyn ObjectStore,
    want_exclusive: bool,
    own_id: Option<ObjectId>,
    config: &LockConfig,
) -> Result<(), LockError> {
    let mut checked: HashSet<ObjectId> = own_id.into_iter().collect();
    let mut delay = config.initial_retry_delay;
    let mut last_transport: Option<LockError> = None;

    for attempt in 0..SCAN_ATTEMPTS {
        if attempt != 0 {
            // Give the backend some time to settle before looking again.
            cancellable_sleep(cancel, delay).await?;
            delay *= 2;
        }

        let mut survivors = checked.clone();
        let mut invalid: Option<LockError> = None;
        let mut transport: Option<LockError> = None;

        let outcome = for_all_locks(cancel, store, &checked, |id, loaded| match loaded {
            Ok(other) => {
                if want_exclusive || other.exclusive {
                    return Err(LockError::AlreadyLocked {
                        holder: Box::new(other),
                        holder_id: id,
                    });
                }
                // Valid compatible locks stay compatible; skip them next time.
                survivors.insert(id);
                Ok(())
            }
            Err(err @ LockError::InvalidLock { .. }) => {
                debug!(id = %id.short(), error = %err, "undecodable lock object");
                invalid.get_or_insert(err);
                Ok(())
            }
            Err(err) => {
                transport.get_or_insert(err);
                Ok(())
            }
        })
        .await;

        checked = survivors;

        match outcome {
            Ok(()) => {}
            Err(err @ (LockError::AlreadyLocked { .. } | LockError::Cancelled)) => return Err(err),
            Err(err) => {
                debug!(attempt, error = %err, "lock listing failed");
                last_transport = Some(err);
                continue;
            }
        }

        if let Some(err) = transport {
            debug!(attempt, error = %err, "lock scan hit transient load failures");
            last_transport = Some(err);
            continue;
        }
        if let Some(err) = invalid {
            return Err(err);
        }
        return Ok(());
    }

    Err(last_transport
        .unwrap_or_else(|| StoreError::backend("lock scan retries exhausted").into()))
}
