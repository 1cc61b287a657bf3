//! Cancellation-aware sleeps and grace windows.

use std::future::Future;
use std::time::Duration;

use packvault_store::StoreError;
use tokio_util::sync::CancellationToken;

use crate::error::LockError;

/// How long cleanup operations may keep running after their caller was
/// cancelled, so that a ^C during an operation still leaves the repository
/// without leftover lock objects.
pub const UNLOCK_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Sleep for `duration`, returning early when the token fires first.
pub(crate) async fn cancellable_sleep(
    cancel: &CancellationToken,
    duration: Duration,
) -> Result<(), LockError> {
    tokio::select! {
        () = cancel.cancelled() => Err(LockError::Cancelled),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Run a store operation, abandoning it when the token fires first.
///
/// An operation that is already complete wins over a simultaneous
/// cancellation; work the backend has finished is not thrown away.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    op: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, LockError> {
    tokio::select! {
        biased;
        res = op => Ok(res?),
        () = cancel.cancelled() => Err(LockError::Cancelled),
    }
}

/// Run a cleanup operation that outlives cancellation by a bounded window.
///
/// The operation proceeds normally while the token is untriggered. Once the
/// token fires it is granted `grace` more to finish; `None` is returned when
/// even that window expires.
pub(crate) async fn with_grace<T>(
    cancel: &CancellationToken,
    grace: Duration,
    op: impl Future<Output = T>,
) -> Option<T> {
    tokio::pin!(op);
    tokio::select! {
        biased;
        out = &mut op => Some(out),
        () = cancel.cancelled() => tokio::time::timeout(grace, &mut op).await.ok(),
    }
}
