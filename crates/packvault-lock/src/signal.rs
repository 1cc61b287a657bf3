//! Hangup-signal guard.
//!
//! Long-running operations keep a refresh loop alive for hours; a closing
//! terminal must not tear that down. The guard is a process-wide side effect,
//! so it is installed explicitly by the host application rather than as a
//! hidden initialization effect of this crate.

use std::sync::Once;

static HANGUP_GUARD: Once = Once::new();

/// Install a one-time, best-effort SIGHUP ignore.
///
/// Call once from within the application's async runtime, before long-running
/// operations start. Repeated calls are no-ops, as is the whole function on
/// platforms without hangup signals. Installation failures are logged and
/// otherwise ignored.
pub fn install_hangup_guard() {
    HANGUP_GUARD.call_once(|| {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            use tracing::{debug, warn};

            match signal(SignalKind::hangup()) {
                Ok(mut hangups) => {
                    tokio::spawn(async move {
                        while hangups.recv().await.is_some() {
                            debug!("ignoring SIGHUP");
                        }
                    });
                }
                Err(err) => warn!(error = %err, "failed to install hangup guard"),
            }
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_repeated_installation_is_safe() {
        install_hangup_guard();
        install_hangup_guard();
    }
}
