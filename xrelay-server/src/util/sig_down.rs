//! Graceful shutdown on OS signals.
//!
//! [`SigDown`] spawns one task that waits for SIGTERM or SIGINT (Ctrl-C on
//! Windows) and cancels a shared [`CancellationToken`]. The HTTP server and
//! any background work stop on that token. Cancelling the token from inside
//! the process ends the watcher task as well.

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Shutdown coordinator for the relay server.
#[allow(missing_debug_implementations)] // TaskTracker has no Debug
pub struct SigDown {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl SigDown {
    /// Installs the signal handlers and starts the watcher task.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::Error`] if a signal handler cannot be registered.
    #[allow(clippy::unnecessary_wraps)] // registration only fails on unix
    pub fn try_new() -> Result<Self, std::io::Error> {
        let token = CancellationToken::new();
        let watched = token.clone();
        let tracker = TaskTracker::new();

        #[cfg(unix)]
        {
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            tracker.spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                    _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
                    () = watched.cancelled() => return,
                }
                watched.cancel();
            });
        }

        #[cfg(not(unix))]
        {
            tracker.spawn(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("received Ctrl-C, shutting down"),
                    () = watched.cancelled() => return,
                }
                watched.cancel();
            });
        }

        tracker.close();
        Ok(Self { tracker, token })
    }

    /// A handle on the shutdown token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits until shutdown was requested and the watcher task has exited.
    pub async fn recv(&self) {
        self.token.cancelled().await;
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_internal_cancel_releases_recv() {
        let sig = SigDown::try_new().unwrap();
        let token = sig.cancellation_token();
        assert!(!token.is_cancelled());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), sig.recv())
            .await
            .unwrap();
        assert!(sig.cancellation_token().is_cancelled());
    }
}
