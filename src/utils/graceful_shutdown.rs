use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{signal, sync::broadcast, time::timeout};

/// Why the gateway is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Requested from inside the process
    Requested,
}

/// Shutdown broadcast plus OS signal handling for the binary.
///
/// SIGINT and SIGTERM start a graceful shutdown; SIGHUP asks for a topology
/// reload and keeps the handler running.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    /// Shutdown manager with a 30 second drain timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(drain_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            drain_timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Start shutdown; only the first call broadcasts.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!("Shutdown initiated: {:?}", reason);
            // no receivers just means nobody is waiting yet
            let _ = self.shutdown_tx.send(reason);
        } else {
            tracing::warn!("Shutdown already initiated, ignoring {:?}", reason);
        }
    }

    /// Listen for OS signals until a shutdown signal arrives, calling
    /// `on_reload` for every SIGHUP.
    pub async fn run_signal_handler<F>(&self, on_reload: F) -> eyre::Result<()>
    where
        F: Fn() + Send + Sync,
    {
        tracing::info!("Signal handler started (SIGINT/SIGTERM stop, SIGHUP reloads topologies)");
        let mut shutdown_rx = self.subscribe();
        let mut hangups = Hangups::new()?;

        loop {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    self.trigger_shutdown(ShutdownReason::Interrupt);
                    break;
                }
                _ = wait_for_sigterm() => {
                    self.trigger_shutdown(ShutdownReason::Terminate);
                    break;
                }
                _ = hangups.recv() => {
                    tracing::info!("Received SIGHUP, reloading topologies");
                    on_reload();
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        tracing::info!("Signal handler stopped");
        Ok(())
    }

    /// Wait until shutdown has been initiated.
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        let mut receiver = self.subscribe();
        if self.is_shutdown_initiated() {
            return ShutdownReason::Requested;
        }
        receiver.recv().await.unwrap_or(ShutdownReason::Requested)
    }

    /// Run `work` to completion, giving up after the drain timeout.
    /// Returns whether it finished in time.
    pub async fn drain<F: Future<Output = ()>>(&self, work: F) -> bool {
        match timeout(self.drain_timeout, work).await {
            Ok(()) => true,
            Err(_) => {
                tracing::error!(
                    "Drain timeout exceeded ({:?}), forcing shutdown",
                    self.drain_timeout
                );
                false
            }
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

#[cfg(unix)]
struct Hangups(tokio::signal::unix::Signal);

#[cfg(unix)]
impl Hangups {
    fn new() -> eyre::Result<Self> {
        use eyre::WrapErr;
        use tokio::signal::unix::{SignalKind, signal};
        let sighup = signal(SignalKind::hangup()).wrap_err("Failed to register SIGHUP handler")?;
        Ok(Self(sighup))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct Hangups;

#[cfg(not(unix))]
impl Hangups {
    fn new() -> eyre::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::time::sleep;

    use super::*;

    #[tokio::test]
    async fn test_trigger_shutdown_broadcasts_once() {
        let shutdown = GracefulShutdown::new();
        let mut receiver = shutdown.subscribe();
        assert!(!shutdown.is_shutdown_initiated());

        shutdown.trigger_shutdown(ShutdownReason::Requested);
        shutdown.trigger_shutdown(ShutdownReason::Terminate);

        assert!(shutdown.is_shutdown_initiated());
        assert_eq!(receiver.try_recv().unwrap(), ShutdownReason::Requested);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wait_after_trigger_returns() {
        let shutdown = GracefulShutdown::new();
        shutdown.trigger_shutdown(ShutdownReason::Requested);
        assert_eq!(
            shutdown.wait_for_shutdown_signal().await,
            ShutdownReason::Requested
        );
    }

    #[tokio::test]
    async fn test_signal_handler_exits_on_requested_shutdown() {
        let shutdown = Arc::new(GracefulShutdown::new());
        let reloads = Arc::new(AtomicUsize::new(0));

        let handler = {
            let shutdown = shutdown.clone();
            let reloads = reloads.clone();
            tokio::spawn(async move {
                shutdown
                    .run_signal_handler(move || {
                        reloads.fetch_add(1, Ordering::SeqCst);
                    })
                    .await
            })
        };

        sleep(Duration::from_millis(20)).await;
        shutdown.trigger_shutdown(ShutdownReason::Requested);
        timeout(Duration::from_secs(1), handler)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_drain_times_out() {
        let shutdown = GracefulShutdown::with_timeout(Duration::from_millis(20));
        assert!(shutdown.drain(async {}).await);
        assert!(!shutdown.drain(sleep(Duration::from_secs(5))).await);
    }
}
