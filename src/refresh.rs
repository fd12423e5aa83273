//! Periodic statistics refresh
//!
//! Polls the statistics cache on a fixed interval in the background and
//! reports results over a tokio channel. Polling is skipped while the
//! consumer marks itself hidden.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cache::{CachedStatistic, StatsCache};

/// Default polling interval in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 600;

/// Messages sent from the background poller to the consumer
#[derive(Debug, Clone)]
pub enum RefreshMessage {
    /// A poll cycle is starting
    RefreshStarted,
    /// Statistics read from the cache, possibly stale while a refresh runs
    StatsUpdated(CachedStatistic),
    /// Nothing cached and the fetch failed
    RefreshError(String),
}

/// Configuration for the polling loop
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Time between polls
    pub interval: Duration,
    /// Whether polling is enabled
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            enabled: true,
        }
    }
}

/// Handle for controlling the background poller
///
/// Dropping the handle stops the poller.
pub struct RefreshHandle {
    /// Channel for receiving refresh messages
    pub receiver: mpsc::Receiver<RefreshMessage>,
    shutdown_tx: mpsc::Sender<()>,
    refresh_tx: mpsc::Sender<()>,
    visible: Arc<AtomicBool>,
}

impl RefreshHandle {
    /// Spawns the polling task over `cache`
    ///
    /// The first poll happens one interval after spawning.
    pub fn spawn(cache: StatsCache, config: RefreshConfig) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (refresh_tx, mut refresh_rx) = mpsc::channel::<()>(1);
        let visible = Arc::new(AtomicBool::new(true));

        if config.enabled {
            let visible = visible.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(config.interval);
                // Skip the first tick (immediate)
                interval.tick().await;

                loop {
                    let requested = tokio::select! {
                        _ = interval.tick() => false,
                        Some(()) = refresh_rx.recv() => true,
                        _ = shutdown_rx.recv() => break,
                    };

                    if !requested && !visible.load(Ordering::Acquire) {
                        tracing::debug!("consumer hidden, skipping statistics poll");
                        continue;
                    }

                    if msg_tx.send(RefreshMessage::RefreshStarted).await.is_err() {
                        break;
                    }

                    let message = match cache.get_with_background_refresh().await {
                        Ok(stats) => RefreshMessage::StatsUpdated(stats),
                        Err(e) => {
                            tracing::warn!(error = %e, "statistics poll failed");
                            RefreshMessage::RefreshError(e.to_string())
                        }
                    };

                    if msg_tx.send(message).await.is_err() {
                        break;
                    }
                }

                tracing::debug!("statistics poller stopped");
            });
        }

        Self {
            receiver: msg_rx,
            shutdown_tx,
            refresh_tx,
            visible,
        }
    }

    /// Marks the consumer visible or hidden; hidden consumers are not polled
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Release);
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    /// Requests an immediate poll, regardless of visibility
    pub async fn request_refresh(&self) {
        let _ = self.refresh_tx.send(()).await;
    }

    /// Shuts down the background poller
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Checks for pending refresh messages without blocking
///
/// # Returns
/// * `Some(RefreshMessage)` if a message was available
/// * `None` if no messages are pending
pub fn try_recv(handle: &mut RefreshHandle) -> Option<RefreshMessage> {
    handle.receiver.try_recv().ok()
}
