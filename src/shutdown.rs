//! Orderly shutdown.
//!
//! This module provides:
//! - Signal handling (SIGTERM, SIGINT, SIGHUP)
//! - A phased shutdown sequence: stop the watchdog, close the database
//!   connection, clear the cache
//!
//! Each step runs even when an earlier one fails, and every step is safe to
//! repeat.

use crate::server::LensServer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{error, info};

/// Shutdown signal that can be awaited.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for the shutdown signal.
    pub async fn recv(&mut self) {
        let _ = self.receiver.wait_for(|&v| v).await;
    }

    /// Check if shutdown has been signaled without blocking.
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Shutdown phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Shutdown has been initiated.
    Initiated,

    /// Stopping the background watchdog.
    StoppingWatchdog,

    /// Closing the database connection.
    ClosingConnections,

    /// Dropping cached metadata.
    FlushingCaches,

    /// Final cleanup complete.
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Initiated => write!(f, "initiated"),
            ShutdownPhase::StoppingWatchdog => write!(f, "stopping_watchdog"),
            ShutdownPhase::ClosingConnections => write!(f, "closing_connections"),
            ShutdownPhase::FlushingCaches => write!(f, "flushing_caches"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Controller for managing graceful shutdown.
pub struct ShutdownController {
    /// Sender to notify all listeners of shutdown.
    sender: watch::Sender<bool>,

    /// Set once shutdown was requested.
    shutting_down: AtomicBool,

    /// Set once the cleanup sequence has run.
    completed: AtomicBool,

    /// Broadcast sender for shutdown phase notifications.
    phase_sender: broadcast::Sender<ShutdownPhase>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        let (phase_sender, _) = broadcast::channel(16);

        Self {
            sender,
            shutting_down: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            phase_sender,
        }
    }

    /// Get a shutdown signal receiver.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to shutdown phase notifications.
    pub fn subscribe_phases(&self) -> broadcast::Receiver<ShutdownPhase> {
        self.phase_sender.subscribe()
    }

    /// Check if shutdown is in progress.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Request shutdown. Only the first call has an effect.
    pub fn shutdown(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Initiating graceful shutdown...");
            let _ = self.sender.send(true);
            let _ = self.phase_sender.send(ShutdownPhase::Initiated);
        }
    }

    fn notify_phase(&self, phase: ShutdownPhase) {
        info!("Shutdown phase: {}", phase);
        let _ = self.phase_sender.send(phase);
    }

    /// Stop the watchdog, close the connection and clear the cache.
    ///
    /// A failure in one step is logged and the remaining steps still run.
    /// Later calls return immediately.
    pub async fn graceful_shutdown(&self, server: &LensServer) {
        self.shutdown();
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.notify_phase(ShutdownPhase::StoppingWatchdog);
        if !server.watchdog().stop() {
            info!("Watchdog was not running");
        }

        self.notify_phase(ShutdownPhase::ClosingConnections);
        if let Err(e) = server.connection().close().await {
            error!("Error closing MongoDB connection: {}", e);
        }

        self.notify_phase(ShutdownPhase::FlushingCaches);
        server.cache().clear();

        self.notify_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown complete");
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared shutdown controller type.
pub type SharedShutdownController = Arc<ShutdownController>;

/// Create a new shared shutdown controller.
pub fn new_shutdown_controller() -> SharedShutdownController {
    Arc::new(ShutdownController::new())
}

/// Install signal handlers for graceful shutdown.
///
/// SIGINT (Ctrl+C) everywhere; SIGTERM and SIGHUP on Unix. Any of them
/// triggers the controller.
pub async fn install_signal_handlers(controller: SharedShutdownController) {
    let ctrl_c_controller = controller.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                ctrl_c_controller.shutdown();
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C signal: {}", e);
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::hangup(), "SIGHUP"),
        ] {
            let controller = controller.clone();
            tokio::spawn(async move {
                match signal(kind) {
                    Ok(mut stream) => {
                        stream.recv().await;
                        info!("Received {}, initiating shutdown...", name);
                        controller.shutdown();
                    }
                    Err(e) => {
                        error!("Failed to install {} handler: {}", name, e);
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Namespace;
    use crate::config::Config;
    use crate::constants::DEFAULT_CLOSE_TIMEOUT;
    use crate::memory::{FixedMemoryGauge, MemorySample};
    use crate::state::ConnectionPhase;
    use crate::testing::{FakeConnector, FakeStore};
    use std::sync::atomic::Ordering;

    async fn connected_server(store: Arc<FakeStore>) -> LensServer {
        let server = LensServer::with_collaborators(
            Config::for_uri("mongodb://host:27017/shop"),
            FakeConnector::new(store),
            Arc::new(FixedMemoryGauge(MemorySample::default())),
        );
        server.connect().await.unwrap();
        server.start_watchdog();
        server
    }

    #[test]
    fn test_shutdown_signal() {
        let controller = ShutdownController::new();
        let signal = controller.signal();

        assert!(!signal.is_shutdown());

        controller.shutdown();
        assert!(controller.is_shutting_down());
        assert!(signal.is_shutdown());
    }

    #[test]
    fn test_shutdown_idempotent() {
        let controller = ShutdownController::new();

        controller.shutdown();
        controller.shutdown();
        assert!(controller.is_shutting_down());
    }

    #[tokio::test]
    async fn test_graceful_shutdown() {
        let store = FakeStore::new().with_database("shop");
        let server = connected_server(store.clone()).await;
        server.cache().set(Namespace::Stats, "shop.orders", 1_u32);

        let controller = new_shutdown_controller();
        let mut phases = controller.subscribe_phases();
        controller.graceful_shutdown(&server).await;

        assert!(!server.watchdog().is_running());
        assert_eq!(server.connection().phase(), ConnectionPhase::Disconnected);
        assert_eq!(store.close_calls.load(Ordering::SeqCst), 1);
        assert!(server.cache().is_empty());

        let mut seen = Vec::new();
        while let Ok(phase) = phases.try_recv() {
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                ShutdownPhase::Initiated,
                ShutdownPhase::StoppingWatchdog,
                ShutdownPhase::ClosingConnections,
                ShutdownPhase::FlushingCaches,
                ShutdownPhase::Complete,
            ]
        );

        // A second run touches nothing.
        controller.graceful_shutdown(&server).await;
        assert_eq!(store.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_shutdown_survives_hanging_close() {
        let store = FakeStore::new().with_database("shop").stall("close");
        let server = connected_server(store.clone()).await;
        server.cache().set(Namespace::Stats, "shop.orders", 1_u32);

        let controller = new_shutdown_controller();
        let mut phases = controller.subscribe_phases();
        let started = tokio::time::Instant::now();
        controller.graceful_shutdown(&server).await;

        assert_eq!(started.elapsed(), DEFAULT_CLOSE_TIMEOUT);
        assert_eq!(store.close_calls.load(Ordering::SeqCst), 1);
        assert!(!server.watchdog().is_running());
        assert_eq!(server.connection().phase(), ConnectionPhase::Disconnected);
        assert!(server.cache().is_empty());

        let mut last = None;
        while let Ok(phase) = phases.try_recv() {
            last = Some(phase);
        }
        assert_eq!(last, Some(ShutdownPhase::Complete));
    }

    #[tokio::test]
    async fn test_shutdown_without_connection() {
        let server = LensServer::with_collaborators(
            Config::for_uri("mongodb://host:27017/shop"),
            FakeConnector::new(FakeStore::new()),
            Arc::new(FixedMemoryGauge(MemorySample::default())),
        );
        server.cache().set(Namespace::Schemas, "shop.orders.100", 1_u32);

        new_shutdown_controller().graceful_shutdown(&server).await;

        assert!(server.cache().is_empty());
    }

    #[test]
    fn test_shutdown_phase_display() {
        assert_eq!(ShutdownPhase::Initiated.to_string(), "initiated");
        assert_eq!(
            ShutdownPhase::StoppingWatchdog.to_string(),
            "stopping_watchdog"
        );
        assert_eq!(
            ShutdownPhase::ClosingConnections.to_string(),
            "closing_connections"
        );
        assert_eq!(ShutdownPhase::FlushingCaches.to_string(), "flushing_caches");
        assert_eq!(ShutdownPhase::Complete.to_string(), "complete");
    }
}
