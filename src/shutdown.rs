//! Graceful shutdown handling with request draining.
//!
//! This module provides:
//! - Signal handling (SIGTERM, SIGINT, SIGHUP)
//! - A shutdown signal the HTTP listener waits on
//! - In-flight request draining with a configurable timeout

use crate::config::parse_var;
use crate::constants::{DEFAULT_DRAIN_TIMEOUT, DRAIN_POLL_INTERVAL};
use crate::telemetry::ServerMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

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

/// Shutdown phases for coordinated cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Shutdown has been initiated.
    Initiated,

    /// Waiting for in-flight requests.
    DrainingRequests,

    /// Final cleanup complete.
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Initiated => write!(f, "initiated"),
            ShutdownPhase::DrainingRequests => write!(f, "draining_requests"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Controller for managing graceful shutdown.
pub struct ShutdownController {
    sender: watch::Sender<bool>,
    shutting_down: AtomicBool,
    phase_sender: broadcast::Sender<ShutdownPhase>,
    drain_timeout: Duration,
}

impl ShutdownController {
    /// Create a new shutdown controller with the default drain timeout.
    pub fn new() -> Self {
        Self::with_drain_timeout(DEFAULT_DRAIN_TIMEOUT)
    }

    /// Create a shutdown controller with a custom drain timeout.
    pub fn with_drain_timeout(drain_timeout: Duration) -> Self {
        let (sender, _) = watch::channel(false);
        let (phase_sender, _) = broadcast::channel(8);

        Self {
            sender,
            shutting_down: AtomicBool::new(false),
            phase_sender,
            drain_timeout,
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

    /// Initiate shutdown. Idempotent.
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

    /// Signal shutdown and wait for in-flight requests, up to the drain timeout.
    ///
    /// Driver connections close when the last handle to the pool is dropped.
    pub async fn graceful_shutdown(&self, metrics: &ServerMetrics) {
        self.shutdown();

        self.notify_phase(ShutdownPhase::DrainingRequests);
        self.drain_requests(metrics).await;

        self.notify_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown complete");
    }

    async fn drain_requests(&self, metrics: &ServerMetrics) {
        let start = Instant::now();

        loop {
            let in_flight = metrics.in_flight();
            if in_flight == 0 {
                info!("All requests drained");
                break;
            }

            if start.elapsed() > self.drain_timeout {
                warn!(
                    "Drain timeout exceeded with {} requests still running",
                    in_flight
                );
                break;
            }

            info!("Waiting for {} in-flight requests to complete...", in_flight);
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Get the drain timeout.
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared shutdown controller type.
pub type SharedShutdownController = Arc<ShutdownController>;

/// Create a shutdown controller from configuration.
pub fn new_shutdown_controller(config: &ShutdownConfig) -> SharedShutdownController {
    Arc::new(ShutdownController::with_drain_timeout(config.drain_timeout))
}

/// Install signal handlers for graceful shutdown.
///
/// SIGINT (Ctrl+C) everywhere, SIGTERM and SIGHUP on Unix.
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
            let signal_controller = controller.clone();
            tokio::spawn(async move {
                match signal(kind) {
                    Ok(mut stream) => {
                        stream.recv().await;
                        info!("Received {}, initiating shutdown...", name);
                        signal_controller.shutdown();
                    }
                    Err(e) => {
                        error!("Failed to install {} handler: {}", name, e);
                    }
                }
            });
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Timeout for draining in-flight requests.
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl ShutdownConfig {
    /// Create configuration from environment variables.
    ///
    /// `SHUTDOWN_DRAIN_TIMEOUT` is in seconds.
    pub fn from_env() -> Self {
        Self {
            drain_timeout: Duration::from_secs(parse_var(
                "SHUTDOWN_DRAIN_TIMEOUT",
                DEFAULT_DRAIN_TIMEOUT.as_secs(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::new_shared_metrics;

    #[test]
    fn test_shutdown_signal() {
        let controller = ShutdownController::new();
        let signal = controller.signal();

        assert!(!signal.is_shutdown());
        assert_eq!(controller.drain_timeout(), DEFAULT_DRAIN_TIMEOUT);

        controller.shutdown();
        assert!(controller.is_shutting_down());
        assert!(signal.is_shutdown());
    }

    #[test]
    fn test_shutdown_idempotent() {
        let controller = ShutdownController::new();
        let mut phases = controller.subscribe_phases();

        controller.shutdown();
        controller.shutdown();
        assert!(controller.is_shutting_down());

        assert_eq!(phases.try_recv().unwrap(), ShutdownPhase::Initiated);
        assert!(phases.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_graceful_shutdown_without_requests() {
        let controller = ShutdownController::new();
        let metrics = new_shared_metrics();

        controller.graceful_shutdown(&metrics).await;
        assert!(controller.is_shutting_down());
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight_request() {
        let controller = ShutdownController::with_drain_timeout(Duration::from_secs(5));
        let metrics = new_shared_metrics();
        let guard = metrics.begin_request();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        let start = Instant::now();
        controller.graceful_shutdown(&metrics).await;
        assert_eq!(metrics.in_flight(), 0);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_timeout() {
        let controller = ShutdownController::with_drain_timeout(Duration::from_millis(150));
        let metrics = new_shared_metrics();
        let _stuck = metrics.begin_request();

        controller.graceful_shutdown(&metrics).await;
        assert_eq!(metrics.in_flight(), 1);
    }

    #[test]
    fn test_shutdown_phase_display() {
        assert_eq!(ShutdownPhase::Initiated.to_string(), "initiated");
        assert_eq!(
            ShutdownPhase::DrainingRequests.to_string(),
            "draining_requests"
        );
        assert_eq!(ShutdownPhase::Complete.to_string(), "complete");
    }
}
