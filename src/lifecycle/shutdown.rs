//! Shutdown coordination.
//!
//! # Data Flow
//! ```text
//! ShutdownTrigger::trigger()  (first call wins)
//!     → stop listener → Draining → start suicide timer
//!     → wait: tracker empty | timer fired
//!     → Forcing: destroy lingering connections (if `force`)
//!     → Exiting: sleep exit delay → return report to main
//! ```
//!
//! # Design Decisions
//! - `run` consumes the orchestrator, so the sequence can only execute once
//! - The timer is a spawned task whose handle is kept and aborted on early drain
//! - Nothing is retried; a failed step ends the sequence with an error

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ShutdownConfig;
use crate::lifecycle::phase::{LifecyclePhase, PhaseController, PhaseReader};
use crate::lifecycle::signals::ShutdownSignal;
use crate::net::{ConnectionTracker, ListenerError, ListenerHandle};
use crate::observability::metrics;

/// Fatal errors during the shutdown sequence.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("failed to stop listener: {0}")]
    Listener(#[from] ListenerError),
}

/// What started the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Signal(ShutdownSignal),
    /// The accept loop failed.
    ServerError,
    /// Triggered from code (tests, embedding applications).
    Manual,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerSource::Signal(signal) => write!(f, "{}", signal),
            TriggerSource::ServerError => f.write_str("server error"),
            TriggerSource::Manual => f.write_str("manual"),
        }
    }
}

/// Cloneable handle that starts the shutdown sequence.
///
/// Only the first `trigger` has an effect.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<Option<TriggerSource>>>,
}

impl ShutdownTrigger {
    fn new() -> (Self, watch::Receiver<Option<TriggerSource>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Start the shutdown. Returns `false` if it was already started.
    pub fn trigger(&self, source: TriggerSource) -> bool {
        let fired = self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(source);
                true
            } else {
                false
            }
        });

        if !fired {
            tracing::debug!(source = %source, "Shutdown already triggered, ignoring");
        }
        fired
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

/// The suicide-timeout countdown.
#[derive(Debug)]
struct PendingExit {
    task: JoinHandle<()>,
    fired: Option<oneshot::Receiver<()>>,
}

impl PendingExit {
    fn schedule(after: Duration) -> Self {
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(());
        });
        Self {
            task,
            fired: Some(rx),
        }
    }

    async fn fired(&mut self) {
        if let Some(rx) = self.fired.as_mut() {
            let result = rx.await;
            self.fired = None;
            if result.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }

    /// Stop the countdown. Consumes the handle, so it happens at most once.
    fn cancel(self) {
        self.task.abort();
    }
}

/// Summary of a completed shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// What started the shutdown.
    pub source: TriggerSource,
    /// All connections closed before the timeout.
    pub drained: bool,
    /// Connections destroyed at the deadline.
    pub forced: usize,
    /// Connections left open because `force` is disabled.
    pub lingering: usize,
    /// Time from trigger to the end of the exit delay.
    pub elapsed: Duration,
}

/// Drives `Running → Draining → Forcing → Exiting`.
pub struct ShutdownOrchestrator {
    config: ShutdownConfig,
    phase: PhaseController,
    tracker: ConnectionTracker,
    listener: ListenerHandle,
    trigger: ShutdownTrigger,
    triggered: watch::Receiver<Option<TriggerSource>>,
}

impl ShutdownOrchestrator {
    pub fn new(config: ShutdownConfig, tracker: ConnectionTracker, listener: ListenerHandle) -> Self {
        let (trigger, triggered) = ShutdownTrigger::new();
        Self {
            config,
            phase: PhaseController::new(),
            tracker,
            listener,
            trigger,
            triggered,
        }
    }

    /// Handle for signal handlers and other trigger sources.
    pub fn trigger_handle(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    /// Start the shutdown. Later calls are no-ops.
    pub fn trigger(&self, source: TriggerSource) -> bool {
        self.trigger.trigger(source)
    }

    pub fn phase(&self) -> PhaseReader {
        self.phase.reader()
    }

    /// Wait for the trigger, then run the full sequence once.
    pub async fn run(mut self) -> Result<ShutdownReport, ShutdownError> {
        let source = match self.triggered.wait_for(Option::is_some).await {
            Ok(source) => *source,
            // We hold a sender ourselves, so the channel cannot close.
            Err(_) => None,
        }
        .unwrap_or(TriggerSource::Manual);

        let started = Instant::now();
        let drained = self.drain(source).await?;
        let (forced, lingering) = self.force();
        self.exit().await;

        Ok(ShutdownReport {
            source,
            drained,
            forced,
            lingering,
            elapsed: started.elapsed(),
        })
    }

    /// Returns whether the tracker emptied before the timeout.
    async fn drain(&mut self, source: TriggerSource) -> Result<bool, ShutdownError> {
        tracing::info!(
            source = %source,
            open_connections = self.tracker.size(),
            suicide_timeout_ms = self.config.suicide_timeout_ms,
            "Graceful shutdown started"
        );

        self.listener.stop().await?;
        tracing::info!("Listener stopped, no new connections accepted");

        self.phase.advance(LifecyclePhase::Draining);
        let mut pending_exit = PendingExit::schedule(self.config.suicide_timeout());

        let drained = tokio::select! {
            biased;
            _ = self.tracker.wait_until_empty() => true,
            _ = pending_exit.fired() => false,
        };

        if drained {
            pending_exit.cancel();
            tracing::info!("All connections closed before the shutdown timeout");
        } else {
            tracing::info!(
                open_connections = self.tracker.size(),
                "Shutdown timeout elapsed with connections still open"
            );
        }
        Ok(drained)
    }

    /// Returns (forced, lingering).
    fn force(&self) -> (usize, usize) {
        self.phase.advance(LifecyclePhase::Forcing);

        let remaining = self.tracker.size();
        if remaining == 0 {
            return (0, 0);
        }

        if !self.config.force {
            tracing::warn!(
                open_connections = remaining,
                "Forced close disabled, leaving connections open past exit"
            );
            return (0, remaining);
        }

        let mut forced = 0;
        self.tracker.for_each(|conn| {
            if conn.destroy() {
                tracing::warn!(
                    connection_id = %conn.id(),
                    peer_addr = %conn.peer(),
                    age_ms = conn.age().as_millis() as u64,
                    final_request_used = conn.final_request_used(),
                    "Destroying connection that outlived the shutdown timeout"
                );
                metrics::record_forced_close();
                forced += 1;
            }
        });
        (forced, 0)
    }

    async fn exit(&self) {
        self.phase.advance(LifecyclePhase::Exiting);
        tracing::info!(exit_delay_ms = self.config.exit_delay_ms, "Exiting after delay");
        tokio::time::sleep(self.config.exit_delay()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{stop_channel, StopSignal};
    use std::net::SocketAddr;

    fn config(suicide_timeout_ms: u64, exit_delay_ms: u64, force: bool) -> ShutdownConfig {
        ShutdownConfig {
            suicide_timeout_ms,
            exit_delay_ms,
            force,
            ..ShutdownConfig::default()
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    /// Stand-in for the accept loop: acknowledges the stop request.
    fn fake_accept_loop(mut signal: StopSignal) {
        tokio::spawn(async move {
            signal.requested().await;
            signal.acknowledge();
        });
    }

    fn orchestrator(config: ShutdownConfig, tracker: &ConnectionTracker) -> ShutdownOrchestrator {
        let (handle, signal) = stop_channel();
        fake_accept_loop(signal);
        ShutdownOrchestrator::new(config, tracker.clone(), handle)
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_is_idempotent() {
        let tracker = ConnectionTracker::new();
        let orchestrator = orchestrator(config(1_000, 10, true), &tracker);
        let trigger = orchestrator.trigger_handle();

        assert!(!trigger.is_triggered());
        assert!(trigger.trigger(TriggerSource::Signal(ShutdownSignal::Terminate)));
        assert!(!orchestrator.trigger(TriggerSource::Signal(ShutdownSignal::Interrupt)));
        assert!(!trigger.trigger(TriggerSource::Manual));
        assert!(trigger.is_triggered());

        let report = orchestrator.run().await.unwrap();
        assert_eq!(report.source, TriggerSource::Signal(ShutdownSignal::Terminate));
        assert!(report.drained);
    }

    #[tokio::test(start_paused = true)]
    async fn walks_every_phase_in_order() {
        let tracker = ConnectionTracker::new();
        let orchestrator = orchestrator(config(1_000, 10, true), &tracker);
        let mut phase = orchestrator.phase();
        let observed = phase.clone();
        orchestrator.trigger(TriggerSource::Manual);

        let run = tokio::spawn(orchestrator.run());
        assert!(phase.reached(LifecyclePhase::Draining).await >= LifecyclePhase::Draining);
        run.await.unwrap().unwrap();
        assert_eq!(observed.current(), LifecyclePhase::Exiting);
    }

    #[tokio::test(start_paused = true)]
    async fn exits_early_when_connections_drain() {
        let tracker = ConnectionTracker::new();
        let guards: Vec<_> = (0..3).map(|_| tracker.open(peer())).collect();
        let orchestrator = orchestrator(config(70_000, 1_000, true), &tracker);
        orchestrator.trigger(TriggerSource::Manual);

        let run = tokio::spawn(orchestrator.run());
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(guards);

        let report = run.await.unwrap().unwrap();
        assert!(report.drained);
        assert_eq!(report.forced, 0);
        assert!(report.elapsed >= Duration::from_millis(1_500));
        assert!(report.elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn destroys_connections_at_the_deadline() {
        let tracker = ConnectionTracker::new();
        let mut idle = tracker.open(peer());
        let orchestrator = orchestrator(config(5_000, 200, true), &tracker);
        orchestrator.trigger(TriggerSource::Manual);

        let report = orchestrator.run().await.unwrap();
        assert!(!report.drained);
        assert_eq!(report.forced, 1);
        assert_eq!(report.lingering, 0);
        assert!(report.elapsed >= Duration::from_millis(5_200));
        assert!(report.elapsed < Duration::from_millis(5_300));

        tokio::time::timeout(Duration::from_millis(10), idle.destroyed())
            .await
            .expect("connection should have been destroyed");
    }

    #[tokio::test(start_paused = true)]
    async fn leaves_connections_when_force_disabled() {
        let tracker = ConnectionTracker::new();
        let _idle = tracker.open(peer());
        let orchestrator = orchestrator(config(1_000, 0, false), &tracker);
        orchestrator.trigger(TriggerSource::Manual);

        let report = orchestrator.run().await.unwrap();
        assert_eq!(report.forced, 0);
        assert_eq!(report.lingering, 1);
        assert_eq!(tracker.size(), 1);
        tracker.for_each(|conn| assert!(!conn.is_destroyed()));
    }

    #[tokio::test(start_paused = true)]
    async fn no_connections_skips_the_timeout() {
        let tracker = ConnectionTracker::new();
        let orchestrator = orchestrator(config(70_000, 0, true), &tracker);
        orchestrator.trigger(TriggerSource::Manual);

        let report = orchestrator.run().await.unwrap();
        assert!(report.drained);
        assert!(report.elapsed < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn missing_accept_loop_is_fatal() {
        let tracker = ConnectionTracker::new();
        let (handle, signal) = stop_channel();
        drop(signal);
        let orchestrator = ShutdownOrchestrator::new(config(1_000, 0, true), tracker, handle);
        let phase = orchestrator.phase();
        orchestrator.trigger(TriggerSource::Manual);

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, ShutdownError::Listener(ListenerError::Gone)));
        assert_eq!(phase.current(), LifecyclePhase::Running);
    }
}
