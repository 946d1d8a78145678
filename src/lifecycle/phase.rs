//! Process lifecycle phase.
//!
//! # Data Flow
//! ```text
//! ShutdownOrchestrator (only writer)
//!     → PhaseController::advance()
//!     → watch channel
//!     → PhaseReader::current() (RequestGate, server, tests)
//! ```
//!
//! # Design Decisions
//! - Phases are ordered; `advance` refuses anything but a strictly later phase
//! - Readers copy the value once, so a request sees exactly one phase

use serde::Serialize;
use tokio::sync::watch;

/// Lifecycle phase of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    /// Serving traffic normally.
    Running,
    /// Listener stopped; in-flight work may finish.
    Draining,
    /// Drain window over; lingering connections are destroyed.
    Forcing,
    /// Waiting out the exit delay before the process ends.
    Exiting,
}

impl LifecyclePhase {
    /// Name used in logs and rejection bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Running => "running",
            LifecyclePhase::Draining => "draining",
            LifecyclePhase::Forcing => "forcing",
            LifecyclePhase::Exiting => "exiting",
        }
    }

    /// Whether new work may still be admitted unconditionally.
    pub fn is_running(&self) -> bool {
        matches!(self, LifecyclePhase::Running)
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owning side of the phase value. Not `Clone`: there is one writer.
#[derive(Debug)]
pub struct PhaseController {
    tx: watch::Sender<LifecyclePhase>,
}

impl PhaseController {
    /// Create a controller in the `Running` phase.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecyclePhase::Running);
        Self { tx }
    }

    /// Move to `next` if it is strictly later than the current phase.
    ///
    /// Returns `false` (and leaves the phase untouched) otherwise.
    pub fn advance(&self, next: LifecyclePhase) -> bool {
        let mut previous = None;
        let moved = self.tx.send_if_modified(|current| {
            if next > *current {
                previous = Some(*current);
                *current = next;
                true
            } else {
                false
            }
        });

        if let Some(from) = previous {
            tracing::info!(from = %from, to = %next, "Lifecycle phase transition");
            crate::observability::metrics::record_phase(next);
        }
        moved
    }

    /// Current phase.
    pub fn current(&self) -> LifecyclePhase {
        *self.tx.borrow()
    }

    /// Hand out a read-only view.
    pub fn reader(&self) -> PhaseReader {
        PhaseReader {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for PhaseController {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the lifecycle phase.
#[derive(Debug, Clone)]
pub struct PhaseReader {
    rx: watch::Receiver<LifecyclePhase>,
}

impl PhaseReader {
    /// Snapshot of the current phase.
    pub fn current(&self) -> LifecyclePhase {
        *self.rx.borrow()
    }

    /// Wait until the phase is at least `phase`.
    ///
    /// Returns immediately if it already is. Returns the phase observed.
    pub async fn reached(&mut self, phase: LifecyclePhase) -> LifecyclePhase {
        let observed = self.rx.wait_for(|current| *current >= phase).await.map(|current| *current);
        match observed {
            Ok(current) => current,
            // Controller dropped: nothing will move the phase anymore.
            Err(_) => *self.rx.borrow(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered() {
        assert!(LifecyclePhase::Running < LifecyclePhase::Draining);
        assert!(LifecyclePhase::Draining < LifecyclePhase::Forcing);
        assert!(LifecyclePhase::Forcing < LifecyclePhase::Exiting);
    }

    #[test]
    fn advance_is_monotonic() {
        let controller = PhaseController::new();
        let reader = controller.reader();
        assert_eq!(reader.current(), LifecyclePhase::Running);

        assert!(controller.advance(LifecyclePhase::Draining));
        assert!(!controller.advance(LifecyclePhase::Draining));
        assert!(!controller.advance(LifecyclePhase::Running));
        assert_eq!(reader.current(), LifecyclePhase::Draining);

        assert!(controller.advance(LifecyclePhase::Exiting));
        assert!(!controller.advance(LifecyclePhase::Forcing));
        assert_eq!(reader.current(), LifecyclePhase::Exiting);
    }

    #[tokio::test]
    async fn reader_waits_for_phase() {
        let controller = PhaseController::new();
        let mut reader = controller.reader();

        let waiter = tokio::spawn(async move { reader.reached(LifecyclePhase::Forcing).await });
        controller.advance(LifecyclePhase::Draining);
        controller.advance(LifecyclePhase::Forcing);

        assert_eq!(waiter.await.unwrap(), LifecyclePhase::Forcing);
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&LifecyclePhase::Draining).unwrap();
        assert_eq!(json, "\"draining\"");
    }
}
