//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for SIGINT, SIGTERM and SIGHUP
//! - Log every received signal
//! - Forward each one to the shutdown trigger
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Repeated signals are delivered too; the trigger ignores all but the first
//! - SIGHUP shuts down like SIGTERM, there is no reload

use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::{ShutdownTrigger, TriggerSource};

/// A termination signal the process reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    Hangup,
}

impl ShutdownSignal {
    pub fn name(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Hangup => "SIGHUP",
        }
    }
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Maps OS signals onto the shutdown trigger.
#[derive(Debug, Clone)]
pub struct SignalDispatcher {
    trigger: ShutdownTrigger,
}

impl SignalDispatcher {
    pub fn new(trigger: ShutdownTrigger) -> Self {
        Self { trigger }
    }

    /// Handle one received signal. Returns whether it started the shutdown.
    pub fn dispatch(&self, signal: ShutdownSignal) -> bool {
        tracing::info!(signal = %signal, "Received process signal");
        self.trigger.trigger(TriggerSource::Signal(signal))
    }

    /// Register the handlers and spawn the task that forwards signals.
    ///
    /// Registration happens before this returns, so a signal sent right
    /// after cannot hit the default (terminating) disposition.
    #[cfg(unix)]
    pub fn install(self) -> std::io::Result<JoinHandle<()>> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;

        Ok(tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    Some(()) = interrupt.recv() => ShutdownSignal::Interrupt,
                    Some(()) = terminate.recv() => ShutdownSignal::Terminate,
                    Some(()) = hangup.recv() => ShutdownSignal::Hangup,
                    else => break,
                };
                self.dispatch(received);
            }
        }))
    }

    /// Register the Ctrl-C handler and spawn the task that forwards it.
    #[cfg(not(unix))]
    pub fn install(self) -> std::io::Result<JoinHandle<()>> {
        Ok(tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                self.dispatch(ShutdownSignal::Interrupt);
            }
        }))
    }
}
