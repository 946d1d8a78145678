//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Stop accepting on request without touching open connections

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(std::io::Error),
    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(std::io::Error),
    /// The accept loop ended before it acknowledged a stop request.
    #[error("Accept loop exited before the listener could be stopped")]
    Gone,
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
#[derive(Debug)]
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Configured maximum connections.
    max_connections: usize,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        Ok(Self::from_std_listener(listener, config.max_connections))
    }

    /// Wrap an already bound listener.
    pub fn from_std_listener(listener: TcpListener, max_connections: usize) -> Self {
        if let Ok(local_addr) = listener.local_addr() {
            tracing::info!(
                address = %local_addr,
                max_connections,
                "Listener bound"
            );
        }

        Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// This will wait if the connection limit has been reached.
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // Acquire permit first (backpressure). The semaphore is never closed.
        let permit = match Arc::clone(&self.connection_limit).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return Err(ListenerError::Gone),
        };

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Create the two ends used to stop an accept loop.
pub fn stop_channel() -> (ListenerHandle, StopSignal) {
    let (stop_tx, stop_rx) = oneshot::channel();
    let (ack_tx, ack_rx) = oneshot::channel();
    (
        ListenerHandle {
            stop_tx: Some(stop_tx),
            ack_rx: Some(ack_rx),
        },
        StopSignal {
            stop_rx: Some(stop_rx),
            requested: false,
            ack_tx: Some(ack_tx),
        },
    )
}

/// Held by whoever decides when the listener stops accepting.
#[derive(Debug)]
pub struct ListenerHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    ack_rx: Option<oneshot::Receiver<()>>,
}

impl ListenerHandle {
    /// Ask the accept loop to stop and wait until the listening socket is closed.
    ///
    /// Calling it again after success is a no-op.
    pub async fn stop(&mut self) -> Result<(), ListenerError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            // A dropped receiver surfaces below as a missing ack.
            let _ = stop_tx.send(());
        }
        match self.ack_rx.take() {
            Some(ack_rx) => ack_rx.await.map_err(|_| ListenerError::Gone),
            None => Ok(()),
        }
    }
}

/// Held by the accept loop.
#[derive(Debug)]
pub struct StopSignal {
    stop_rx: Option<oneshot::Receiver<()>>,
    requested: bool,
    ack_tx: Option<oneshot::Sender<()>>,
}

impl StopSignal {
    /// Resolve once a stop has been requested.
    ///
    /// A dropped `ListenerHandle` never resolves this.
    pub async fn requested(&mut self) {
        if let Some(stop_rx) = self.stop_rx.as_mut() {
            // A oneshot receiver must not be polled again once it completed.
            let result = stop_rx.await;
            self.stop_rx = None;
            self.requested = result.is_ok();
        }
        if !self.requested {
            std::future::pending::<()>().await;
        }
    }

    /// Confirm the listening socket has been dropped.
    pub fn acknowledge(mut self) {
        if let Some(ack_tx) = self.ack_tx.take() {
            let _ = ack_tx.send(());
        }
    }
}
