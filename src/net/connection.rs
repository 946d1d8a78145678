//! Connection tracking for graceful shutdown.
//!
//! # Responsibilities
//! - Keep the set of open connections (open on accept, remove on close)
//! - Notify subscribers each time the set becomes empty
//! - Let the orchestrator iterate and destroy lingering connections
//! - Remember which connections already used their final request
//!
//! # Design Decisions
//! - Connection tasks run on several worker threads, so every mutation of the
//!   set goes through one mutex
//! - Removal happens in `ConnectionGuard::drop`, so a connection is removed
//!   exactly once no matter how its task ends
//! - "Became empty" is an epoch counter on a watch channel, bumped once per
//!   non-empty → empty transition

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An entry of the connection set.
#[derive(Debug)]
pub struct TrackedConnection {
    id: ConnectionId,
    peer: SocketAddr,
    opened_at: Instant,
    final_request_used: bool,
    kill: Option<oneshot::Sender<()>>,
}

impl TrackedConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    pub fn final_request_used(&self) -> bool {
        self.final_request_used
    }

    /// Whether `destroy` has already been called.
    pub fn is_destroyed(&self) -> bool {
        self.kill.is_none()
    }

    /// Abruptly close the connection. Returns `false` if it was already destroyed.
    ///
    /// The owning task drops the socket; the entry leaves the set when its
    /// guard is dropped.
    pub fn destroy(&mut self) -> bool {
        match self.kill.take() {
            Some(kill) => {
                // A closed receiver means the task already finished on its own.
                let _ = kill.send(());
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct ConnectionSet {
    open: HashMap<ConnectionId, TrackedConnection>,
}

/// Tracks open connections for graceful shutdown.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    set: Arc<Mutex<ConnectionSet>>,
    /// Bumped on every transition to an empty set.
    empty_epoch: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            set: Arc::new(Mutex::new(ConnectionSet::default())),
            empty_epoch: Arc::new(tx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionSet> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a newly accepted connection. The returned guard removes it on drop.
    pub fn open(&self, peer: SocketAddr) -> ConnectionGuard {
        let id = ConnectionId::new();
        let (kill_tx, kill_rx) = oneshot::channel();
        let size = {
            let mut set = self.lock();
            set.open.insert(
                id,
                TrackedConnection {
                    id,
                    peer,
                    opened_at: Instant::now(),
                    final_request_used: false,
                    kill: Some(kill_tx),
                },
            );
            set.open.len()
        };

        tracing::debug!(connection_id = %id, peer_addr = %peer, open = size, "Connection opened");
        metrics::record_connection_opened(size);

        ConnectionGuard {
            id,
            tracker: self.clone(),
            kill: Some(kill_rx),
            destroyed: false,
            activity: Arc::new(ConnectionActivity::new()),
        }
    }

    /// Remove a connection. Returns `false` if it was not tracked.
    ///
    /// Normally called by `ConnectionGuard::drop`.
    pub fn close(&self, id: ConnectionId) -> bool {
        let (removed, size) = {
            let mut set = self.lock();
            let removed = set.open.remove(&id);
            let size = set.open.len();
            if removed.is_some() && size == 0 {
                // Under the lock so a concurrent open can't slip between.
                self.empty_epoch.send_modify(|epoch| *epoch += 1);
            }
            (removed, size)
        };

        match removed {
            Some(conn) => {
                tracing::debug!(
                    connection_id = %id,
                    destroyed = conn.is_destroyed(),
                    open = size,
                    "Connection closed"
                );
                metrics::record_connection_closed(size);
                true
            }
            None => false,
        }
    }

    /// Current number of open connections.
    pub fn size(&self) -> usize {
        self.lock().open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Visit every open connection while holding the set lock.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&mut TrackedConnection),
    {
        let mut set = self.lock();
        for conn in set.open.values_mut() {
            f(conn);
        }
    }

    /// Mark the final request of a connection as used.
    ///
    /// Returns `true` only for the first claim on a tracked connection.
    pub fn claim_final_request(&self, id: ConnectionId) -> bool {
        let mut set = self.lock();
        match set.open.get_mut(&id) {
            Some(conn) if !conn.final_request_used => {
                conn.final_request_used = true;
                true
            }
            _ => false,
        }
    }

    /// Subscribe to "became empty" transitions.
    pub fn subscribe_empty(&self) -> EmptySubscription {
        EmptySubscription {
            rx: self.empty_epoch.subscribe(),
        }
    }

    /// Resolve once no connection is open. Immediate if already empty.
    pub async fn wait_until_empty(&self) {
        // Subscribe before checking so a close in between is not missed.
        let mut subscription = self.subscribe_empty();
        if self.is_empty() {
            return;
        }
        subscription.emptied().await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Edge-triggered notification of the connection set becoming empty.
#[derive(Debug)]
pub struct EmptySubscription {
    rx: watch::Receiver<u64>,
}

impl EmptySubscription {
    /// Wait for the next transition to empty since the last one observed.
    pub async fn emptied(&mut self) {
        if self.rx.changed().await.is_err() {
            // Tracker dropped: no more transitions.
            std::future::pending::<()>().await;
        }
    }
}

/// Request activity of one connection, used for the keep-alive timeout.
#[derive(Debug)]
pub struct ConnectionActivity {
    in_flight: AtomicUsize,
    last_active: Mutex<Instant>,
}

impl ConnectionActivity {
    fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            last_active: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    fn last_active(&self) -> Instant {
        *self.last_active.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Mark a request as in flight until the returned guard drops.
    pub fn begin_request(self: &Arc<Self>) -> RequestGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.touch();
        RequestGuard {
            activity: Arc::clone(self),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve once the connection has been idle for `timeout`.
    pub async fn idle_for(&self, timeout: Duration) {
        loop {
            let deadline = self.last_active() + timeout;
            if self.in_flight() == 0 && Instant::now() >= deadline {
                return;
            }
            if self.in_flight() > 0 {
                tokio::time::sleep(timeout).await;
            } else {
                tokio::time::sleep_until(deadline).await;
            }
        }
    }
}

/// Held for the duration of one request.
#[derive(Debug)]
pub struct RequestGuard {
    activity: Arc<ConnectionActivity>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.activity.touch();
        self.activity.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Guard that tracks a connection's lifetime.
/// Removes the connection from the tracker when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: ConnectionId,
    tracker: ConnectionTracker,
    kill: Option<oneshot::Receiver<()>>,
    destroyed: bool,
    activity: Arc<ConnectionActivity>,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn activity(&self) -> Arc<ConnectionActivity> {
        Arc::clone(&self.activity)
    }

    /// Resolve when the orchestrator destroys this connection.
    pub async fn destroyed(&mut self) {
        if let Some(kill) = self.kill.as_mut() {
            let result = kill.await;
            self.kill = None;
            self.destroyed = result.is_ok();
        }
        if !self.destroyed {
            std::future::pending::<()>().await;
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.close(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.size(), 0);

        let guard1 = tracker.open(peer());
        assert_eq!(tracker.size(), 1);

        let guard2 = tracker.open(peer());
        assert_eq!(tracker.size(), 2);

        drop(guard1);
        assert_eq!(tracker.size(), 1);

        drop(guard2);
        assert!(tracker.is_empty());
    }

    #[test]
    fn close_is_not_repeated() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.open(peer());
        let id = guard.id();

        assert!(tracker.close(id));
        assert!(!tracker.close(id));
        // Guard drop after an explicit close is a no-op.
        drop(guard);
        assert_eq!(tracker.size(), 0);
    }

    #[tokio::test]
    async fn notifies_once_per_empty_transition() {
        let tracker = ConnectionTracker::new();
        let mut subscription = tracker.subscribe_empty();

        let a = tracker.open(peer());
        let b = tracker.open(peer());
        drop(a);
        assert!(!subscription.rx.has_changed().unwrap());
        drop(b);
        subscription.emptied().await;
        assert!(!subscription.rx.has_changed().unwrap());

        let c = tracker.open(peer());
        drop(c);
        subscription.emptied().await;
        assert_eq!(*subscription.rx.borrow(), 2);
    }

    #[tokio::test]
    async fn wait_until_empty_is_immediate_without_connections() {
        let tracker = ConnectionTracker::new();
        tokio::time::timeout(Duration::from_millis(50), tracker.wait_until_empty())
            .await
            .expect("empty tracker should resolve immediately");
    }

    #[tokio::test]
    async fn wait_until_empty_resolves_on_last_close() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.open(peer());

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_until_empty().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[test]
    fn final_request_claimed_once() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.open(peer());

        assert!(tracker.claim_final_request(guard.id()));
        assert!(!tracker.claim_final_request(guard.id()));
        assert!(!tracker.claim_final_request(ConnectionId::new()));

        let mut used = 0;
        tracker.for_each(|conn| {
            if conn.final_request_used() {
                used += 1;
            }
        });
        assert_eq!(used, 1);
    }

    #[tokio::test]
    async fn destroy_fires_guard_once() {
        let tracker = ConnectionTracker::new();
        let mut guard = tracker.open(peer());

        let mut destroyed = 0;
        tracker.for_each(|conn| {
            if conn.destroy() {
                destroyed += 1;
            }
            assert!(!conn.destroy());
        });
        assert_eq!(destroyed, 1);

        tokio::time::timeout(Duration::from_millis(50), guard.destroyed())
            .await
            .expect("guard should observe destruction");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_waits_for_requests_to_finish() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.open(peer());
        let activity = guard.activity();

        let request = activity.begin_request();
        let idle = tokio::spawn({
            let activity = guard.activity();
            async move { activity.idle_for(Duration::from_secs(5)).await }
        });

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!idle.is_finished());

        drop(request);
        let released = Instant::now();
        idle.await.unwrap();
        assert!(released.elapsed() >= Duration::from_secs(5));
    }
}
