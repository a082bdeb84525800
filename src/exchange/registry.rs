//! Worker bookkeeping.
//!
//! # Responsibilities
//! - Name every connection worker uniquely
//! - Track running workers so the accept loop can reap and join them
//!
//! # Design Decisions
//! - Guarded by a mutex even though only the accept loop mutates it
//! - `drain` removes handles as it hands them out, so no handle is joined twice

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::task::JoinHandle;

/// Relaxed ordering is enough: IDs only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique name of an accepted connection and the worker serving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The set of spawned connection workers.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: Mutex<HashMap<ConnectionId, JoinHandle<()>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ConnectionId, handle: JoinHandle<()>) {
        self.workers
            .lock()
            .expect("worker registry mutex poisoned")
            .insert(id, handle);
    }

    /// Drop handles of workers that have finished. Returns how many were removed.
    pub fn reap(&self) -> usize {
        let mut workers = self.workers.lock().expect("worker registry mutex poisoned");
        let before = workers.len();
        workers.retain(|_, handle| !handle.is_finished());
        before - workers.len()
    }

    pub fn len(&self) -> usize {
        self.workers.lock().expect("worker registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every registered handle, leaving the registry empty.
    pub fn drain(&self) -> Vec<(ConnectionId, JoinHandle<()>)> {
        let mut workers = self.workers.lock().expect("worker registry mutex poisoned");
        let mut drained: Vec<_> = workers.drain().collect();
        drained.sort_unstable_by_key(|(id, _)| *id);
        drained
    }

    /// Wait for every registered worker to finish.
    pub async fn join_all(&self) -> usize {
        let drained = self.drain();
        let count = drained.len();
        for (id, handle) in drained {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::warn!(connection_id = %id, "Worker panicked");
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[test]
    fn connection_ids_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
        assert_eq!(id1.to_string(), format!("conn-{}", id1.as_u64()));
    }

    #[tokio::test]
    async fn reap_removes_only_finished_workers() {
        let registry = WorkerRegistry::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        registry.register(ConnectionId::new(), tokio::spawn(async {}));
        registry.register(
            ConnectionId::new(),
            tokio::spawn(async move {
                let _ = release_rx.await;
            }),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(registry.reap(), 1);
        assert_eq!(registry.len(), 1);

        release_tx.send(()).unwrap();
        assert_eq!(registry.join_all().await, 1);
        assert!(registry.is_empty());
        assert_eq!(registry.join_all().await, 0);
    }

    #[tokio::test]
    async fn join_all_survives_panicking_worker() {
        let registry = WorkerRegistry::new();
        registry.register(ConnectionId::new(), tokio::spawn(async { panic!("boom") }));
        registry.register(ConnectionId::new(), tokio::spawn(async {}));
        assert_eq!(registry.join_all().await, 2);
    }
}
