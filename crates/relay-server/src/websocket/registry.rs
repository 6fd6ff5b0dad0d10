//! Registry of chat connections eligible to receive broadcasts.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::Mutex;

use super::connection::ConnectionHandle;
use crate::ids::ConnectionId;

/// The set of live chat connections.
///
/// A single mutex guards add, remove, and snapshot. Broadcasts iterate a
/// snapshot taken under the lock, never the live map, so slow sends never
/// hold up registration.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Returns `false` (and changes nothing) if it is
    /// already registered.
    pub fn register(&self, connection: Arc<ConnectionHandle>) -> bool {
        match self.connections.lock().entry(connection.id().clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let _ = slot.insert(connection);
                true
            }
        }
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub fn deregister(&self, id: &ConnectionId) -> bool {
        self.connections.lock().remove(id).is_some()
    }

    /// Point-in-time copy of every registered connection.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.lock().values().cloned().collect()
    }

    /// Whether a connection is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.lock().contains_key(id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn make_connection() -> Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::channel(8);
        Arc::new(ConnectionHandle::new(
            None,
            tx,
            CancellationToken::new(),
            Duration::from_secs(1),
        ))
    }

    #[test]
    fn register_and_deregister() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());

        let c1 = make_connection();
        let c2 = make_connection();
        assert!(registry.register(Arc::clone(&c1)));
        assert!(registry.register(Arc::clone(&c2)));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(c1.id()));

        assert!(registry.deregister(c1.id()));
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(c1.id()));
    }

    #[test]
    fn register_twice_is_noop() {
        let registry = ConnectionRegistry::new();
        let conn = make_connection();
        assert!(registry.register(Arc::clone(&conn)));
        assert!(!registry.register(Arc::clone(&conn)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn deregister_absent_is_noop() {
        let registry = ConnectionRegistry::new();
        let conn = make_connection();
        assert!(!registry.deregister(conn.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_later_mutation() {
        let registry = ConnectionRegistry::new();
        let c1 = make_connection();
        let c2 = make_connection();
        let _ = registry.register(Arc::clone(&c1));
        let _ = registry.register(Arc::clone(&c2));

        let snapshot = registry.snapshot();
        let _ = registry.deregister(c1.id());
        let _ = registry.register(make_connection());

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().any(|c| c.id() == c1.id()));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registration_is_exact() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();
        for _ in 0..100 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let conn = make_connection();
                assert!(registry.register(Arc::clone(&conn)));
                conn
            }));
        }
        let mut connections = Vec::new();
        for task in tasks {
            connections.push(task.await.unwrap());
        }
        assert_eq!(registry.len(), 100);

        let mut removals = Vec::new();
        for conn in connections.into_iter().take(40) {
            let registry = Arc::clone(&registry);
            removals.push(tokio::spawn(async move { registry.deregister(conn.id()) }));
        }
        for removal in removals {
            assert!(removal.await.unwrap());
        }
        assert_eq!(registry.len(), 60);
    }
}
