//! One shared connection per namespace.
//!
//! Consumers (ride trackers, planner trackers, driver presence) ask the hub
//! for a lease. Leases are plain `Arc<Connection>` handles: the connection is
//! opened on the first request and shut down when the last lease is dropped.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::info;

use super::connection::{Connection, ConnectionManager, Namespace};
use crate::auth::TokenProvider;

pub struct SocketHub {
    manager: ConnectionManager,
    tokens: RwLock<Arc<dyn TokenProvider>>,
    connections: Mutex<HashMap<Namespace, Weak<Connection>>>,
}

impl SocketHub {
    pub fn new(manager: ConnectionManager, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            manager,
            tokens: RwLock::new(tokens),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Lease the connection for `namespace`, opening it if needed.
    pub fn acquire(&self, namespace: Namespace) -> Arc<Connection> {
        let mut connections = self.connections.lock();
        if let Some(conn) = connections.get(&namespace).and_then(Weak::upgrade) {
            if !conn.is_closed() {
                return conn;
            }
        }

        info!(namespace = %namespace, "Opening shared connection");
        let conn = Arc::new(self.manager.open(namespace, self.tokens.read().clone()));
        connections.insert(namespace, Arc::downgrade(&conn));
        conn
    }

    /// Namespaces with at least one live lease.
    pub fn active(&self) -> Vec<Namespace> {
        let mut connections = self.connections.lock();
        connections.retain(|_, weak| weak.strong_count() > 0);
        connections
            .iter()
            .filter_map(|(ns, weak)| weak.upgrade().filter(|c| !c.is_closed()).map(|_| *ns))
            .collect()
    }

    /// Close every connection and use `tokens` for connections opened from
    /// now on. Existing leases observe their connection as closed.
    pub async fn switch_identity(&self, tokens: Arc<dyn TokenProvider>) {
        let live: Vec<Arc<Connection>> = {
            let mut connections = self.connections.lock();
            connections.drain().filter_map(|(_, weak)| weak.upgrade()).collect()
        };
        *self.tokens.write() = tokens;

        info!(closed = live.len(), "Switching identity");
        for conn in live {
            conn.close().await;
        }
    }

    /// Close every connection without changing identity.
    pub async fn close_all(&self) {
        let live: Vec<Arc<Connection>> = {
            let mut connections = self.connections.lock();
            connections.drain().filter_map(|(_, weak)| weak.upgrade()).collect()
        };
        for conn in live {
            conn.close().await;
        }
    }
}
