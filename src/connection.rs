//! Connection Manager
//!
//! Owns the keyed set of live database connections. Connections are opened
//! lazily on first use, probed before every reuse, replaced when the probe
//! fails, and closed together at shutdown.
//!
//! The cache map is guarded by an async mutex so acquire/replace is a single
//! check-then-act step. Each handle sits behind its own mutex: whoever holds
//! it has exclusive use of the database session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::engine::{Connector, DatabaseConnection};
use crate::error::Result;

/// Key of the single connection shared by every request
pub const DEFAULT_CONNECTION_KEY: &str = "default";

/// Upper bound for closing one connection during shutdown
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A cached connection handle
pub type SharedConnection<T> = Arc<Mutex<T>>;

pub struct ConnectionManager<C: Connector> {
    connector: C,
    connections: Mutex<HashMap<String, SharedConnection<C::Connection>>>,
    close_timeout: Duration,
}

impl<C: Connector> ConnectionManager<C> {
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self { connector, connections: Mutex::new(HashMap::new()), close_timeout: DEFAULT_CLOSE_TIMEOUT }
    }

    #[must_use]
    pub const fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    #[must_use]
    pub const fn connector(&self) -> &C {
        &self.connector
    }

    /// Return the live handle for `key`, opening one if none is cached or the
    /// cached one fails its liveness probe.
    ///
    /// # Errors
    /// Propagates the connector's error when a new connection cannot be opened;
    /// nothing is cached in that case.
    pub async fn acquire(&self, key: &str) -> Result<SharedConnection<C::Connection>> {
        let mut connections = self.connections.lock().await;

        if let Some(existing) = connections.get(key) {
            if existing.lock().await.is_valid().await {
                return Ok(Arc::clone(existing));
            }
            tracing::warn!(key, "cached connection failed its liveness probe, replacing it");
        }

        // A dead handle is dropped, never repaired
        if let Some(dead) = connections.remove(key) {
            self.close_one(key, &dead).await;
        }

        let connection = self.connector.connect().await?;
        tracing::info!(key, "database connection established");

        let shared = Arc::new(Mutex::new(connection));
        connections.insert(key.to_string(), Arc::clone(&shared));
        Ok(shared)
    }

    /// Close every cached connection and empty the cache.
    ///
    /// Each close is bounded by the close timeout; failures are logged, never
    /// raised. Calling it again finds an empty cache and does nothing.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, SharedConnection<C::Connection>)> =
            self.connections.lock().await.drain().collect();

        if drained.is_empty() {
            return;
        }

        for (key, connection) in &drained {
            self.close_one(key, connection).await;
        }
        tracing::info!(closed = drained.len(), "connection manager shut down");
    }

    /// Number of cached handles
    pub async fn cached(&self) -> usize {
        self.connections.lock().await.len()
    }

    async fn close_one(&self, key: &str, connection: &SharedConnection<C::Connection>) {
        let closing = async { connection.lock().await.close().await };

        match tokio::time::timeout(self.close_timeout, closing).await {
            Ok(Ok(())) => tracing::debug!(key, "connection closed"),
            Ok(Err(e)) => tracing::warn!(key, error = %e, "failed to close connection"),
            Err(_) => tracing::warn!(
                key,
                timeout_ms = self.close_timeout.as_millis() as u64,
                "timed out closing connection"
            ),
        }
    }
}
