//! Per-Worker Connection Cache
//!
//! Each worker owns exactly one `WorkerConnection`. The underlying MySQL
//! connection is opened on first use and reused for every later request
//! routed to the same worker.

use std::sync::Arc;

use sqlx::mysql::MySqlConnection;
use sqlx::Connection;

use super::credentials::Credentials;
use super::result::{QueryError, QueryErrorKind};

/// Identity of a worker inside the pool
pub type WorkerId = usize;

/// Lazily opened connection owned by a single worker
pub struct WorkerConnection {
    worker_id: WorkerId,
    credentials: Arc<Credentials>,
    conn: Option<MySqlConnection>,
    connects: u64,
}

impl WorkerConnection {
    pub fn new(worker_id: WorkerId, credentials: Arc<Credentials>) -> Self {
        Self {
            worker_id,
            credentials,
            conn: None,
            connects: 0,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Whether a connection is currently cached
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// How many times this worker had to (re)connect
    pub fn connect_count(&self) -> u64 {
        self.connects
    }

    /// Get the cached connection, opening it first if needed
    pub async fn acquire(&mut self) -> std::result::Result<&mut MySqlConnection, QueryError> {
        if self.conn.is_none() {
            let conn = self.connect().await?;
            self.conn = Some(conn);
        }

        self.conn.as_mut().ok_or_else(|| {
            QueryError::new(QueryErrorKind::ConnectionError, "connection unavailable")
        })
    }

    async fn connect(&mut self) -> std::result::Result<MySqlConnection, QueryError> {
        let options = self.credentials.connect_options();
        let timeout = self.credentials.connect_timeout();

        let conn = match tokio::time::timeout(timeout, MySqlConnection::connect_with(&options)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                tracing::debug!(
                    "Worker {} failed to connect to {}: {}",
                    self.worker_id,
                    self.credentials.redacted_url(),
                    e
                );
                return Err(QueryError::new(QueryErrorKind::ConnectionError, e.to_string()));
            }
            Err(_) => {
                return Err(QueryError::new(
                    QueryErrorKind::ConnectionError,
                    format!(
                        "timed out after {:?} connecting to {}:{}",
                        timeout,
                        self.credentials.host(),
                        self.credentials.port()
                    ),
                ));
            }
        };

        self.connects += 1;
        tracing::debug!(
            "Worker {} connected to {} (connect #{})",
            self.worker_id,
            self.credentials.redacted_url(),
            self.connects
        );
        Ok(conn)
    }

    /// Drop a connection that is known to be broken; the next request reconnects
    pub fn invalidate(&mut self) {
        if self.conn.take().is_some() {
            tracing::debug!("Worker {} discarded its cached connection", self.worker_id);
        }
    }

    /// Close the cached connection gracefully
    pub async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                tracing::debug!("Worker {} connection close failed: {}", self.worker_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn unreachable_credentials() -> Arc<Credentials> {
        // Port 1 on loopback is never a MySQL server
        Arc::new(
            Credentials::new("127.0.0.1", "fleet", "secret", "network", 1)
                .with_connect_timeout(Duration::from_secs(2)),
        )
    }

    #[test]
    fn test_starts_closed() {
        let conn = WorkerConnection::new(3, unreachable_credentials());
        assert_eq!(conn.worker_id(), 3);
        assert!(!conn.is_open());
        assert_eq!(conn.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connection_error() {
        let mut conn = WorkerConnection::new(0, unreachable_credentials());

        let err = conn.acquire().await.err().unwrap();
        assert_eq!(err.kind, QueryErrorKind::ConnectionError);
        assert!(!conn.is_open());

        // Still recoverable: a second attempt fails the same way
        let err = conn.acquire().await.err().unwrap();
        assert_eq!(err.kind, QueryErrorKind::ConnectionError);
    }
}
