//! A simulated database driver.
//!
//! Stands in for a real client so the pool can be benchmarked without a server.
//! Connecting and querying only sleep for the configured latency; the shared
//! counters record what a real server would have seen.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::manager::ManageConnection;

pub const DEFAULT_DSN: &str = "user:password@tcp(localhost:3307)/db";
pub const DEFAULT_CONNECT_LATENCY: Duration = Duration::from_millis(50);
pub const DEFAULT_QUERY_LATENCY: Duration = Duration::from_millis(10);

/// The query every benchmark worker issues.
pub const BENCH_QUERY: &str = "SELECT sleep(0.01);";

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Cannot connect to {dsn}: {reason}")]
    Connect { dsn: String, reason: String },
    #[error("Connection {0} is closed")]
    ConnectionClosed(u64),
    #[error("Query `{sql}` failed on connection {id}")]
    Query { id: u64, sql: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub dsn: String,
    pub connect_latency: Duration,
    pub query_latency: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: DEFAULT_DSN.to_string(),
            connect_latency: DEFAULT_CONNECT_LATENCY,
            query_latency: DEFAULT_QUERY_LATENCY,
        }
    }
}

#[derive(Debug, Default)]
struct ServerState {
    next_id: AtomicU64,
    opened: AtomicUsize,
    closed: AtomicUsize,
    queries: AtomicUsize,
    max_connections: Option<usize>,
    fail_queries: AtomicBool,
}

/// Handle to the simulated server. Clones share the same counters.
#[derive(Debug, Clone)]
pub struct SimulatedDatabase {
    config: Arc<DatabaseConfig>,
    state: Arc<ServerState>,
}

impl SimulatedDatabase {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(ServerState::default()),
        }
    }

    /// A server that refuses connections once `max` have been opened in total.
    pub fn with_max_connections(config: DatabaseConfig, max: usize) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(ServerState {
                max_connections: Some(max),
                ..ServerState::default()
            }),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Makes every subsequent query fail (or succeed again).
    pub fn set_query_failure(&self, fail: bool) {
        self.state.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Connections opened so far.
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Connections closed so far.
    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Queries that completed successfully.
    pub fn queries(&self) -> usize {
        self.state.queries.load(Ordering::SeqCst)
    }

    pub async fn connect(&self) -> Result<DbConnection, DbError> {
        tokio::time::sleep(self.config.connect_latency).await;

        let previously_opened = self.state.opened.fetch_add(1, Ordering::SeqCst);
        if let Some(max) = self.state.max_connections {
            if previously_opened >= max {
                self.state.opened.fetch_sub(1, Ordering::SeqCst);
                return Err(DbError::Connect {
                    dsn: self.config.dsn.clone(),
                    reason: format!("too many connections (max {max})"),
                });
            }
        }

        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        log::trace!("Opened database connection {id} to {}", self.config.dsn);
        Ok(DbConnection {
            id,
            open: true,
            db: self.clone(),
        })
    }
}

/// One open session with the simulated server. Closed on drop.
#[derive(Debug)]
pub struct DbConnection {
    id: u64,
    open: bool,
    db: SimulatedDatabase,
}

impl DbConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub async fn query(&mut self, sql: &str) -> Result<(), DbError> {
        if !self.open {
            return Err(DbError::ConnectionClosed(self.id));
        }
        tokio::time::sleep(self.db.config.query_latency).await;
        if self.db.state.fail_queries.load(Ordering::SeqCst) {
            return Err(DbError::Query {
                id: self.id,
                sql: sql.to_string(),
            });
        }
        self.db.state.queries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn close(&mut self) {
        if self.open {
            self.open = false;
            self.db.state.closed.fetch_add(1, Ordering::SeqCst);
            log::trace!("Closed database connection {}", self.id);
        }
    }
}

impl Drop for DbConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Performs one unit of benchmark work on a connection.
pub async fn execute(conn: &mut DbConnection) -> Result<(), DbError> {
    conn.query(BENCH_QUERY).await
}

#[async_trait::async_trait]
impl ManageConnection for SimulatedDatabase {
    type Connection = DbConnection;
    type Error = DbError;

    async fn connect(&self) -> Result<DbConnection, DbError> {
        SimulatedDatabase::connect(self).await
    }

    async fn close(&self, mut conn: DbConnection) -> Result<(), DbError> {
        conn.close();
        Ok(())
    }
}
