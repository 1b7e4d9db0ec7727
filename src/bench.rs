//! Pooled versus per-task connection benchmarks.

use std::time::{Duration, Instant};

use crate::database::{DbError, SimulatedDatabase, execute};
use crate::error::PoolError;
use crate::pool::{DEFAULT_CAPACITY, Pool};

pub const DEFAULT_WORKERS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approach {
    /// Workers borrow from a shared pool of pre-opened connections.
    Pooled,
    /// Every worker opens and closes its own connection.
    Direct,
}

impl std::fmt::Display for Approach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Approach::Pooled => write!(f, "Connection pool approach"),
            Approach::Direct => write!(f, "Non connection pool approach"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub pool_size: usize,
    pub workers: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_CAPACITY,
            workers: DEFAULT_WORKERS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BenchReport {
    pub approach: Approach,
    pub workers: usize,
    /// Workers whose unit of work did not complete.
    pub failed: usize,
    pub elapsed: Duration,
}

#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error(transparent)]
    Acquire(#[from] PoolError<DbError>),
    #[error(transparent)]
    Execute(#[from] DbError),
}

/// Opens a pool of `pool_size` connections and runs `workers` concurrent
/// acquire, execute, release cycles against it, then shuts the pool down.
///
/// Fails only if the pool cannot be built. The elapsed time includes opening the pool.
pub async fn run_pooled(
    db: &SimulatedDatabase,
    config: &BenchConfig,
) -> Result<BenchReport, PoolError<DbError>> {
    let start = Instant::now();
    let pool = Pool::new(config.pool_size, db.clone()).await?;

    log::info!("Spawning {} workers...", config.workers);
    let mut handles = Vec::with_capacity(config.workers);
    for worker in 0..config.workers {
        let pool = pool.clone();
        let handle = tokio::spawn(async move {
            let mut conn = pool.acquire().await?;
            let result = execute(&mut conn).await;
            // Hand the connection back even when the query failed.
            if let Err(e) = pool.release(conn) {
                log::error!("Worker {worker} could not release its connection: {e}");
            }
            result.map_err(WorkerError::from)
        });
        handles.push(handle);
    }

    log::info!("Waiting for all workers to finish...");
    let failed = collect_failures(handles).await;

    log::debug!("Pool status before shutdown: {:?}", pool.status());
    pool.shutdown().await;

    Ok(BenchReport {
        approach: Approach::Pooled,
        workers: config.workers,
        failed,
        elapsed: start.elapsed(),
    })
}

/// Runs `workers` concurrent tasks that each open a connection, execute once and
/// close it again.
pub async fn run_direct(db: &SimulatedDatabase, config: &BenchConfig) -> BenchReport {
    let start = Instant::now();

    log::info!("Spawning {} workers, one connection each...", config.workers);
    let mut handles = Vec::with_capacity(config.workers);
    for _ in 0..config.workers {
        let db = db.clone();
        let handle = tokio::spawn(async move {
            let mut conn = db.connect().await?;
            let result = execute(&mut conn).await;
            conn.close();
            result.map_err(WorkerError::from)
        });
        handles.push(handle);
    }

    let failed = collect_failures(handles).await;

    BenchReport {
        approach: Approach::Direct,
        workers: config.workers,
        failed,
        elapsed: start.elapsed(),
    }
}

async fn collect_failures(handles: Vec<tokio::task::JoinHandle<Result<(), WorkerError>>>) -> usize {
    let mut failed = 0;
    for (worker, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::warn!("Worker {worker} failed: {e}");
                failed += 1;
            }
            Err(e) => {
                log::error!("Worker {worker} aborted: {e}");
                failed += 1;
            }
        }
    }
    failed
}
