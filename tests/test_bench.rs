use std::time::Duration;

use bounded_pool::PoolError;
use bounded_pool::bench::{Approach, BenchConfig, run_direct, run_pooled};
use bounded_pool::database::{DatabaseConfig, SimulatedDatabase};

fn quick_config() -> DatabaseConfig {
    DatabaseConfig {
        connect_latency: Duration::from_millis(1),
        query_latency: Duration::from_millis(1),
        ..DatabaseConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pooled_benchmark_reuses_connections() {
    let _ = env_logger::builder().is_test(true).try_init();

    let db = SimulatedDatabase::new(quick_config());
    let report = run_pooled(&db, &BenchConfig::default()).await.unwrap();

    assert_eq!(report.approach, Approach::Pooled);
    assert_eq!(report.workers, 200);
    assert_eq!(report.failed, 0);
    assert_eq!(db.opened(), 10);
    assert_eq!(db.closed(), 10);
    assert_eq!(db.queries(), 200);
}

#[tokio::test]
async fn test_direct_benchmark_opens_per_worker() {
    let db = SimulatedDatabase::new(quick_config());
    let config = BenchConfig {
        pool_size: 10,
        workers: 20,
    };
    let report = run_direct(&db, &config).await;

    assert_eq!(report.approach, Approach::Direct);
    assert_eq!(report.failed, 0);
    assert_eq!(db.opened(), 20);
    assert_eq!(db.closed(), 20);
    assert_eq!(db.queries(), 20);
}

#[tokio::test]
async fn test_failed_queries_still_release() {
    let db = SimulatedDatabase::new(quick_config());
    db.set_query_failure(true);
    let config = BenchConfig {
        pool_size: 4,
        workers: 30,
    };
    let report = run_pooled(&db, &config).await.unwrap();

    assert_eq!(report.failed, 30);
    assert_eq!(db.queries(), 0);
    assert_eq!(db.opened(), 4);
    assert_eq!(db.closed(), 4);
}

#[tokio::test]
async fn test_pool_provisioning_failure() {
    let db = SimulatedDatabase::with_max_connections(quick_config(), 3);
    let config = BenchConfig {
        pool_size: 5,
        workers: 10,
    };
    let err = run_pooled(&db, &config).await.unwrap_err();

    assert!(matches!(err, PoolError::Provisioning { index: 4, capacity: 5, .. }));
    assert_eq!(db.opened(), 3);
    assert_eq!(db.closed(), 3);
    assert_eq!(db.queries(), 0);
}
