use std::time::Duration;

use bounded_pool::bench::{self, BenchConfig, BenchReport, DEFAULT_WORKERS};
use bounded_pool::database::{DEFAULT_DSN, DatabaseConfig, SimulatedDatabase};
use bounded_pool::DEFAULT_CAPACITY;
use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ApproachArg {
    Pool,
    Direct,
    Both,
}

/// Benchmark a fixed-size connection pool against opening one connection per task.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Which approach to run
    #[arg(long, value_enum, default_value_t = ApproachArg::Pool)]
    approach: ApproachArg,

    /// Number of connections in the pool
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    pool_size: usize,

    /// Number of concurrent workers
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Data source name of the database
    #[arg(long, default_value = DEFAULT_DSN)]
    dsn: String,

    /// Simulated time to open one connection, in milliseconds
    #[arg(long, default_value_t = 50)]
    connect_latency_ms: u64,

    /// Simulated time to run one query, in milliseconds
    #[arg(long, default_value_t = 10)]
    query_latency_ms: u64,
}

fn print_report(report: &BenchReport) {
    println!("{} benchmarking: {:?}", report.approach, report.elapsed);
    if report.failed > 0 {
        println!("{} of {} workers failed", report.failed, report.workers);
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    log::debug!("{cli:?}");

    let db = SimulatedDatabase::new(DatabaseConfig {
        dsn: cli.dsn,
        connect_latency: Duration::from_millis(cli.connect_latency_ms),
        query_latency: Duration::from_millis(cli.query_latency_ms),
    });
    let config = BenchConfig {
        pool_size: cli.pool_size,
        workers: cli.workers,
    };

    if matches!(cli.approach, ApproachArg::Direct | ApproachArg::Both) {
        print_report(&bench::run_direct(&db, &config).await);
    }

    if matches!(cli.approach, ApproachArg::Pool | ApproachArg::Both) {
        match bench::run_pooled(&db, &config).await {
            Ok(report) => print_report(&report),
            Err(e) => {
                log::error!("Cannot start connection pool: {e}");
                std::process::exit(1);
            }
        }
    }
}
