//! service-balancer runner.
//!
//! Loads a configuration, starts health monitoring and drives a fixed number
//! of requests through the balancer, then prints the collected statistics.
//!
//! ```text
//!   requests ──▶ workers (concurrency) ──▶ Balancer::dispatch_with_retry
//!                                            │
//!               ┌────────────────────────────┼─────────────────────────┐
//!               │  strategy ─▶ breaker ─▶ HttpUpstream ─▶ analytics     │
//!               │                                                      │
//!               │  HealthMonitor (HttpProbe) ─▶ FailoverController     │
//!               └──────────────────────────────────────────────────────┘
//!                                            │
//!                                            ▼
//!                                  JSON report on stdout
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clap::Parser;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;

use service_balancer::analytics::{OverallStats, RequestRecord, TrafficDistribution};
use service_balancer::config::{load_config, BalancerConfig, StrategyKind};
use service_balancer::failover::FailoverStats;
use service_balancer::health::{HealthSummary, HttpProbe};
use service_balancer::lifecycle::signals;
use service_balancer::observability::{logging, metrics};
use service_balancer::{Balancer, HttpUpstream};

#[derive(Parser)]
#[command(name = "service-balancer")]
#[command(about = "Drive requests through the service load balancer", long_about = None)]
struct Args {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of requests to send.
    #[arg(short, long, default_value_t = 100)]
    requests: usize,

    /// Concurrent request workers.
    #[arg(long, default_value_t = 10)]
    concurrency: usize,

    /// Override the configured selection strategy.
    #[arg(short, long)]
    strategy: Option<StrategyKind>,

    /// Number of recent requests to include in the report.
    #[arg(long, default_value_t = 10)]
    history: usize,
}

#[derive(Serialize)]
struct Report {
    strategy: StrategyKind,
    succeeded: usize,
    failed: usize,
    overall: OverallStats,
    distribution: TrafficDistribution,
    health: HealthSummary,
    failover: FailoverStats,
    recent_requests: Vec<RequestRecord>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => BalancerConfig::default(),
    };
    if let Some(kind) = args.strategy {
        config.strategy.kind = kind;
    }

    logging::init(&config.observability);
    tracing::info!("service-balancer v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to install metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    if config.instances.is_empty() {
        tracing::warn!("No instances configured, every request will fail");
    }

    let balancer = Arc::new(Balancer::from_config(&config)?);
    let monitor = balancer.health_monitor(Arc::new(HttpProbe::new(&config.health_check)?))?;
    let monitor_handle = monitor.spawn();
    let upstream = Arc::new(HttpUpstream::new(&config.request)?);

    tracing::info!(
        requests = args.requests,
        concurrency = args.concurrency,
        strategy = %balancer.strategy_kind(),
        "Sending requests"
    );

    let totals = Arc::new(Totals::default());
    let workers = spawn_workers(
        balancer.clone(),
        upstream,
        totals.clone(),
        args.requests,
        args.concurrency,
    );

    let aborts: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();

    tokio::select! {
        _ = join_all(workers) => {}
        _ = signals::wait_for_shutdown() => {
            tracing::info!("Interrupted, reporting partial results");
            for abort in &aborts {
                abort.abort();
            }
        }
    }

    monitor_handle.stop().await;

    let report = Report {
        strategy: balancer.strategy_kind(),
        succeeded: totals.succeeded.load(Ordering::Relaxed),
        failed: totals.failed.load(Ordering::Relaxed),
        overall: balancer.analytics().get_overall_stats(),
        distribution: balancer.analytics().get_traffic_distribution(),
        health: monitor.summary(),
        failover: balancer.failover().stats(),
        recent_requests: balancer.analytics().get_recent_history(args.history),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Completed requests, shared by all workers.
#[derive(Default)]
struct Totals {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

/// Spawn `concurrency` workers that together send `requests` calls.
fn spawn_workers(
    balancer: Arc<Balancer>,
    upstream: Arc<HttpUpstream>,
    totals: Arc<Totals>,
    requests: usize,
    concurrency: usize,
) -> Vec<JoinHandle<()>> {
    let issued = Arc::new(AtomicUsize::new(0));

    (0..concurrency.max(1))
        .map(|_| {
            let balancer = balancer.clone();
            let upstream = upstream.clone();
            let totals = totals.clone();
            let issued = issued.clone();
            tokio::spawn(async move {
                while issued.fetch_add(1, Ordering::Relaxed) < requests {
                    match balancer.dispatch_with_retry(upstream.as_ref()).await {
                        Ok(_) => {
                            totals.succeeded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            totals.failed.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(error = %e, "Request failed");
                        }
                    }
                }
            })
        })
        .collect()
}
