//! `cachegrid-healthd` — cluster health monitor
//!
//! Registers the configured nodes, probes them on a fixed cadence, and
//! serves the registry over HTTP for proxies to poll.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Arg, Command};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use cachegrid_core::parse_cluster_nodes;
use cachegrid_health::{http, HealthChecker, HealthRegistry};

fn build_cli() -> Command {
    Command::new("cachegrid-healthd")
        .about("CacheGrid health monitor")
        .arg(Arg::new("host").long("host").default_value("127.0.0.1"))
        .arg(
            Arg::new("port")
                .long("port")
                .default_value("8080")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("cluster-nodes")
                .long("cluster-nodes")
                .required(true)
                .help("Comma-separated nodes: [id=]host:port,..."),
        )
        .arg(
            Arg::new("check-interval")
                .long("check-interval")
                .default_value("30")
                .value_parser(clap::value_parser!(u64))
                .help("Seconds between probe rounds"),
        )
        .arg(
            Arg::new("check-timeout")
                .long("check-timeout")
                .default_value("5")
                .value_parser(clap::value_parser!(u64))
                .help("Per-probe timeout in seconds"),
        )
        .arg(
            Arg::new("failure-threshold")
                .long("failure-threshold")
                .default_value("2")
                .value_parser(clap::value_parser!(u32))
                .help("Consecutive failures before a node is UNHEALTHY"),
        )
}

fn main() {
    let matches = build_cli().get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(&matches) {
        tracing::error!(error = format!("{err:#}"), "health service failed");
        process::exit(1);
    }
}

#[tokio::main]
async fn run(matches: &clap::ArgMatches) -> anyhow::Result<()> {
    let nodes = parse_cluster_nodes(
        matches
            .get_one::<String>("cluster-nodes")
            .expect("required arg"),
    )
    .context("invalid --cluster-nodes")?;

    let interval = Duration::from_secs(*matches.get_one::<u64>("check-interval").expect("default"));
    let timeout = Duration::from_secs(*matches.get_one::<u64>("check-timeout").expect("default"));
    let threshold = *matches.get_one::<u32>("failure-threshold").expect("default");

    let registry = Arc::new(HealthRegistry::new(threshold));
    for node in &nodes {
        registry.register(node);
        tracing::info!(node_id = %node.id, addr = %node.addr(), "registered node");
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let checker = HealthChecker::new(Arc::clone(&registry), interval, timeout);
    let checker_task = tokio::spawn(async move { checker.run(stop_rx).await });

    let bind = format!(
        "{}:{}",
        matches.get_one::<String>("host").expect("default"),
        matches.get_one::<u16>("port").expect("default")
    );
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %bind, nodes = nodes.len(), "health service listening");

    axum::serve(listener, http::router(registry))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("http server failed")?;

    let _ = stop_tx.send(true);
    let _ = checker_task.await;
    tracing::info!("health service stopped cleanly");
    Ok(())
}
