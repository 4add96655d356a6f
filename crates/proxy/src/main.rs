//! `cachegrid-proxy` — RESP routing proxy
//!
//! Builds the ring and backend pool from `--cluster-nodes`, polls the
//! health service, and serves clients. Exits 0 on clean shutdown,
//! non-zero on init failure.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Arg, Command};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use cachegrid_core::parse_cluster_nodes;
use cachegrid_proxy::{server, ProxyConfig, ProxyState};

fn build_cli() -> Command {
    Command::new("cachegrid-proxy")
        .about("CacheGrid routing proxy")
        .arg(Arg::new("host").long("host").default_value("127.0.0.1"))
        .arg(
            Arg::new("port")
                .long("port")
                .default_value("6379")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(Arg::new("proxy-id").long("proxy-id").default_value("proxy1"))
        .arg(
            Arg::new("cluster-nodes")
                .long("cluster-nodes")
                .required(true)
                .help("Comma-separated nodes: [id=]host:port,..."),
        )
        .arg(
            Arg::new("health-service")
                .long("health-service")
                .default_value("http://127.0.0.1:8080")
                .help("Base URL of the health service"),
        )
        .arg(
            Arg::new("poll-interval")
                .long("poll-interval")
                .default_value("15")
                .value_parser(clap::value_parser!(u64))
                .help("Seconds between health registry polls"),
        )
        .arg(
            Arg::new("check-interval")
                .long("check-interval")
                .default_value("30")
                .value_parser(clap::value_parser!(u64))
                .help("The checker's probe cadence; snapshots older than twice this are stale"),
        )
        .arg(
            Arg::new("backend-timeout")
                .long("backend-timeout")
                .default_value("5")
                .value_parser(clap::value_parser!(u64))
                .help("Per-request timeout toward a node, in seconds"),
        )
        .arg(
            Arg::new("vnodes")
                .long("vnodes")
                .default_value("150")
                .value_parser(clap::value_parser!(u32))
                .help("Virtual positions per node on the ring"),
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
        tracing::error!(error = format!("{err:#}"), "proxy failed");
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

    let config = ProxyConfig {
        host: matches.get_one::<String>("host").expect("default").clone(),
        port: *matches.get_one::<u16>("port").expect("default"),
        proxy_id: matches
            .get_one::<String>("proxy-id")
            .expect("default")
            .clone(),
        nodes,
        health_service: matches
            .get_one::<String>("health-service")
            .expect("default")
            .clone(),
        poll_interval: Duration::from_secs(
            *matches.get_one::<u64>("poll-interval").expect("default"),
        ),
        check_interval: Duration::from_secs(
            *matches.get_one::<u64>("check-interval").expect("default"),
        ),
        backend_timeout: Duration::from_secs(
            *matches.get_one::<u64>("backend-timeout").expect("default"),
        ),
        vnodes: *matches.get_one::<u32>("vnodes").expect("default"),
    };

    let state = Arc::new(ProxyState::new(&config));
    let (stop_tx, stop_rx) = watch::channel(false);

    // Health poller; the first refresh happens immediately so the gate
    // opens as soon as the registry answers.
    {
        let state = Arc::clone(&state);
        let stop_rx = stop_rx.clone();
        let poll_interval = config.poll_interval;
        tokio::spawn(async move {
            state.health().poll_loop(poll_interval, stop_rx).await;
        });
    }

    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr()))?;
    tracing::info!(
        addr = %config.listen_addr(),
        proxy_id = %config.proxy_id,
        nodes = config.nodes.len(),
        "proxy listening"
    );

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = stop_tx.send(true);
        }
    });

    server::serve(listener, state, stop_rx)
        .await
        .context("server loop failed")?;
    tracing::info!("proxy stopped cleanly");
    Ok(())
}
