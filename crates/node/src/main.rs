//! `cachegrid-node` — storage node binary
//!
//! Starts the engine (running recovery if persistence is enabled), the
//! expiry sweeper, the periodic snapshotter, and the RESP listener.
//! Exits 0 on clean shutdown, non-zero on init failure.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use cachegrid_core::EvictionPolicy;
use cachegrid_node::{server, Engine, NodeConfig, Snapshotter};
use cachegrid_store::ExpirySweeper;

fn build_cli() -> Command {
    Command::new("cachegrid-node")
        .about("CacheGrid storage node")
        .arg(Arg::new("host").long("host").default_value("127.0.0.1"))
        .arg(
            Arg::new("port")
                .long("port")
                .default_value("7000")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(Arg::new("node-id").long("node-id").default_value("node1"))
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .default_value("./data")
                .help("Root directory for WAL and snapshot files"),
        )
        .arg(
            Arg::new("max-size")
                .long("max-size")
                .default_value("1000000")
                .value_parser(clap::value_parser!(usize))
                .help("Total entry quota across all shards"),
        )
        .arg(
            Arg::new("eviction-policy")
                .long("eviction-policy")
                .default_value("lru")
                .help("Victim selection policy: lru|lfu|random|ttl"),
        )
        .arg(
            Arg::new("persistence-enabled")
                .long("persistence-enabled")
                .default_value("true")
                .value_parser(clap::value_parser!(bool))
                .help("Log mutations to the WAL and take snapshots"),
        )
        .arg(
            Arg::new("shards")
                .long("shards")
                .default_value("16")
                .value_parser(clap::value_parser!(usize))
                .help("Shard count (power of two)"),
        )
        .arg(
            Arg::new("sweep-interval-ms")
                .long("sweep-interval-ms")
                .default_value("1000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("snapshot-interval-secs")
                .long("snapshot-interval-secs")
                .default_value("180")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("max-value-bytes")
                .long("max-value-bytes")
                .default_value("67108864")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("keep-snapshots")
                .long("keep-snapshots")
                .default_value("3")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Only log warnings and errors"),
        )
}

fn config_from_matches(matches: &clap::ArgMatches) -> anyhow::Result<NodeConfig> {
    let policy: EvictionPolicy = matches
        .get_one::<String>("eviction-policy")
        .expect("has default")
        .parse()
        .context("invalid --eviction-policy")?;

    let store = cachegrid_store::StoreConfig::default()
        .with_shards(*matches.get_one::<usize>("shards").expect("has default"))
        .with_max_size(*matches.get_one::<usize>("max-size").expect("has default"))
        .with_eviction_policy(policy)
        .with_max_value_bytes(
            *matches
                .get_one::<usize>("max-value-bytes")
                .expect("has default"),
        )
        .with_sweep_interval(Duration::from_millis(
            *matches
                .get_one::<u64>("sweep-interval-ms")
                .expect("has default"),
        ));
    store.validate().context("invalid store configuration")?;

    Ok(NodeConfig {
        host: matches
            .get_one::<String>("host")
            .expect("has default")
            .clone(),
        port: *matches.get_one::<u16>("port").expect("has default"),
        node_id: matches
            .get_one::<String>("node-id")
            .expect("has default")
            .clone(),
        data_dir: PathBuf::from(matches.get_one::<String>("data-dir").expect("has default")),
        persistence: *matches
            .get_one::<bool>("persistence-enabled")
            .expect("has default"),
        snapshot_interval: Duration::from_secs(
            *matches
                .get_one::<u64>("snapshot-interval-secs")
                .expect("has default"),
        ),
        keep_snapshots: *matches
            .get_one::<usize>("keep-snapshots")
            .expect("has default"),
        store,
    })
}

fn main() {
    let matches = build_cli().get_matches();

    let default_level = if matches.get_flag("quiet") { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match config_from_matches(&matches) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(2);
        }
    };

    if let Err(err) = run(config) {
        tracing::error!(error = format!("{err:#}"), "node failed");
        process::exit(1);
    }
}

fn run(config: NodeConfig) -> anyhow::Result<()> {
    let engine = Arc::new(Engine::open(&config).context("failed to open storage engine")?);

    let sweeper = ExpirySweeper::new(Arc::clone(engine.store()), config.store.sweep_interval);
    let sweeper_handle = sweeper.start();

    let snapshotter = config.persistence.then(|| {
        let snapshotter = Snapshotter::new(Arc::clone(&engine), config.snapshot_interval);
        let handle = snapshotter.start();
        (snapshotter, handle)
    });

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    runtime.block_on(async {
        let listener = TcpListener::bind(config.listen_addr())
            .await
            .with_context(|| format!("failed to bind {}", config.listen_addr()))?;
        tracing::info!(
            addr = %config.listen_addr(),
            node_id = %config.node_id,
            "node listening"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                let _ = stop_tx.send(true);
            }
        });

        server::serve(listener, Arc::clone(&engine), stop_rx)
            .await
            .context("server loop failed")
    })?;

    sweeper.shutdown();
    let _ = sweeper_handle.join();
    if let Some((snapshotter, handle)) = snapshotter {
        snapshotter.shutdown();
        let _ = handle.join();
    }

    engine.shutdown().context("final snapshot failed")?;
    tracing::info!("node stopped cleanly");
    Ok(())
}
