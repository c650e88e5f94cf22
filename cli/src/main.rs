//! Vigil CLI - binary entry point for the background engine.
//!
//! # Architecture
//!
//! ```text
//! main() -> startup sequence -> host bridge feed (stdin JSON lines)
//!                |
//!                v
//!   EventStore + UsageAggregator + RetentionSweeper + TabListenerRegistry
//! ```
//!
//! The browser side of the bridge is stood in for by stdin: the host (or a
//! developer) writes one JSON-encoded tab event per line. The process runs
//! until the feed closes or ctrl-c.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use vigil_engine::{
    HostBridge, RetentionSweeper, Startup, TabListenerRegistry, UsageAggregator, VigilConfig,
};
use vigil_store::EventStore;
use vigil_types::TabEvent;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    // A background process logs to stderr; stdout stays free for the host.
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load_config() -> VigilConfig {
    match VigilConfig::load() {
        Ok(Some(config)) => config,
        Ok(None) => VigilConfig::default(),
        Err(err) => {
            // An unusable config file must not keep the engine down.
            tracing::warn!("Ignoring unusable config at {:?}; using defaults", err.path());
            VigilConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = load_config();
    let dev_mode = config.dev_mode();

    let store = Arc::new(EventStore::new(config.storage_path()));
    let aggregator = Arc::new(UsageAggregator::new(Arc::clone(&store)));
    let sweeper = Arc::new(RetentionSweeper::new(
        Arc::clone(&store),
        config.retention_policy(),
    ));
    let (registry, bridge) =
        TabListenerRegistry::new(Arc::clone(&store), Arc::clone(&aggregator));

    let mut startup = Startup::new(
        Arc::clone(&store),
        Arc::clone(&aggregator),
        Arc::clone(&sweeper),
        Arc::new(registry),
        dev_mode,
    );
    startup.run().await?;

    feed_host_bridge(&bridge).await?;

    if dev_mode {
        for bucket in aggregator.snapshot_today().await {
            tracing::info!("today: {} {}s", bucket.domain, bucket.seconds);
        }
    }
    Ok(())
}

/// Forward stdin lines to the engine until EOF or ctrl-c.
async fn feed_host_bridge(bridge: &HostBridge) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted; shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::info!("event feed closed; shutting down");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<TabEvent>(line) {
                    Ok(event) => {
                        if !bridge.emit(event) {
                            tracing::warn!("engine dispatch is gone; stopping feed");
                            break;
                        }
                    }
                    Err(err) => tracing::warn!("Ignoring malformed event line: {err}"),
                }
            }
        }
    }
    Ok(())
}
