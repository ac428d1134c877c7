// Copyright (c) 2026 Divachain
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Divachain node entrypoint.
//!
//! Wires the wallet, block store, overlay, HTTP surface, block feed, and the
//! core executor together, then runs until SIGINT.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use divachain::core::runtime::executor::{Executor, ExecutorHandles, NodeCmd};
use divachain::core::security::wallet::{self, Wallet};
use divachain::core::state::block_store::BlockStore;
use divachain::core::state::registry::Registry;
use divachain::core::types::Config;
use divachain::http::ApiContext;
use divachain::monitoring::metrics::Metrics;
use divachain::networking::p2p::{spawn_p2p, P2pConfig};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

fn load_config() -> Config {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DIVA_CONFIG").ok());
    match path {
        Some(path) => match Config::load(Path::new(&path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(%path, ?e, "config load failed; using defaults");
                Config::default()
            }
        },
        None => Config::default(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    let cfg = load_config();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        build = option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown"),
        endpoint = %format!("{}:{}", cfg.ip, cfg.port),
        "divachain node starting"
    );

    let metrics = Arc::new(Metrics::new().context("metrics init failed")?);

    let wallet = Wallet::open(Path::new(&cfg.path_keys), &cfg.ident())
        .context("wallet open failed")?;
    info!(public_key = %wallet.public_key(), "wallet ready");

    let token = wallet::load_or_create_token(Path::new(&cfg.path_keys), &cfg.ident())
        .context("api token failed")?;

    let store = BlockStore::open(Path::new(&cfg.path_blockstore), Path::new(&cfg.path_genesis))
        .context("block store open failed")?;
    info!(height = store.height(), "chain loaded");

    // Overlay endpoints of the registered validators: advertised port + 1,
    // the same convention the default `udp` bind uses.
    let registry = Registry::snapshot_at(&store, store.height())?;
    let self_endpoint = (cfg.ip.clone(), cfg.port);
    let dial: Vec<String> = registry
        .iter()
        .filter(|(_, p)| (p.host.clone(), p.port) != self_endpoint)
        .map(|(_, p)| format!("{}:{}", p.host, p.port + 1))
        .collect();

    let p2p_cfg = P2pConfig {
        listen_addr: cfg.udp_addr(),
        path_state: cfg.path_state.clone(),
        dial,
        morph_interval: Duration::from_millis(cfg.network_morph_interval_ms),
    };
    let (p2p_node, mut p2p_events, p2p_handle) =
        spawn_p2p(p2p_cfg, metrics.clone()).map_err(|e| anyhow::anyhow!("p2p start: {e}"))?;
    let outbound = p2p_node.outbound();
    let net_rx = p2p_node.into_inbound();

    let (cmd_tx, cmd_rx) = mpsc::channel::<NodeCmd>(256);
    let (feed_tx, _) = broadcast::channel::<String>(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_listener = tokio::net::TcpListener::bind(cfg.http_addr())
        .await
        .context("http bind failed")?;
    let feed_listener = tokio::net::TcpListener::bind(cfg.feed_addr())
        .await
        .context("block feed bind failed")?;

    let http_ctx = ApiContext {
        cmd_tx: cmd_tx.clone(),
        token,
        metrics: metrics.clone(),
    };
    let http_task = tokio::spawn(divachain::http::serve(
        http_listener,
        http_ctx,
        shutdown_rx.clone(),
    ));
    let feed_task = tokio::spawn(divachain::http::feed::serve(
        feed_listener,
        feed_tx.clone(),
        shutdown_rx.clone(),
    ));

    let executor = Executor::new(
        cfg,
        wallet,
        store,
        metrics,
        ExecutorHandles {
            cmd_rx,
            net_rx,
            outbound,
            feed: feed_tx,
            shutdown: shutdown_rx,
        },
    );
    let core_task = tokio::spawn(executor.run());

    let events_task = tokio::spawn(async move {
        while let Some(ev) = p2p_events.recv().await {
            debug!(?ev, "overlay event");
        }
    });

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    let _ = core_task.await;
    let _ = http_task.await;
    let _ = feed_task.await;
    p2p_handle.abort();
    events_task.abort();
    info!("bye");
    Ok(())
}
