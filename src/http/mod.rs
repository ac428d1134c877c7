// Copyright (c) 2026 Divachain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! REST surface.
//!
//! Handlers never touch consensus state directly; every request crosses into
//! the core executor over a bounded channel and waits on a oneshot reply.
//! Mutating routes require the `diva-api-token` header, matched in constant
//! time against the per-node token file.

pub mod feed;

use crate::core::runtime::executor::{BlockSelector, NodeCmd, PoolsView};
use crate::core::types::{Command, PublicKey};
use crate::monitoring::metrics::Metrics;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

const API_TOKEN_HEADER: &str = "diva-api-token";
const DEFAULT_PAGE_SIZE: usize = 16;
const MAX_RANGE_LIMIT: usize = 500;

/// Shared context of the REST handlers.
#[derive(Clone)]
pub struct ApiContext {
    /// Channel into the core executor.
    pub cmd_tx: mpsc::Sender<NodeCmd>,
    /// API token required on mutating routes.
    pub token: String,
    /// Metrics registry for `/metrics`.
    pub metrics: Arc<Metrics>,
}

/// Build the REST router.
pub fn router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/transaction", put(put_transaction))
        .route("/transaction/:ident", put(put_transaction_with_ident))
        .route("/block/:selector", get(get_block))
        .route("/blocks", get(get_blocks))
        .route("/blocks/page/:page", get(get_blocks_page))
        .route("/peers", get(get_peers))
        .route("/network", get(get_network))
        .route("/state", get(get_state))
        .route("/state/:key", get(get_state_key))
        .route("/pool/transactions", get(get_pool_transactions))
        .route("/pool/votes", get(get_pool_votes))
        .route("/pool/commits", get(get_pool_commits))
        .route("/stack/transactions", get(get_stack_transactions))
        .route("/about", get(get_about))
        .route("/metrics", get(get_metrics))
        .with_state(ctx)
}

/// Serve the REST router until shutdown flips.
pub async fn serve(
    listener: TcpListener,
    ctx: ApiContext,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = router(ctx);
    info!(addr = ?listener.local_addr().ok(), "http listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}

fn token_ok(headers: &HeaderMap, expected: &str) -> bool {
    let Some(given) = headers.get(API_TOKEN_HEADER).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    given.as_bytes().ct_eq(expected.as_bytes()).into()
}

async fn ask<T>(
    cmd_tx: &mpsc::Sender<NodeCmd>,
    build: impl FnOnce(oneshot::Sender<T>) -> NodeCmd,
) -> Result<T, StatusCode> {
    let (tx, rx) = oneshot::channel();
    cmd_tx
        .send(build(tx))
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    rx.await.map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

async fn stack(
    ctx: &ApiContext,
    headers: &HeaderMap,
    commands: Vec<Command>,
    ident: Option<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !token_ok(headers, &ctx.token) {
        return Err(StatusCode::FORBIDDEN);
    }
    let result = ask(&ctx.cmd_tx, |resp| NodeCmd::Stack {
        commands,
        ident,
        resp,
    })
    .await?;
    match result {
        Ok(ident) => Ok(Json(serde_json::json!({ "ident": ident }))),
        Err(_) => Err(StatusCode::FORBIDDEN),
    }
}

async fn put_transaction(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    Json(commands): Json<Vec<Command>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    stack(&ctx, &headers, commands, None).await
}

async fn put_transaction_with_ident(
    State(ctx): State<ApiContext>,
    Path(ident): Path<String>,
    headers: HeaderMap,
    Json(commands): Json<Vec<Command>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    stack(&ctx, &headers, commands, Some(ident)).await
}

async fn get_block(
    State(ctx): State<ApiContext>,
    Path(selector): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let sel = match selector.as_str() {
        "genesis" => BlockSelector::Genesis,
        "latest" => BlockSelector::Latest,
        s => BlockSelector::Height(s.parse().map_err(|_| StatusCode::BAD_REQUEST)?),
    };
    let block = ask(&ctx.cmd_tx, |resp| NodeCmd::GetBlock { sel, resp }).await?;
    match block {
        Some(b) => Ok(Json(serde_json::to_value(b).unwrap_or_default())),
        None => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Deserialize)]
struct RangeParams {
    #[serde(default)]
    gte: u64,
    lte: Option<u64>,
    limit: Option<usize>,
}

async fn get_blocks(
    State(ctx): State<ApiContext>,
    Query(params): Query<RangeParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let gte = params.gte;
    let lte = params.lte.unwrap_or(u64::MAX);
    let limit = params.limit.unwrap_or(MAX_RANGE_LIMIT).min(MAX_RANGE_LIMIT);
    let blocks = ask(&ctx.cmd_tx, |resp| NodeCmd::GetRange {
        gte,
        lte,
        limit,
        resp,
    })
    .await?;
    Ok(Json(serde_json::to_value(blocks).unwrap_or_default()))
}

#[derive(Deserialize)]
struct PageParams {
    size: Option<usize>,
}

async fn get_blocks_page(
    State(ctx): State<ApiContext>,
    Path(page): Path<u64>,
    Query(params): Query<PageParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if page == 0 {
        return Err(StatusCode::BAD_REQUEST);
    }
    let size = params
        .size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_RANGE_LIMIT);
    let gte = (page - 1).saturating_mul(size as u64);
    let lte = gte.saturating_add(size as u64 - 1);
    let blocks = ask(&ctx.cmd_tx, |resp| NodeCmd::GetRange {
        gte,
        lte,
        limit: size,
        resp,
    })
    .await?;
    Ok(Json(serde_json::to_value(blocks).unwrap_or_default()))
}

async fn get_peers(
    State(ctx): State<ApiContext>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let peers = ask(&ctx.cmd_tx, |resp| NodeCmd::GetPeers { resp }).await?;
    Ok(Json(serde_json::to_value(peers).unwrap_or_default()))
}

#[derive(Deserialize)]
struct NetworkParams {
    endpoint: Option<String>,
}

async fn get_network(
    State(ctx): State<ApiContext>,
    Query(params): Query<NetworkParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if let Some(endpoint) = params.endpoint {
        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or(StatusCode::BAD_REQUEST)?;
        let port: u16 = port.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
        let host = host.to_string();
        let member = ask(&ctx.cmd_tx, |resp| NodeCmd::HasNetwork { host, port, resp }).await?;
        return Ok(Json(serde_json::json!({ "member": member })));
    }

    let peers = ask(&ctx.cmd_tx, |resp| NodeCmd::GetPeers { resp }).await?;
    let total: u64 = peers.iter().map(|p| p.stake).sum();
    let quorum = (2 * total).div_ceil(3);
    Ok(Json(serde_json::json!({
        "peers": peers,
        "totalStake": total,
        "quorum": quorum,
    })))
}

async fn get_state(
    State(ctx): State<ApiContext>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let value = ask(&ctx.cmd_tx, |resp| NodeCmd::GetState { key: None, resp }).await?;
    value.map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn get_state_key(
    State(ctx): State<ApiContext>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let key = Some(PublicKey(key));
    let value = ask(&ctx.cmd_tx, |resp| NodeCmd::GetState { key, resp }).await?;
    value.map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn pools(ctx: &ApiContext) -> Result<PoolsView, StatusCode> {
    ask(&ctx.cmd_tx, |resp| NodeCmd::GetPools { resp }).await
}

async fn get_pool_transactions(
    State(ctx): State<ApiContext>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let view = pools(&ctx).await?;
    Ok(Json(serde_json::to_value(view.transactions).unwrap_or_default()))
}

async fn get_pool_votes(
    State(ctx): State<ApiContext>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let view = pools(&ctx).await?;
    Ok(Json(serde_json::to_value(view.votes).unwrap_or_default()))
}

async fn get_pool_commits(
    State(ctx): State<ApiContext>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let view = pools(&ctx).await?;
    Ok(Json(serde_json::to_value(view.commits).unwrap_or_default()))
}

async fn get_stack_transactions(
    State(ctx): State<ApiContext>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let txs = ask(&ctx.cmd_tx, |resp| NodeCmd::GetStack { resp }).await?;
    Ok(Json(serde_json::to_value(txs).unwrap_or_default()))
}

async fn get_about(State(_ctx): State<ApiContext>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "build": option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown"),
        "rustc": option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown"),
    }))
}

async fn get_metrics(State(ctx): State<ApiContext>) -> Result<String, StatusCode> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let families = ctx.metrics.registry.gather();
    let mut out = Vec::new();
    encoder
        .encode(&families, &mut out)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(out).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
