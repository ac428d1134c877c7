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

//! WebSocket block feed.
//!
//! Every committed block is pushed as canonical JSON to each connected
//! client. Slow clients that fall behind the broadcast buffer are
//! disconnected rather than buffered without bound.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Serve the block feed until shutdown flips.
pub async fn serve(
    listener: TcpListener,
    feed: broadcast::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = Router::new().route("/", get(upgrade)).with_state(feed);
    info!(addr = ?listener.local_addr().ok(), "block feed listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(feed): State<broadcast::Sender<String>>,
) -> impl IntoResponse {
    let rx = feed.subscribe();
    ws.on_upgrade(move |socket| push_blocks(socket, rx))
}

async fn push_blocks(mut socket: WebSocket, mut rx: broadcast::Receiver<String>) {
    loop {
        tokio::select! {
            block = rx.recv() => {
                match block {
                    Ok(block) => {
                        if socket.send(Message::Text(block)).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "feed client lagged; disconnecting");
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    // clients only listen; tolerate pings, drop on close
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => return,
                }
            }
        }
    }
}
