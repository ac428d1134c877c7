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

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Connected overlay peers gauge.
    pub p2p_peers: IntGauge,
    /// Tip height gauge.
    pub block_height: IntGauge,
    /// Committed blocks counter.
    pub commits_total: IntCounter,
    /// Proposals built by this node.
    pub proposals_total: IntCounter,
    /// Transactions accepted into the pool.
    pub transactions_total: IntCounter,

    /// Dropped replay messages.
    pub replay_dropped_total: IntCounter,
    /// Invalid or unverifiable messages.
    pub invalid_msg_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let p2p_peers = IntGauge::new("divachain_p2p_peers", "Connected overlay peers")
            .map_err(|_| MetricsError::Prom)?;
        let block_height = IntGauge::new("divachain_block_height", "Current tip height")
            .map_err(|_| MetricsError::Prom)?;
        let commits_total = IntCounter::new("divachain_commits_total", "Blocks committed")
            .map_err(|_| MetricsError::Prom)?;
        let proposals_total =
            IntCounter::new("divachain_proposals_total", "Candidate blocks proposed")
                .map_err(|_| MetricsError::Prom)?;
        let transactions_total = IntCounter::new(
            "divachain_transactions_total",
            "Transactions accepted into the pool",
        )
        .map_err(|_| MetricsError::Prom)?;

        let replay_dropped_total = IntCounter::new(
            "divachain_replay_dropped_total",
            "Dropped replay messages",
        )
        .map_err(|_| MetricsError::Prom)?;
        let invalid_msg_total = IntCounter::new(
            "divachain_invalid_msg_total",
            "Invalid or unverifiable messages",
        )
        .map_err(|_| MetricsError::Prom)?;

        registry
            .register(Box::new(p2p_peers.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(block_height.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(commits_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(proposals_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(transactions_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(replay_dropped_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(invalid_msg_total.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            p2p_peers,
            block_height,
            commits_total,
            proposals_total,
            transactions_total,
            replay_dropped_total,
            invalid_msg_total,
        })
    }
}
