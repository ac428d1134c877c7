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

//! Core executor: one task owns every piece of consensus state.
//!
//! All factory transitions, registry folds, and pool mutations happen on
//! this task; HTTP handlers and the overlay reach it only through bounded
//! channels, so no consensus state needs a lock. The only suspension points
//! are channel waits and the phase timer; verification never yields.

use crate::core::canonical;
use crate::core::consensus::factory::{BlockFactory, FactoryConfig, FactoryError, Outcome, Phase};
use crate::core::consensus::sync::{self, GapBuffer};
use crate::core::consensus::vote_pool::VotePool;
use crate::core::economics::stake_credit::StakeCredit;
use crate::core::router::{Router, RouterError};
use crate::core::security::wallet::Wallet;
use crate::core::state::block_store::BlockStore;
use crate::core::state::registry::{PeerInfo, Registry};
use crate::core::tx_pool::TxPool;
use crate::core::types::{
    now_ms, valid_ident, Block, Command, Config, Envelope, Payload, PublicKey, Transaction,
    TX_IDENT_MAX_LEN,
};
use crate::monitoring::metrics::Metrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const TX_POOL_CAPACITY: usize = 4_096;
const MAX_TX_PER_BLOCK: usize = 256;

/// Block lookup selector for the HTTP surface.
#[derive(Clone, Copy, Debug)]
pub enum BlockSelector {
    /// Height 0.
    Genesis,
    /// The tip.
    Latest,
    /// A specific height.
    Height(u64),
}

/// A registry entry as exposed over HTTP.
#[derive(Clone, Debug, Serialize)]
pub struct PeerView {
    /// Validator public key.
    #[serde(rename = "publicKey")]
    pub public_key: PublicKey,
    /// Registered host.
    pub host: String,
    /// Registered port.
    pub port: u16,
    /// Voting stake.
    pub stake: u64,
}

/// Consensus state snapshot as exposed over HTTP.
#[derive(Clone, Debug, Serialize)]
pub struct StateView {
    /// Tip height.
    pub height: u64,
    /// Tip hash.
    pub hash: String,
    /// Local phase.
    pub phase: String,
    /// Current proposer round.
    pub round: u64,
    /// Whether this node is in the validator set.
    pub registered: bool,
    /// The validator set.
    pub peers: Vec<PeerView>,
}

/// Pool introspection as exposed over HTTP.
#[derive(Clone, Debug, Serialize)]
pub struct PoolsView {
    /// Pending transactions.
    pub transactions: Vec<Transaction>,
    /// Vote collection per candidate hash.
    pub votes: Vec<(String, usize)>,
    /// Heights buffered ahead of the tip plus the in-flight candidate.
    pub commits: Vec<u64>,
}

/// Commands from the HTTP surface into the core executor.
#[derive(Debug)]
pub enum NodeCmd {
    /// Stack commands into a signed local transaction.
    Stack {
        /// The commands; `seq` is reassigned on stacking.
        commands: Vec<Command>,
        /// Requested ident, or empty to generate one.
        ident: Option<String>,
        /// The resulting ident, or a client-facing failure.
        resp: oneshot::Sender<Result<String, String>>,
    },
    /// Fetch one block.
    GetBlock {
        /// Which block.
        sel: BlockSelector,
        /// The block, if present.
        resp: oneshot::Sender<Option<Block>>,
    },
    /// Fetch a block range.
    GetRange {
        /// First height, inclusive.
        gte: u64,
        /// Last height, inclusive.
        lte: u64,
        /// Cap on the result size.
        limit: usize,
        /// The blocks.
        resp: oneshot::Sender<Vec<Block>>,
    },
    /// The validator set.
    GetPeers {
        /// The registry entries.
        resp: oneshot::Sender<Vec<PeerView>>,
    },
    /// Whether an endpoint is registered at the tip.
    HasNetwork {
        /// Host.
        host: String,
        /// Port.
        port: u16,
        /// The answer.
        resp: oneshot::Sender<bool>,
    },
    /// Consensus state snapshot, optionally narrowed to one validator.
    GetState {
        /// Narrow to this key.
        key: Option<PublicKey>,
        /// Full snapshot, or the one entry, or nothing.
        resp: oneshot::Sender<Option<serde_json::Value>>,
    },
    /// Pool introspection.
    GetPools {
        /// The snapshot.
        resp: oneshot::Sender<PoolsView>,
    },
    /// Pending transactions stacked by this node.
    GetStack {
        /// The local-origin pending transactions.
        resp: oneshot::Sender<Vec<Transaction>>,
    },
}

/// Channel endpoints wiring the executor to its collaborators.
pub struct ExecutorHandles {
    /// Commands from the HTTP surface.
    pub cmd_rx: mpsc::Receiver<NodeCmd>,
    /// Raw inbound envelope frames from the overlay.
    pub net_rx: mpsc::Receiver<Vec<u8>>,
    /// Raw outbound envelope frames to the overlay.
    pub outbound: mpsc::Sender<Vec<u8>>,
    /// Committed-block feed (canonical JSON).
    pub feed: broadcast::Sender<String>,
    /// Shutdown signal.
    pub shutdown: watch::Receiver<bool>,
}

// Input ends are taken out of the struct when `run` starts so the select
// loop can poll them while handlers borrow the executor.
struct Inputs {
    cmd_rx: mpsc::Receiver<NodeCmd>,
    net_rx: mpsc::Receiver<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
}

/// The core executor.
pub struct Executor {
    cfg: Config,
    wallet: Wallet,
    store: BlockStore,
    registry: Registry,
    factory: BlockFactory,
    router: Router,
    tx_pool: TxPool,
    vote_pool: VotePool,
    credit: StakeCredit,
    gaps: GapBuffer,
    metrics: Arc<Metrics>,
    outbound: mpsc::Sender<Vec<u8>>,
    feed: broadcast::Sender<String>,
    inputs: Option<Inputs>,
    phase_deadline: Option<Instant>,
    registered: bool,
    last_sync_request: Option<Instant>,
}

impl Executor {
    /// Build the executor over an opened store and wallet. The registry is
    /// folded from the persisted chain before the first message is handled.
    pub fn new(
        cfg: Config,
        wallet: Wallet,
        store: BlockStore,
        metrics: Arc<Metrics>,
        handles: ExecutorHandles,
    ) -> Self {
        let registry = Registry::snapshot_at(&store, store.height()).unwrap_or_else(|e| {
            error!(?e, "registry replay failed; starting from empty set");
            Registry::new()
        });
        let factory = BlockFactory::new(
            FactoryConfig {
                max_tx_per_block: MAX_TX_PER_BLOCK,
                network_size: cfg.network_size,
                p2p_interval: Duration::from_millis(cfg.network_p2p_interval_ms),
            },
            wallet.public_key().clone(),
        );
        let registered = registry.contains(wallet.public_key());
        metrics.block_height.set(store.height() as i64);

        Self {
            cfg,
            wallet,
            store,
            registry,
            factory,
            router: Router::new(),
            tx_pool: TxPool::new(TX_POOL_CAPACITY),
            vote_pool: VotePool::new(),
            credit: StakeCredit::new(),
            gaps: GapBuffer::new(),
            metrics,
            outbound: handles.outbound,
            feed: handles.feed,
            inputs: Some(Inputs {
                cmd_rx: handles.cmd_rx,
                net_rx: handles.net_rx,
                shutdown: handles.shutdown,
            }),
            phase_deadline: None,
            registered,
            last_sync_request: None,
        }
    }

    /// Drive the node until shutdown. Bounded and idempotent on exit: the
    /// phase timer is dropped, the store is flushed, and the wallet (sole
    /// holder of the secret key) is dropped with it.
    pub async fn run(mut self) {
        let Some(Inputs {
            mut cmd_rx,
            mut net_rx,
            mut shutdown,
        }) = self.inputs.take()
        else {
            return;
        };

        let p2p_interval = Duration::from_millis(self.cfg.network_p2p_interval_ms.max(1));
        let credit_window = p2p_interval * self.cfg.network_size.max(1) as u32;

        let mut stack_tick = tokio::time::interval(p2p_interval);
        stack_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut credit_tick = tokio::time::interval(credit_window);
        credit_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        if !self.registered && self.cfg.bootstrap {
            self.bootstrap().await;
        }

        loop {
            let deadline = self
                .phase_deadline
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.on_cmd(cmd).await,
                        None => break,
                    }
                }
                frame = net_rx.recv() => {
                    match frame {
                        Some(bytes) => self.on_wire(&bytes).await,
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(deadline), if self.phase_deadline.is_some() => {
                    self.on_phase_timeout().await;
                }
                _ = stack_tick.tick() => {
                    self.on_stack_tick().await;
                }
                _ = credit_tick.tick() => {
                    self.on_credit_window().await;
                }
            }
        }

        self.phase_deadline = None;
        info!("core executor stopped");
    }

    async fn bootstrap(&mut self) {
        info!("not in the validator set; syncing and self-registering");
        self.send_payload(
            None,
            Payload::Sync {
                from_height: self.store.height() + 1,
                to_height: 0,
            },
        )
        .await;

        let add_self = Command {
            seq: 1,
            op: crate::core::types::CommandOp::AddPeer {
                host: self.cfg.ip.clone(),
                port: self.cfg.port,
                public_key: self.wallet.public_key().clone(),
            },
        };
        if let Err(e) = self.stack_commands(vec![add_self], None).await {
            warn!(%e, "failed to stack self-registration");
        }
    }

    async fn on_cmd(&mut self, cmd: NodeCmd) {
        match cmd {
            NodeCmd::Stack {
                commands,
                ident,
                resp,
            } => {
                let result = self.stack_commands(commands, ident).await;
                let _ = resp.send(result);
            }
            NodeCmd::GetBlock { sel, resp } => {
                let block = match sel {
                    BlockSelector::Genesis => self.store.get_by_height(0).ok().flatten(),
                    BlockSelector::Latest => Some(self.store.tip().clone()),
                    BlockSelector::Height(h) => self.store.get_by_height(h).ok().flatten(),
                };
                let _ = resp.send(block);
            }
            NodeCmd::GetRange {
                gte,
                lte,
                limit,
                resp,
            } => {
                let blocks = self.store.range(gte, lte, limit).unwrap_or_default();
                let _ = resp.send(blocks);
            }
            NodeCmd::GetPeers { resp } => {
                let _ = resp.send(self.peer_views());
            }
            NodeCmd::HasNetwork { host, port, resp } => {
                let _ = resp.send(self.registry.contains_endpoint(&host, port));
            }
            NodeCmd::GetState { key, resp } => {
                let value = match key {
                    Some(key) => self
                        .registry
                        .get(&key)
                        .map(|info| peer_view(&key, info))
                        .and_then(|v| serde_json::to_value(v).ok()),
                    None => serde_json::to_value(self.state_view()).ok(),
                };
                let _ = resp.send(value);
            }
            NodeCmd::GetPools { resp } => {
                let mut commits: Vec<u64> = Vec::new();
                if let Some(c) = self.factory.candidate() {
                    commits.push(c.height);
                }
                let view = PoolsView {
                    transactions: self.tx_pool.iter().cloned().collect(),
                    votes: self.vote_pool.view(),
                    commits,
                };
                let _ = resp.send(view);
            }
            NodeCmd::GetStack { resp } => {
                let own: Vec<Transaction> = self
                    .tx_pool
                    .iter()
                    .filter(|t| &t.origin == self.wallet.public_key())
                    .cloned()
                    .collect();
                let _ = resp.send(own);
            }
        }
    }

    fn peer_views(&self) -> Vec<PeerView> {
        self.registry
            .iter()
            .map(|(key, info)| peer_view(key, info))
            .collect()
    }

    fn state_view(&self) -> StateView {
        let phase = match self.factory.phase() {
            Phase::Idle => "idle",
            Phase::Proposing => "proposing",
            Phase::Signing => "signing",
            Phase::Confirming => "confirming",
        };
        StateView {
            height: self.store.height(),
            hash: self.store.tip().hash.clone(),
            phase: phase.to_string(),
            round: self.factory.round(),
            registered: self.registered,
            peers: self.peer_views(),
        }
    }

    /// Stack commands into a signed transaction, append it to the pool, and
    /// disseminate it. Returns the transaction ident.
    async fn stack_commands(
        &mut self,
        mut commands: Vec<Command>,
        ident: Option<String>,
    ) -> Result<String, String> {
        if commands.is_empty() {
            return Err("empty command list".to_string());
        }
        let ident = match ident.filter(|s| !s.is_empty()) {
            Some(s) if valid_ident(&s, TX_IDENT_MAX_LEN) => s,
            Some(_) => return Err("invalid ident".to_string()),
            None => canonical::random_ident(8).map_err(|e| e.to_string())?,
        };
        for (i, cmd) in commands.iter_mut().enumerate() {
            cmd.seq = i as u32 + 1;
        }

        let timestamp = now_ms();
        let sig = self
            .wallet
            .sign(&canonical::tx_signing_bytes(&ident, timestamp, &commands))
            .map_err(|e| e.to_string())?;
        let tx = Transaction {
            ident: ident.clone(),
            origin: self.wallet.public_key().clone(),
            timestamp,
            commands,
            sig,
        };

        self.tx_pool
            .insert(tx.clone())
            .map_err(|e| e.to_string())?;
        self.metrics.transactions_total.inc();
        self.send_payload(None, Payload::AddTx { tx }).await;
        Ok(ident)
    }

    async fn on_wire(&mut self, bytes: &[u8]) {
        let env: Envelope = match serde_json::from_slice(bytes) {
            Ok(env) => env,
            Err(_) => {
                self.metrics.invalid_msg_total.inc();
                return;
            }
        };

        let self_key = self.wallet.public_key().clone();
        match self.router.admit(&env, &self.registry, &self_key) {
            Ok(()) => {}
            Err(RouterError::Replay) => {
                self.metrics.replay_dropped_total.inc();
                return;
            }
            Err(RouterError::NotAddressed) => return,
            Err(e) => {
                debug!(%e, origin = %env.origin, "envelope dropped");
                self.metrics.invalid_msg_total.inc();
                return;
            }
        }

        match env.data.clone() {
            Payload::AddTx { tx } => self.on_add_tx(tx),
            Payload::Propose { block } => self.on_propose(block, &env.origin).await,
            Payload::Sign { block_hash, sig } => {
                let outcomes = self.factory.on_sign(
                    &block_hash,
                    env.origin.clone(),
                    sig,
                    &self.registry,
                    &mut self.vote_pool,
                );
                match outcomes {
                    Ok(outcomes) => self.dispatch(outcomes).await,
                    Err(e) => debug!(%e, "sign dropped"),
                }
            }
            Payload::Confirm { block } => self.on_confirm(block, &env.origin).await,
            Payload::Sync {
                from_height,
                to_height,
            } => self.on_sync_request(from_height, to_height, &env.origin).await,
        }
    }

    fn on_add_tx(&mut self, tx: Transaction) {
        if let Err(e) = crate::core::consensus::factory::verify_transaction(&tx, &self.registry) {
            debug!(%e, "transaction dropped");
            self.metrics.invalid_msg_total.inc();
            return;
        }
        if self.tx_pool.insert(tx).is_ok() {
            self.metrics.transactions_total.inc();
        }
    }

    async fn on_propose(&mut self, block: Block, from: &PublicKey) {
        let tip = self.store.tip().clone();
        match self
            .factory
            .on_propose(block, &self.wallet, &self.registry, &tip)
        {
            Ok(outcomes) => self.apply_outcomes(outcomes).await,
            Err(FactoryError::HeightGap(height)) if height > tip.height + 1 => {
                self.request_sync(from, tip.height + 1, height).await;
            }
            Err(e) => debug!(%e, "proposal dropped"),
        }
    }

    async fn on_confirm(&mut self, block: Block, from: &PublicKey) {
        let tip_height = self.store.height();
        if block.height <= tip_height {
            return; // first valid Confirm per height won already
        }
        if block.height > tip_height + 1 {
            let target = block.height;
            self.gaps.insert(block);
            self.request_sync(from, tip_height + 1, target).await;
            return;
        }

        let tip = self.store.tip().clone();
        if let Err(e) = self.factory.on_confirm(&block, &self.registry, &tip) {
            debug!(%e, height = block.height, "confirm dropped");
            self.metrics.invalid_msg_total.inc();
            return;
        }
        self.commit(block).await;

        // drain any buffered successors the sync already delivered
        while let Some(next) = self.gaps.take(self.store.height() + 1) {
            let tip = self.store.tip().clone();
            if let Err(e) = self.factory.on_confirm(&next, &self.registry, &tip) {
                debug!(%e, height = next.height, "buffered block dropped");
                break;
            }
            self.commit(next).await;
        }
    }

    /// Commit: append, fold the registry, settle the pools, feed downstream.
    async fn commit(&mut self, block: Block) {
        let block_hash = block.hash.clone();
        let proposer = block.origin.clone();
        let self_key = self.wallet.public_key().clone();

        // give our losing candidate's transactions back to the pool first
        if let Some(candidate) = self.factory.take_candidate() {
            if candidate.origin == self_key && candidate.hash != block_hash {
                self.tx_pool.restore(candidate.tx, Some(&block));
            }
        }

        if let Err(e) = self.store.append(block.clone()) {
            // consensus accepted it but the disk did not: operator territory
            error!(?e, height = block.height, "block append failed; halting commits");
            return;
        }
        self.registry.apply(&block);
        self.tx_pool.purge_included(&block);
        self.vote_pool.clear();
        self.gaps.prune_through(block.height);
        let outcomes = self.factory.note_commit();
        self.apply_outcomes(outcomes).await;

        if proposer == self_key {
            self.credit.restore_parity();
        } else if self.registered {
            self.credit.observe_win(&proposer, self.registry.quorum());
        }

        if !self.registered && self.registry.contains(&self_key) {
            self.registered = true;
            info!("included in the validator set; proposing enabled");
        } else if self.registered && !self.registry.contains(&self_key) {
            self.registered = false;
            warn!("removed from the validator set; proposing disabled");
        }

        self.metrics.block_height.set(block.height as i64);
        self.metrics.commits_total.inc();
        let _ = self.feed.send(canonical::block(&block));
        info!(height = block.height, hash = %block_hash, tx = block.tx.len(), "block committed");
    }

    async fn on_stack_tick(&mut self) {
        if !self.registered || self.factory.phase() != Phase::Idle || self.tx_pool.is_empty() {
            return;
        }
        let tip = self.store.tip().clone();
        match self.factory.try_propose(
            &self.wallet,
            &self.registry,
            &tip,
            &mut self.tx_pool,
            &mut self.vote_pool,
            now_ms(),
        ) {
            Ok(outcomes) => {
                self.metrics.proposals_total.inc();
                self.dispatch(outcomes).await;
            }
            Err(FactoryError::NotProposer) => {
                // someone else owes us a proposal; arm the deadline so a dead
                // proposer's round rotates to the next-ranked validator
                if self.phase_deadline.is_none() {
                    let after = self.factory.phase_timeout(&self.registry);
                    self.phase_deadline = Some(Instant::now() + after);
                }
            }
            Err(FactoryError::EmptyPool) => {}
            Err(e) => debug!(%e, "proposal attempt failed"),
        }
    }

    async fn on_phase_timeout(&mut self) {
        self.phase_deadline = None;
        warn!(
            round = self.factory.round(),
            height = self.store.height() + 1,
            "phase deadline expired; yielding to the next proposer"
        );
        if let Some(candidate) = self.factory.take_candidate() {
            if candidate.origin == *self.wallet.public_key() {
                self.tx_pool.restore(candidate.tx, None);
            }
        }
        let outcomes = self.factory.on_timeout();
        self.apply_outcomes(outcomes).await;
    }

    async fn on_credit_window(&mut self) {
        let commands = self.credit.drain_window(&self.registry);
        if commands.is_empty() || !self.registered {
            return;
        }
        if let Err(e) = self.stack_commands(commands, None).await {
            debug!(%e, "stake-credit stacking failed");
        }
    }

    async fn on_sync_request(&mut self, from_height: u64, to_height: u64, requester: &PublicKey) {
        let blocks = match sync::serve(&self.store, from_height, to_height) {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!(?e, "sync serve failed");
                return;
            }
        };
        debug!(count = blocks.len(), to = %requester, "serving sync range");
        for block in blocks {
            self.send_payload(Some(requester), Payload::Confirm { block })
                .await;
        }
    }

    async fn request_sync(&mut self, peer: &PublicKey, from_height: u64, to_height: u64) {
        // one in-flight request per interval is enough; the reply is a stream
        let min_gap = Duration::from_millis(self.cfg.network_p2p_interval_ms.max(1));
        if let Some(last) = self.last_sync_request {
            if last.elapsed() < min_gap {
                return;
            }
        }
        self.last_sync_request = Some(Instant::now());
        self.send_payload(
            Some(peer),
            Payload::Sync {
                from_height,
                to_height,
            },
        )
        .await;
    }

    /// Apply outcomes and, when one of them was an emitted Confirm, feed it
    /// back through the commit path: the overlay does not echo a node's own
    /// broadcasts, yet the proposer must commit its block like everyone else.
    async fn dispatch(&mut self, outcomes: Vec<Outcome>) {
        let confirmed = outcomes.iter().find_map(|o| match o {
            Outcome::Broadcast(Payload::Confirm { block }) => Some(block.clone()),
            _ => None,
        });
        self.apply_outcomes(outcomes).await;
        if let Some(block) = confirmed {
            let self_key = self.wallet.public_key().clone();
            self.on_confirm(block, &self_key).await;
        }
    }

    async fn apply_outcomes(&mut self, outcomes: Vec<Outcome>) {
        for outcome in outcomes {
            match outcome {
                Outcome::Broadcast(payload) => self.send_payload(None, payload).await,
                Outcome::Schedule(after) => {
                    self.phase_deadline = Some(Instant::now() + after);
                }
                Outcome::Cancel => self.phase_deadline = None,
            }
        }
    }

    async fn send_payload(&mut self, dest: Option<&PublicKey>, payload: Payload) {
        match self.router.seal(&self.wallet, dest, payload) {
            Ok(env) => {
                let frame = canonical::envelope(&env).into_bytes();
                if self.outbound.send(frame).await.is_err() {
                    warn!("overlay outbound channel closed");
                }
            }
            Err(e) => warn!(%e, "failed to seal envelope"),
        }
    }
}

fn peer_view(key: &PublicKey, info: &PeerInfo) -> PeerView {
    PeerView {
        public_key: key.clone(),
        host: info.host.clone(),
        port: info.port,
        stake: info.stake,
    }
}
