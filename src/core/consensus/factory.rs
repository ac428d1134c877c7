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

//! Block factory: the propose -> sign -> confirm state machine.
//!
//! The factory is a pure state machine. It never performs I/O; every
//! transition returns [`Outcome`]s that the core executor turns into
//! broadcasts, timer updates, and commits. Failed checks surface as errors
//! so the caller can drop the triggering message silently, as the protocol
//! requires. Only a fully verified Confirm ever commits a block; timeouts
//! merely reset the factory and advance the proposer round.

use crate::core::canonical;
use crate::core::consensus::proposer;
use crate::core::consensus::vote_pool::VotePool;
use crate::core::security::wallet::{self, Wallet, WalletError};
use crate::core::state::registry::Registry;
use crate::core::tx_pool::TxPool;
use crate::core::types::{
    valid_ident, Block, Payload, PublicKey, Signature, Transaction, BLOCK_VERSION, TX_IDENT_MAX_LEN,
};
use std::time::Duration;
use thiserror::Error;

/// Factory errors; every variant maps to "drop the message" at the call site.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("factory is mid-flight")]
    NotIdle,
    #[error("not this node's turn to propose")]
    NotProposer,
    #[error("nothing to propose")]
    EmptyPool,
    #[error("structural invariant violated")]
    Invalid,
    #[error("bad signature")]
    BadSignature,
    #[error("origin not in the validator registry")]
    UnknownValidator,
    #[error("no matching candidate")]
    UnknownCandidate,
    #[error("stake-weighted votes below quorum")]
    QuorumShort,
    #[error("block height {0} does not extend the tip")]
    HeightGap(u64),
    #[error("wallet")]
    Wallet,
}

impl From<WalletError> for FactoryError {
    fn from(_: WalletError) -> Self {
        FactoryError::Wallet
    }
}

/// Consensus phase of the local node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No candidate in flight.
    Idle,
    /// Building and broadcasting a candidate (momentary, proposer only).
    Proposing,
    /// Candidate cached; waiting for or collecting Sign messages.
    Signing,
    /// Quorum reached; Confirm broadcast, awaiting commit.
    Confirming,
}

/// Factory tuning.
#[derive(Clone, Debug)]
pub struct FactoryConfig {
    /// Hard cap of transactions per candidate block.
    pub max_tx_per_block: usize,
    /// Target registry cardinality; floors the timeout scaling.
    pub network_size: usize,
    /// Base overlay interval.
    pub p2p_interval: Duration,
}

/// Instruction emitted by a factory transition.
#[derive(Clone, Debug)]
pub enum Outcome {
    /// Broadcast a payload to every peer.
    Broadcast(Payload),
    /// Arm the phase deadline.
    Schedule(Duration),
    /// Disarm the phase deadline.
    Cancel,
}

/// Verify a transaction's structure, authorization, and signature.
///
/// The origin must be a registry member; the single carve-out is a pure
/// self-registration (`AddPeer` for the origin itself, bootstrap step 2).
/// Without that membership check a throwaway key could sign `ModifyStake`
/// or `RemovePeer` commands against real validators and have an honest
/// proposer include them.
pub fn verify_transaction(tx: &Transaction, registry: &Registry) -> Result<(), FactoryError> {
    if !valid_ident(&tx.ident, TX_IDENT_MAX_LEN) || tx.commands.is_empty() {
        return Err(FactoryError::Invalid);
    }
    let mut last_seq = 0u32;
    for cmd in &tx.commands {
        if cmd.seq == 0 || cmd.seq <= last_seq {
            return Err(FactoryError::Invalid);
        }
        last_seq = cmd.seq;
    }
    if !registry.contains(&tx.origin) && !tx.is_self_registration() {
        return Err(FactoryError::UnknownValidator);
    }
    let msg = canonical::tx_signing_bytes(&tx.ident, tx.timestamp, &tx.commands);
    wallet::verify(&tx.origin, &tx.sig, &msg).map_err(|_| FactoryError::BadSignature)
}

/// Verify a block's structural invariants against its predecessor and the
/// registry that existed at that predecessor. Votes are checked separately.
pub fn verify_block(block: &Block, prev: &Block, registry: &Registry) -> Result<(), FactoryError> {
    if block.version != BLOCK_VERSION {
        return Err(FactoryError::Invalid);
    }
    if block.height != prev.height + 1 || block.previous_hash != prev.hash {
        return Err(FactoryError::Invalid);
    }
    // sorted ascending by origin, strict: also enforces one tx per origin
    for pair in block.tx.windows(2) {
        if pair[0].origin >= pair[1].origin {
            return Err(FactoryError::Invalid);
        }
    }
    for tx in &block.tx {
        verify_transaction(tx, registry)?;
    }
    if block.hash != canonical::block_hash(block) {
        return Err(FactoryError::Invalid);
    }
    if !registry.contains(&block.origin) {
        return Err(FactoryError::UnknownValidator);
    }
    wallet::verify(&block.origin, &block.sig, block.hash.as_bytes())
        .map_err(|_| FactoryError::BadSignature)
}

/// Verify a block's votes: distinct registered signers over `hash` whose
/// stake sums to at least the quorum of `registry`.
pub fn verify_votes(block: &Block, registry: &Registry) -> Result<(), FactoryError> {
    let mut signers = std::collections::BTreeSet::new();
    let mut stake = 0u64;
    for vote in &block.votes {
        if !registry.contains(&vote.origin) {
            return Err(FactoryError::UnknownValidator);
        }
        if !signers.insert(&vote.origin) {
            return Err(FactoryError::Invalid);
        }
        wallet::verify(&vote.origin, &vote.sig, block.hash.as_bytes())
            .map_err(|_| FactoryError::BadSignature)?;
        stake = stake.saturating_add(registry.stake_of(&vote.origin));
    }
    if stake < registry.quorum() {
        return Err(FactoryError::QuorumShort);
    }
    Ok(())
}

/// The consensus state machine for the next height.
pub struct BlockFactory {
    cfg: FactoryConfig,
    self_key: PublicKey,
    phase: Phase,
    round: u64,
    candidate: Option<Block>,
}

impl BlockFactory {
    /// Factory for the node identified by `self_key`.
    pub fn new(cfg: FactoryConfig, self_key: PublicKey) -> Self {
        Self {
            cfg,
            self_key,
            phase: Phase::Idle,
            round: 0,
            candidate: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current proposer round for the pending height.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// The cached candidate, if any.
    pub fn candidate(&self) -> Option<&Block> {
        self.candidate.as_ref()
    }

    /// Take the cached candidate out (timeout recovery).
    pub fn take_candidate(&mut self) -> Option<Block> {
        self.candidate.take()
    }

    /// Phase deadline scaled by network size.
    pub fn phase_timeout(&self, registry: &Registry) -> Duration {
        let n = registry.len().max(self.cfg.network_size).max(1) as u32;
        self.cfg.p2p_interval * n
    }

    fn eligible_proposers(&self, prev: &Block, height: u64, registry: &Registry) -> Vec<PublicKey> {
        let ranking = proposer::ranked(&prev.hash, height, registry);
        if ranking.is_empty() {
            return ranking;
        }
        let upto = (self.round as usize).min(ranking.len() - 1);
        ranking[..=upto].to_vec()
    }

    /// Idle -> Proposing -> Signing: build a candidate from the pool, sign it,
    /// vote for it, and broadcast the proposal. Proposer only.
    pub fn try_propose(
        &mut self,
        wallet: &Wallet,
        registry: &Registry,
        tip: &Block,
        pool: &mut TxPool,
        votes: &mut VotePool,
        now_ms: u64,
    ) -> Result<Vec<Outcome>, FactoryError> {
        if self.phase != Phase::Idle {
            return Err(FactoryError::NotIdle);
        }
        let height = tip.height + 1;
        let expected = proposer::at_round(&tip.hash, height, self.round, registry)
            .ok_or(FactoryError::NotProposer)?;
        if expected != self.self_key {
            return Err(FactoryError::NotProposer);
        }
        if pool.is_empty() {
            return Err(FactoryError::EmptyPool);
        }
        self.phase = Phase::Proposing;

        // Drain wholesale, keep the first verifiable transaction per origin,
        // cap the block size; overflow flows back into the pool while
        // transactions that no longer verify against the current registry
        // (origin removed or never authorized) are discarded outright.
        let mut drained = pool.drain();
        let mut included: Vec<Transaction> = Vec::new();
        let mut returned: Vec<Transaction> = Vec::new();
        for tx in drained.drain(..) {
            if verify_transaction(&tx, registry).is_err() {
                continue;
            }
            let dup = included.iter().any(|t| t.origin == tx.origin);
            if dup || included.len() >= self.cfg.max_tx_per_block {
                returned.push(tx);
            } else {
                included.push(tx);
            }
        }
        pool.restore(returned, None);
        if included.is_empty() {
            self.phase = Phase::Idle;
            return Err(FactoryError::EmptyPool);
        }
        included.sort_by(|a, b| a.origin.cmp(&b.origin));

        let mut block = Block {
            version: BLOCK_VERSION,
            height,
            timestamp: now_ms,
            previous_hash: tip.hash.clone(),
            hash: String::new(),
            tx: included,
            origin: self.self_key.clone(),
            sig: Signature::zero(),
            votes: vec![],
        };
        block.hash = canonical::block_hash(&block);
        block.sig = match wallet.sign(block.hash.as_bytes()) {
            Ok(sig) => sig,
            Err(_) => {
                pool.restore(block.tx, None);
                self.phase = Phase::Idle;
                return Err(FactoryError::Wallet);
            }
        };

        // the proposer's own attestation counts toward quorum
        votes.add(&block.hash, self.self_key.clone(), block.sig.clone());

        // a dominant-stake (or lone) validator reaches quorum on its own vote
        if votes.stake_sum(&block.hash, registry) >= registry.quorum() {
            let mut confirmed = block.clone();
            confirmed.votes = votes.collect(&block.hash);
            self.candidate = Some(confirmed.clone());
            self.phase = Phase::Confirming;
            return Ok(vec![
                Outcome::Broadcast(Payload::Propose { block }),
                Outcome::Broadcast(Payload::Confirm { block: confirmed }),
                Outcome::Schedule(self.phase_timeout(registry)),
            ]);
        }

        self.candidate = Some(block.clone());
        self.phase = Phase::Signing;
        Ok(vec![
            Outcome::Broadcast(Payload::Propose { block }),
            Outcome::Schedule(self.phase_timeout(registry)),
        ])
    }

    /// Any -> Signing: verify an incoming proposal, cache it, and answer with
    /// a Sign message. Non-proposer path.
    pub fn on_propose(
        &mut self,
        block: Block,
        wallet: &Wallet,
        registry: &Registry,
        tip: &Block,
    ) -> Result<Vec<Outcome>, FactoryError> {
        if block.origin == self.self_key {
            // our own proposal echoed back by the overlay
            return Ok(vec![]);
        }
        if block.height != tip.height + 1 {
            return Err(FactoryError::HeightGap(block.height));
        }
        if self.candidate.is_some() {
            // first valid proposal for this height wins locally
            return Ok(vec![]);
        }
        verify_block(&block, tip, registry)?;
        if !self
            .eligible_proposers(tip, block.height, registry)
            .contains(&block.origin)
        {
            return Err(FactoryError::NotProposer);
        }

        let sig = wallet.sign(block.hash.as_bytes())?;
        let block_hash = block.hash.clone();
        self.candidate = Some(block);
        self.phase = Phase::Signing;
        Ok(vec![
            Outcome::Broadcast(Payload::Sign { block_hash, sig }),
            Outcome::Schedule(self.phase_timeout(registry)),
        ])
    }

    /// Signing -> Confirming: collect a Sign message; once the stake-weighted
    /// sum reaches quorum the proposer attaches the votes and broadcasts
    /// Confirm. Non-proposers collect for observability only.
    pub fn on_sign(
        &mut self,
        block_hash: &str,
        origin: PublicKey,
        sig: Signature,
        registry: &Registry,
        votes: &mut VotePool,
    ) -> Result<Vec<Outcome>, FactoryError> {
        let candidate = self.candidate.as_ref().ok_or(FactoryError::UnknownCandidate)?;
        if candidate.hash != block_hash {
            return Err(FactoryError::UnknownCandidate);
        }
        if !registry.contains(&origin) {
            return Err(FactoryError::UnknownValidator);
        }
        wallet::verify(&origin, &sig, block_hash.as_bytes())
            .map_err(|_| FactoryError::BadSignature)?;

        votes.add(block_hash, origin, sig);

        let proposing = candidate.origin == self.self_key;
        if !proposing || self.phase != Phase::Signing {
            return Ok(vec![]);
        }
        if votes.stake_sum(block_hash, registry) < registry.quorum() {
            return Ok(vec![]);
        }

        let mut block = candidate.clone();
        block.votes = votes.collect(block_hash);
        self.candidate = Some(block.clone());
        self.phase = Phase::Confirming;
        Ok(vec![
            Outcome::Broadcast(Payload::Confirm { block }),
            Outcome::Schedule(self.phase_timeout(registry)),
        ])
    }

    /// Full verification of a Confirm'd block (structure, transactions, hash,
    /// proposer signature, votes, quorum). The caller commits on success.
    pub fn on_confirm(
        &self,
        block: &Block,
        registry: &Registry,
        tip: &Block,
    ) -> Result<(), FactoryError> {
        if block.height != tip.height + 1 {
            return Err(FactoryError::HeightGap(block.height));
        }
        verify_block(block, tip, registry)?;
        verify_votes(block, registry)
    }

    /// Reset after a commit: the height advanced, the round restarts.
    pub fn note_commit(&mut self) -> Vec<Outcome> {
        self.phase = Phase::Idle;
        self.round = 0;
        self.candidate = None;
        vec![Outcome::Cancel]
    }

    /// Phase deadline expired: reset to Idle, hand the height to the
    /// next-ranked proposer.
    pub fn on_timeout(&mut self) -> Vec<Outcome> {
        self.phase = Phase::Idle;
        self.round = self.round.saturating_add(1);
        self.candidate = None;
        vec![Outcome::Cancel]
    }
}
