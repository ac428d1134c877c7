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

//! Validator registry: the current validator set and per-validator stake,
//! folded deterministically from the committed chain.

use crate::core::state::block_store::{BlockStore, StoreError};
use crate::core::types::{Block, CommandOp, PublicKey};
use serde::Serialize;
use std::collections::BTreeMap;

/// Registered endpoint and stake of a validator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    /// Reachable host.
    pub host: String,
    /// Reachable port.
    pub port: u16,
    /// Voting stake.
    pub stake: u64,
}

/// The validator set derived from blocks `0..=h`.
///
/// `apply` is pure and deterministic: two nodes that replay the same chain
/// hold identical registries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Registry {
    peers: BTreeMap<PublicKey, PeerInfo>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry after replaying `blocks` in order.
    pub fn from_chain<'a>(blocks: impl IntoIterator<Item = &'a Block>) -> Self {
        let mut reg = Self::new();
        for b in blocks {
            reg.apply(b);
        }
        reg
    }

    /// Registry state after applying stored blocks `0..=height`.
    ///
    /// Used to validate incoming proposals and votes against the validator
    /// set that existed at their predecessor.
    pub fn snapshot_at(store: &BlockStore, height: u64) -> Result<Self, StoreError> {
        let mut reg = Self::new();
        store.scan_up_to(height, |block| reg.apply(block))?;
        Ok(reg)
    }

    /// Fold a committed block's commands into the set.
    ///
    /// Transactions are visited in block order (already sorted by origin) and
    /// commands within a transaction in `seq` order.
    pub fn apply(&mut self, block: &Block) {
        for tx in &block.tx {
            let mut cmds: Vec<_> = tx.commands.iter().collect();
            cmds.sort_by_key(|c| c.seq);
            for cmd in cmds {
                match &cmd.op {
                    CommandOp::AddPeer {
                        host,
                        port,
                        public_key,
                    } => {
                        let entry = self.peers.entry(public_key.clone()).or_default();
                        entry.host = host.clone();
                        entry.port = *port;
                    }
                    CommandOp::RemovePeer { public_key } => {
                        self.peers.remove(public_key);
                    }
                    CommandOp::ModifyStake { public_key, stake } => {
                        if let Some(entry) = self.peers.get_mut(public_key) {
                            entry.stake = (*stake).max(0) as u64;
                        }
                    }
                    CommandOp::Data { .. } | CommandOp::TestLoad { .. } => {}
                }
            }
        }
    }

    /// Whether `key` is a registered validator.
    pub fn contains(&self, key: &PublicKey) -> bool {
        self.peers.contains_key(key)
    }

    /// Registered info of a validator.
    pub fn get(&self, key: &PublicKey) -> Option<&PeerInfo> {
        self.peers.get(key)
    }

    /// Stake of a validator; 0 if unknown.
    pub fn stake_of(&self, key: &PublicKey) -> u64 {
        self.peers.get(key).map(|p| p.stake).unwrap_or(0)
    }

    /// Total stake of the set.
    pub fn total(&self) -> u64 {
        self.peers.values().map(|p| p.stake).sum()
    }

    /// Stake-weighted quorum threshold, `ceil(2/3 * total)`.
    pub fn quorum(&self) -> u64 {
        (2 * self.total()).div_ceil(3)
    }

    /// Number of registered validators.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True if no validator is registered.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Iterate validators in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&PublicKey, &PeerInfo)> {
        self.peers.iter()
    }

    /// Whether a `host:port` endpoint belongs to a registered validator.
    pub fn contains_endpoint(&self, host: &str, port: u16) -> bool {
        self.peers
            .values()
            .any(|p| p.host == host && p.port == port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Command, Signature, Transaction};

    fn key(i: u8) -> PublicKey {
        PublicKey(crate::core::canonical::b64(&[i; 32]))
    }

    fn block_with(cmds: Vec<Command>) -> Block {
        Block {
            version: 1,
            height: 0,
            timestamp: 0,
            previous_hash: String::new(),
            hash: String::new(),
            tx: vec![Transaction {
                ident: "genesis".into(),
                origin: PublicKey::zero(),
                timestamp: 0,
                commands: cmds,
                sig: Signature::zero(),
            }],
            origin: PublicKey::zero(),
            sig: Signature::zero(),
            votes: vec![],
        }
    }

    #[test]
    fn fold_add_modify_remove() {
        let mut reg = Registry::new();
        reg.apply(&block_with(vec![
            Command {
                seq: 1,
                op: CommandOp::AddPeer {
                    host: "h1".into(),
                    port: 1,
                    public_key: key(1),
                },
            },
            Command {
                seq: 2,
                op: CommandOp::ModifyStake {
                    public_key: key(1),
                    stake: 10,
                },
            },
            Command {
                seq: 3,
                op: CommandOp::AddPeer {
                    host: "h2".into(),
                    port: 2,
                    public_key: key(2),
                },
            },
        ]));

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.stake_of(&key(1)), 10);
        assert_eq!(reg.total(), 10);
        assert!(reg.contains_endpoint("h2", 2));

        reg.apply(&block_with(vec![Command {
            seq: 1,
            op: CommandOp::RemovePeer { public_key: key(1) },
        }]));
        assert!(!reg.contains(&key(1)));
        assert_eq!(reg.total(), 0);
    }

    #[test]
    fn negative_stake_clamps_to_zero() {
        let mut reg = Registry::new();
        reg.apply(&block_with(vec![
            Command {
                seq: 1,
                op: CommandOp::AddPeer {
                    host: "h".into(),
                    port: 1,
                    public_key: key(1),
                },
            },
            Command {
                seq: 2,
                op: CommandOp::ModifyStake {
                    public_key: key(1),
                    stake: -5,
                },
            },
        ]));
        assert_eq!(reg.stake_of(&key(1)), 0);
    }

    #[test]
    fn commands_fold_in_seq_order() {
        // out-of-order vec, seq decides
        let mut reg = Registry::new();
        reg.apply(&block_with(vec![
            Command {
                seq: 2,
                op: CommandOp::ModifyStake {
                    public_key: key(1),
                    stake: 7,
                },
            },
            Command {
                seq: 1,
                op: CommandOp::AddPeer {
                    host: "h".into(),
                    port: 1,
                    public_key: key(1),
                },
            },
        ]));
        assert_eq!(reg.stake_of(&key(1)), 7);
    }

    #[test]
    fn quorum_is_two_thirds_ceiling() {
        let mut reg = Registry::new();
        for i in 1..=5u8 {
            reg.apply(&block_with(vec![
                Command {
                    seq: 1,
                    op: CommandOp::AddPeer {
                        host: "h".into(),
                        port: i as u16,
                        public_key: key(i),
                    },
                },
                Command {
                    seq: 2,
                    op: CommandOp::ModifyStake {
                        public_key: key(i),
                        stake: 10,
                    },
                },
            ]));
        }
        assert_eq!(reg.total(), 50);
        assert_eq!(reg.quorum(), 34);
    }
}
