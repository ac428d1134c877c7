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

//! Stake-credit scheduler: transient per-node fairness accounting.
//!
//! When the local node keeps losing the proposer race to the same peer it
//! debits that peer's credit and queues a stake decrement; when the local
//! node finally proposes, credits are restored symmetrically. The table is
//! never persisted and never consulted by consensus rules; it only shapes
//! which `ModifyStake` transactions this node stacks.
//!
//! Admission floors (coefficients kept from the source, -0.5 per target and
//! -1.0 global, evaluated in integer arithmetic):
//! - per target: `credit[target] > quorum * -0.5`  <=>  `2*credit > -quorum`
//! - global:     `sum(credit)    > quorum * -1.0`  <=>  `sum    > -quorum`

use crate::core::state::registry::Registry;
use crate::core::types::{Command, CommandOp, PublicKey};
use std::collections::BTreeMap;

/// Transient fairness counters and the queued stake deltas of one window.
#[derive(Debug, Default)]
pub struct StakeCredit {
    credit: BTreeMap<PublicKey, i64>,
    pending: BTreeMap<PublicKey, i64>,
}

impl StakeCredit {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit of a peer; 0 if never observed.
    pub fn credit_of(&self, peer: &PublicKey) -> i64 {
        self.credit.get(peer).copied().unwrap_or(0)
    }

    /// Sum of all credits.
    pub fn total(&self) -> i64 {
        self.credit.values().sum()
    }

    /// The peer won the proposer race again. If the admission floors pass,
    /// debit its credit and queue a stake decrement for the next window.
    /// Returns whether the decrement was admitted.
    pub fn observe_win(&mut self, winner: &PublicKey, quorum: u64) -> bool {
        let q = quorum as i64;
        let per_target_ok = 2 * self.credit_of(winner) > -q;
        let global_ok = self.total() > -q;
        if !per_target_ok || !global_ok {
            return false;
        }
        *self.credit.entry(winner.clone()).or_insert(0) -= 1;
        *self.pending.entry(winner.clone()).or_insert(0) -= 1;
        true
    }

    /// The local node got to propose: restore parity by crediting every
    /// previously debited peer one step back toward zero, queuing the
    /// symmetric stake increment.
    pub fn restore_parity(&mut self) {
        let debited: Vec<PublicKey> = self
            .credit
            .iter()
            .filter(|(_, c)| **c < 0)
            .map(|(k, _)| k.clone())
            .collect();
        for peer in debited {
            *self.credit.entry(peer.clone()).or_insert(0) += 1;
            *self.pending.entry(peer).or_insert(0) += 1;
        }
        self.credit.retain(|_, c| *c != 0);
    }

    /// Close the admission window: turn the accumulated deltas into
    /// `ModifyStake` commands against current registry stakes. The caller
    /// stacks them as a single transaction.
    pub fn drain_window(&mut self, registry: &Registry) -> Vec<Command> {
        let pending = std::mem::take(&mut self.pending);
        let mut out = Vec::new();
        for (peer, delta) in pending {
            if delta == 0 || !registry.contains(&peer) {
                continue;
            }
            let stake = registry.stake_of(&peer) as i64 + delta;
            out.push(Command {
                seq: out.len() as u32 + 1,
                op: CommandOp::ModifyStake {
                    public_key: peer,
                    stake: stake.max(0),
                },
            });
        }
        out
    }
}
