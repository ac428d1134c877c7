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

//! Deterministic proposer selection.
//!
//! The proposer for height `h` is the validator whose public key, read as a
//! 256-bit big-endian integer, is nearest by absolute distance to
//! `H(previousHash || h)`. Ties break on the smaller key. Every node computes
//! the same ranking locally; no election messages are exchanged.

use crate::core::canonical;
use crate::core::state::registry::Registry;
use crate::core::types::PublicKey;

/// Absolute difference of two 256-bit big-endian integers.
fn abs_diff(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    let mut out = [0u8; 32];
    let mut borrow = 0u16;
    for i in (0..32).rev() {
        let l = hi[i] as u16;
        let r = lo[i] as u16 + borrow;
        if l >= r {
            out[i] = (l - r) as u8;
            borrow = 0;
        } else {
            out[i] = (l + 256 - r) as u8;
            borrow = 1;
        }
    }
    out
}

/// Validators ranked by distance to the selection seed for `height`.
///
/// Index 0 is the proposer; later indices take over round by round after
/// phase timeouts. Keys that do not decode are ranked last.
pub fn ranked(previous_hash: &str, height: u64, registry: &Registry) -> Vec<PublicKey> {
    let seed = canonical::proposer_seed(previous_hash, height);
    let mut scored: Vec<(Option<[u8; 32]>, &PublicKey)> = registry
        .iter()
        .map(|(key, _)| (key.decode().map(|pk| abs_diff(&pk, &seed)), key))
        .collect();
    scored.sort_by(|(da, ka), (db, kb)| match (da, db) {
        (Some(a), Some(b)) => a.cmp(b).then_with(|| ka.cmp(kb)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => ka.cmp(kb),
    });
    scored.into_iter().map(|(_, key)| key.clone()).collect()
}

/// The proposer expected at `round` for `height` (round-robin over the ranking).
pub fn at_round(
    previous_hash: &str,
    height: u64,
    round: u64,
    registry: &Registry,
) -> Option<PublicKey> {
    let ranking = ranked(previous_hash, height, registry);
    if ranking.is_empty() {
        return None;
    }
    let idx = (round as usize) % ranking.len();
    Some(ranking[idx].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Block, Command, CommandOp, Signature, Transaction};

    fn key(i: u8) -> PublicKey {
        PublicKey(canonical::b64(&[i; 32]))
    }

    fn registry_of(n: u8) -> Registry {
        let mut commands = Vec::new();
        for i in 1..=n {
            commands.push(Command {
                seq: commands.len() as u32 + 1,
                op: CommandOp::AddPeer {
                    host: "h".into(),
                    port: i as u16,
                    public_key: key(i),
                },
            });
            commands.push(Command {
                seq: commands.len() as u32 + 1,
                op: CommandOp::ModifyStake {
                    public_key: key(i),
                    stake: 10,
                },
            });
        }
        let block = Block {
            version: 1,
            height: 0,
            timestamp: 0,
            previous_hash: String::new(),
            hash: String::new(),
            tx: vec![Transaction {
                ident: "genesis".into(),
                origin: PublicKey::zero(),
                timestamp: 0,
                commands,
                sig: Signature::zero(),
            }],
            origin: PublicKey::zero(),
            sig: Signature::zero(),
            votes: vec![],
        };
        Registry::from_chain([&block])
    }

    #[test]
    fn abs_diff_is_symmetric() {
        let a = [3u8; 32];
        let b = [7u8; 32];
        assert_eq!(abs_diff(&a, &b), abs_diff(&b, &a));
        assert_eq!(abs_diff(&a, &a), [0u8; 32]);
    }

    #[test]
    fn abs_diff_borrows_across_limbs() {
        let mut a = [0u8; 32];
        a[30] = 1; // 256
        let mut b = [0u8; 32];
        b[31] = 1; // 1
        let mut expect = [0u8; 32];
        expect[31] = 255; // 255
        assert_eq!(abs_diff(&a, &b), expect);
    }

    #[test]
    fn ranking_is_deterministic_and_total() {
        let reg = registry_of(5);
        let r1 = ranked("prev", 1, &reg);
        let r2 = ranked("prev", 1, &reg);
        assert_eq!(r1, r2);
        assert_eq!(r1.len(), 5);
        // every validator appears exactly once
        let mut sorted = r1.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 5);
    }

    #[test]
    fn ranking_depends_on_seed() {
        let reg = registry_of(5);
        let a = ranked("prev", 1, &reg);
        let mut differs = false;
        for h in 2..50u64 {
            if ranked("prev", h, &reg) != a {
                differs = true;
                break;
            }
        }
        assert!(differs, "ranking never rotated across 48 heights");
    }

    #[test]
    fn round_wraps_over_ranking() {
        let reg = registry_of(3);
        let first = at_round("p", 1, 0, &reg).unwrap();
        assert_eq!(at_round("p", 1, 3, &reg).unwrap(), first);
        assert_ne!(at_round("p", 1, 1, &reg).unwrap(), first);
    }
}
