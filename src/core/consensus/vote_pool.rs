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

//! Vote pool: per-candidate signature collection keyed by block hash.

use crate::core::state::registry::Registry;
use crate::core::types::{PublicKey, Signature, Vote};
use std::collections::BTreeMap;

const MAX_CANDIDATES: usize = 8;

/// Signatures collected per candidate block hash.
///
/// Entries are purged on commit of their hash or on height advance past the
/// candidate; the candidate count itself is bounded against flooding.
#[derive(Debug, Default)]
pub struct VotePool {
    votes: BTreeMap<String, BTreeMap<PublicKey, Signature>>,
}

impl VotePool {
    /// Empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a vote; returns false for duplicates from the same signer.
    pub fn add(&mut self, block_hash: &str, origin: PublicKey, sig: Signature) -> bool {
        if !self.votes.contains_key(block_hash) && self.votes.len() >= MAX_CANDIDATES {
            // drop the smallest-keyed stale candidate to stay bounded
            if let Some(first) = self.votes.keys().next().cloned() {
                self.votes.remove(&first);
            }
        }
        self.votes
            .entry(block_hash.to_string())
            .or_default()
            .insert(origin, sig)
            .is_none()
    }

    /// Sum of registry stake over the distinct signers of `block_hash`.
    pub fn stake_sum(&self, block_hash: &str, registry: &Registry) -> u64 {
        self.votes
            .get(block_hash)
            .map(|m| m.keys().map(|k| registry.stake_of(k)).sum())
            .unwrap_or(0)
    }

    /// Collected votes for `block_hash`, ordered by signer key.
    pub fn collect(&self, block_hash: &str) -> Vec<Vote> {
        self.votes
            .get(block_hash)
            .map(|m| {
                m.iter()
                    .map(|(origin, sig)| Vote {
                        origin: origin.clone(),
                        sig: sig.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop the entry for `block_hash`.
    pub fn purge(&mut self, block_hash: &str) {
        self.votes.remove(block_hash);
    }

    /// Drop everything (height advance).
    pub fn clear(&mut self) {
        self.votes.clear();
    }

    /// Snapshot for introspection: hash -> signer count.
    pub fn view(&self) -> Vec<(String, usize)> {
        self.votes
            .iter()
            .map(|(hash, m)| (hash.clone(), m.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: u8) -> PublicKey {
        PublicKey(crate::core::canonical::b64(&[i; 32]))
    }

    #[test]
    fn duplicate_signer_not_counted_twice() {
        let mut pool = VotePool::new();
        assert!(pool.add("h", key(1), Signature::zero()));
        assert!(!pool.add("h", key(1), Signature::zero()));
        assert_eq!(pool.collect("h").len(), 1);
    }

    #[test]
    fn candidate_count_is_bounded() {
        let mut pool = VotePool::new();
        for i in 0..(MAX_CANDIDATES + 4) {
            pool.add(&format!("hash-{i:03}"), key(1), Signature::zero());
        }
        assert!(pool.view().len() <= MAX_CANDIDATES);
    }
}
