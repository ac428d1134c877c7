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

//! Transaction pool: insertion-ordered pending transactions keyed by
//! `(origin, ident)`, bounded with drop-oldest under flooding.

use crate::core::types::{Block, PublicKey, Transaction};
use std::collections::{HashSet, VecDeque};
use thiserror::Error;

/// Pool errors.
#[derive(Debug, Error)]
pub enum TxPoolError {
    /// A transaction with the same `(origin, ident)` is already pending.
    #[error("duplicate (origin, ident)")]
    Duplicate,
}

/// Bounded pending-transaction pool.
pub struct TxPool {
    capacity: usize,
    entries: VecDeque<Transaction>,
    index: HashSet<(PublicKey, String)>,
}

impl TxPool {
    /// Pool with a hard capacity; the oldest entry is dropped on overflow.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            index: HashSet::new(),
        }
    }

    /// Insert a pending transaction.
    pub fn insert(&mut self, tx: Transaction) -> Result<(), TxPoolError> {
        let key = (tx.origin.clone(), tx.ident.clone());
        if self.index.contains(&key) {
            return Err(TxPoolError::Duplicate);
        }
        if self.entries.len() >= self.capacity {
            if let Some(old) = self.entries.pop_front() {
                self.index.remove(&(old.origin, old.ident));
            }
        }
        self.index.insert(key);
        self.entries.push_back(tx);
        Ok(())
    }

    /// Drain every pending transaction for inclusion in a candidate block.
    pub fn drain(&mut self) -> Vec<Transaction> {
        self.index.clear();
        self.entries.drain(..).collect()
    }

    /// Return previously drained transactions to the pool after a failed
    /// proposal, skipping any `(origin, ident)` that `committed` superseded.
    pub fn restore(&mut self, txs: Vec<Transaction>, committed: Option<&Block>) {
        for tx in txs {
            if let Some(block) = committed {
                let superseded = block
                    .tx
                    .iter()
                    .any(|t| t.origin == tx.origin && t.ident == tx.ident);
                if superseded {
                    continue;
                }
            }
            let _ = self.insert(tx);
        }
    }

    /// Drop pending entries that a committed block included.
    pub fn purge_included(&mut self, block: &Block) {
        let included: HashSet<(PublicKey, String)> = block
            .tx
            .iter()
            .map(|t| (t.origin.clone(), t.ident.clone()))
            .collect();
        self.entries
            .retain(|t| !included.contains(&(t.origin.clone(), t.ident.clone())));
        self.index.retain(|k| !included.contains(k));
    }

    /// Pending count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate pending transactions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Signature;

    fn tx(origin: u8, ident: &str) -> Transaction {
        Transaction {
            ident: ident.into(),
            origin: PublicKey(crate::core::canonical::b64(&[origin; 32])),
            timestamp: 1,
            commands: vec![],
            sig: Signature::zero(),
        }
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let mut pool = TxPool::new(8);
        pool.insert(tx(1, "a")).unwrap();
        assert!(matches!(
            pool.insert(tx(1, "a")),
            Err(TxPoolError::Duplicate)
        ));
        pool.insert(tx(2, "a")).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut pool = TxPool::new(2);
        pool.insert(tx(1, "a")).unwrap();
        pool.insert(tx(1, "b")).unwrap();
        pool.insert(tx(1, "c")).unwrap();
        assert_eq!(pool.len(), 2);
        let idents: Vec<_> = pool.iter().map(|t| t.ident.clone()).collect();
        assert_eq!(idents, vec!["b", "c"]);
        // the evicted key is free again
        pool.insert(tx(1, "a")).unwrap();
    }

    #[test]
    fn restore_skips_superseded() {
        let mut pool = TxPool::new(8);
        let drained = vec![tx(1, "a"), tx(2, "b")];
        let committed = Block {
            version: 1,
            height: 1,
            timestamp: 0,
            previous_hash: String::new(),
            hash: String::new(),
            tx: vec![tx(1, "a")],
            origin: PublicKey::zero(),
            sig: Signature::zero(),
            votes: vec![],
        };
        pool.restore(drained, Some(&committed));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.iter().next().unwrap().ident, "b");
    }
}
