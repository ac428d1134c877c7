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

//! Append-only block store on sled.
//!
//! Keys are big-endian 8-byte heights; values are the canonical encoding of
//! the block. The store enforces chain linkage only (height and previous
//! hash); signature and quorum verification happen in consensus before a
//! block reaches `append`.

use crate::core::canonical;
use crate::core::state::registry::Registry;
use crate::core::types::Block;
use std::path::Path;
use thiserror::Error;

/// Block store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("db open")]
    DbOpen,
    #[error("db io")]
    DbIo,
    #[error("corrupt block record")]
    Corrupt,
    #[error("missing or invalid genesis")]
    Genesis,
    #[error("block does not extend the chain")]
    Linkage,
}

/// Persistent height-indexed chain.
pub struct BlockStore {
    db: sled::Db,
    tip: Block,
}

impl BlockStore {
    /// Open the store at `path`; on empty init, load the genesis block from
    /// `genesis_path`.
    pub fn open(path: &Path, genesis_path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|_| StoreError::DbOpen)?;

        if db.is_empty() {
            let raw = std::fs::read(genesis_path).map_err(|_| StoreError::Genesis)?;
            let genesis: Block = serde_json::from_slice(&raw).map_err(|_| StoreError::Genesis)?;
            return Self::init(db, genesis);
        }

        let (_, value) = db
            .last()
            .map_err(|_| StoreError::DbIo)?
            .ok_or(StoreError::Corrupt)?;
        let tip: Block = serde_json::from_slice(&value).map_err(|_| StoreError::Corrupt)?;
        Ok(Self { db, tip })
    }

    /// Open at `path` with an in-memory genesis block; used by tests and tooling.
    pub fn open_with_genesis(path: &Path, genesis: Block) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|_| StoreError::DbOpen)?;
        if db.is_empty() {
            return Self::init(db, genesis);
        }
        let (_, value) = db
            .last()
            .map_err(|_| StoreError::DbIo)?
            .ok_or(StoreError::Corrupt)?;
        let tip: Block = serde_json::from_slice(&value).map_err(|_| StoreError::Corrupt)?;
        Ok(Self { db, tip })
    }

    fn init(db: sled::Db, genesis: Block) -> Result<Self, StoreError> {
        if genesis.height != 0
            || !genesis.previous_hash.is_empty()
            || genesis.hash != canonical::block_hash(&genesis)
        {
            return Err(StoreError::Genesis);
        }
        db.insert(0u64.to_be_bytes(), canonical::block(&genesis).into_bytes())
            .map_err(|_| StoreError::DbIo)?;
        db.flush().map_err(|_| StoreError::DbIo)?;
        Ok(Self { db, tip: genesis })
    }

    /// The current tip.
    pub fn tip(&self) -> &Block {
        &self.tip
    }

    /// The current tip height.
    pub fn height(&self) -> u64 {
        self.tip.height
    }

    /// Append a block that extends the tip. Durable before return.
    pub fn append(&mut self, block: Block) -> Result<(), StoreError> {
        if block.height != self.tip.height + 1 || block.previous_hash != self.tip.hash {
            return Err(StoreError::Linkage);
        }
        self.db
            .insert(
                block.height.to_be_bytes(),
                canonical::block(&block).into_bytes(),
            )
            .map_err(|_| StoreError::DbIo)?;
        self.db.flush().map_err(|_| StoreError::DbIo)?;
        self.tip = block;
        Ok(())
    }

    /// Fetch a block by height.
    pub fn get_by_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        let Some(value) = self
            .db
            .get(height.to_be_bytes())
            .map_err(|_| StoreError::DbIo)?
        else {
            return Ok(None);
        };
        serde_json::from_slice(&value).map_err(|_| StoreError::Corrupt)
    }

    /// The genesis block.
    pub fn genesis(&self) -> Result<Block, StoreError> {
        self.get_by_height(0)?.ok_or(StoreError::Corrupt)
    }

    /// Blocks in `gte..=lte`, at most `limit` of them.
    pub fn range(&self, gte: u64, lte: u64, limit: usize) -> Result<Vec<Block>, StoreError> {
        let mut out = Vec::new();
        if gte > lte || limit == 0 {
            return Ok(out);
        }
        for item in self
            .db
            .range(gte.to_be_bytes()..=lte.to_be_bytes())
            .take(limit)
        {
            let (_, value) = item.map_err(|_| StoreError::DbIo)?;
            out.push(serde_json::from_slice(&value).map_err(|_| StoreError::Corrupt)?);
        }
        Ok(out)
    }

    /// Visit stored blocks `0..=height` in order. Registry snapshots are
    /// folded through this ([`Registry::snapshot_at`]).
    pub fn scan_up_to(
        &self,
        height: u64,
        mut f: impl FnMut(&Block),
    ) -> Result<(), StoreError> {
        for item in self.db.range(0u64.to_be_bytes()..=height.to_be_bytes()) {
            let (_, value) = item.map_err(|_| StoreError::DbIo)?;
            let block: Block = serde_json::from_slice(&value).map_err(|_| StoreError::Corrupt)?;
            f(&block);
        }
        Ok(())
    }

    /// Whether `host:port` belongs to a validator in the registry at tip.
    pub fn has_network(&self, host: &str, port: u16) -> Result<bool, StoreError> {
        Ok(Registry::snapshot_at(self, self.tip.height)?.contains_endpoint(host, port))
    }
}
