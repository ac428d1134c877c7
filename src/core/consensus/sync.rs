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

//! Chain sync: serving block ranges and buffering ahead-of-tip blocks.
//!
//! A Sync request is answered with one Confirm message per block in range,
//! so the requester commits them through the exact same verification path
//! as live traffic. Blocks that arrive ahead of the tip are buffered and
//! replayed once the gap closes.

use crate::core::state::block_store::{BlockStore, StoreError};
use crate::core::types::Block;
use std::collections::BTreeMap;

/// Upper bound of blocks served per Sync request.
pub const SYNC_BATCH_LIMIT: usize = 500;

/// Serve a Sync request from the local chain. `to_height` 0 means "tip".
pub fn serve(
    store: &BlockStore,
    from_height: u64,
    to_height: u64,
) -> Result<Vec<Block>, StoreError> {
    let tip = store.height();
    let lte = if to_height == 0 { tip } else { to_height.min(tip) };
    store.range(from_height, lte, SYNC_BATCH_LIMIT)
}

/// Bounded buffer of blocks received ahead of the local tip.
#[derive(Debug, Default)]
pub struct GapBuffer {
    blocks: BTreeMap<u64, Block>,
}

impl GapBuffer {
    /// Hard cap; beyond it the highest buffered block is dropped first.
    pub const CAPACITY: usize = 256;

    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an ahead-of-tip block. First writer per height wins.
    pub fn insert(&mut self, block: Block) {
        if self.blocks.len() >= Self::CAPACITY && !self.blocks.contains_key(&block.height) {
            let Some((&last, _)) = self.blocks.iter().next_back() else {
                return;
            };
            if block.height >= last {
                return;
            }
            self.blocks.remove(&last);
        }
        self.blocks.entry(block.height).or_insert(block);
    }

    /// Pop the buffered block for `height`, if present.
    pub fn take(&mut self, height: u64) -> Option<Block> {
        self.blocks.remove(&height)
    }

    /// Drop everything at or below `height` (already committed).
    pub fn prune_through(&mut self, height: u64) {
        self.blocks = self.blocks.split_off(&(height + 1));
    }

    /// Buffered count.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
