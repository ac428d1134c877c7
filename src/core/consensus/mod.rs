// Copyright (c) 2026 Divachain
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Consensus: proposer selection, the block factory, vote collection, sync.

pub mod factory;
pub mod proposer;
pub mod sync;
pub mod vote_pool;
