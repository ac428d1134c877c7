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

//! Divachain - a permissioned blockchain node.
//!
//! Validators totally order client-submitted transactions into a
//! hash-chained block sequence: the proposer for each height stacks pending
//! transactions into a candidate, peers attest with detached signatures, and
//! once a stake-weighted quorum is collected the block is confirmed and
//! committed on every node. This crate provides:
//! - Deterministic canonical encoding for all hashed and signed bytes
//! - The propose/sign/confirm block factory with stake-weighted quorum
//! - A validator registry folded from the committed chain
//! - A sled-backed append-only block store with genesis bootstrap
//! - An envelope-authenticated overlay (libp2p gossipsub transport)
//! - An HTTP surface, a WebSocket block feed, and Prometheus metrics

/// Core protocol (types, canonical encoding, consensus, state, pools).
pub mod core;
/// REST surface and the WebSocket block feed.
pub mod http;
/// Observability (Prometheus metrics).
pub mod monitoring;
/// P2P overlay transport (libp2p).
pub mod networking;
