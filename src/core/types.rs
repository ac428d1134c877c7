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

//! Core chain types and node configuration.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Current block format version.
pub const BLOCK_VERSION: u16 = 1;

/// Wire length of an unpadded URL-safe base64 Ed25519 public key (32 bytes).
pub const PUBLIC_KEY_B64_LEN: usize = 43;

/// Wire length of an unpadded URL-safe base64 Ed25519 signature (64 bytes).
pub const SIG_B64_LEN: usize = 86;

/// Maximum length of a transaction ident.
pub const TX_IDENT_MAX_LEN: usize = 32;

/// Maximum length of a message envelope ident.
pub const MSG_IDENT_MAX_LEN: usize = 128;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file")]
    Read,
    #[error("parse config file")]
    Parse,
}

/// Ed25519 public key in wire encoding (unpadded URL-safe base64, 43 chars).
///
/// Used as the validator identity everywhere: transaction origins, block
/// origins, vote signers, envelope senders, registry keys.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey(pub String);

impl PublicKey {
    /// Decode to raw key bytes; `None` if the encoding or length is off.
    pub fn decode(&self) -> Option<[u8; 32]> {
        if self.0.len() != PUBLIC_KEY_B64_LEN {
            return None;
        }
        let bytes = URL_SAFE_NO_PAD.decode(&self.0).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Some(out)
    }

    /// Borrow the wire form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The all-zero key used by the genesis block.
    pub fn zero() -> Self {
        Self(URL_SAFE_NO_PAD.encode([0u8; 32]))
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Detached Ed25519 signature in wire encoding (unpadded URL-safe base64, 86 chars).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(pub String);

impl Signature {
    /// Decode to raw signature bytes; `None` if the encoding or length is off.
    pub fn decode(&self) -> Option<Vec<u8>> {
        if self.0.len() != SIG_B64_LEN {
            return None;
        }
        let bytes = URL_SAFE_NO_PAD.decode(&self.0).ok()?;
        (bytes.len() == 64).then_some(bytes)
    }

    /// The all-zero signature used by the genesis block.
    pub fn zero() -> Self {
        Self(URL_SAFE_NO_PAD.encode([0u8; 64]))
    }
}

/// A single validator-intent command inside a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Monotonically increasing sequence within the containing transaction, starting at 1.
    pub seq: u32,
    /// The operation.
    #[serde(flatten)]
    pub op: CommandOp,
}

/// Command variants; the wire tag is the `command` field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum CommandOp {
    /// Register a validator endpoint.
    AddPeer {
        /// Reachable host.
        host: String,
        /// Reachable port.
        port: u16,
        /// Validator public key.
        #[serde(rename = "publicKey")]
        public_key: PublicKey,
    },
    /// Remove a validator.
    RemovePeer {
        /// Validator public key.
        #[serde(rename = "publicKey")]
        public_key: PublicKey,
    },
    /// Set a validator's stake (clamped to non-negative on apply).
    ModifyStake {
        /// Validator public key.
        #[serde(rename = "publicKey")]
        public_key: PublicKey,
        /// New stake value.
        stake: i64,
    },
    /// Opaque namespaced payload.
    Data {
        /// Namespace.
        ns: String,
        /// Unpadded URL-safe base64 payload.
        base64url: String,
    },
    /// Load-test marker.
    TestLoad {
        /// Submitter wall clock, ms since UNIX epoch.
        timestamp: u64,
    },
}

/// An authenticated batch of commands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Local identifier, 1-32 chars of `[A-Za-z0-9,_-]`.
    pub ident: String,
    /// Submitting validator.
    pub origin: PublicKey,
    /// Submission wall clock, ms since UNIX epoch.
    pub timestamp: u64,
    /// Ordered commands; `seq` strictly increasing from 1.
    pub commands: Vec<Command>,
    /// Signature over `ident || timestamp || canonical(commands)`.
    pub sig: Signature,
}

impl Transaction {
    /// True if this is a pure self-registration: every command is an
    /// `AddPeer` for the transaction's own origin.
    ///
    /// This is the only transaction shape accepted from a key that is not
    /// yet in the validator registry (bootstrap step 2); anything else from
    /// an unregistered origin is rejected, or a throwaway key could smuggle
    /// `ModifyStake`/`RemovePeer` commands against real validators.
    pub fn is_self_registration(&self) -> bool {
        !self.commands.is_empty()
            && self.commands.iter().all(|c| {
                matches!(&c.op, CommandOp::AddPeer { public_key, .. } if *public_key == self.origin)
            })
    }
}

/// A quorum-attested vote over a block hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Voting validator.
    pub origin: PublicKey,
    /// Signature over the block hash string.
    pub sig: Signature,
}

/// A block in the hash-chained sequence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block format version.
    pub version: u16,
    /// Chain height; genesis is 0.
    pub height: u64,
    /// Proposal wall clock, ms since UNIX epoch.
    pub timestamp: u64,
    /// Hash of the predecessor; empty string for genesis.
    #[serde(rename = "previousHash")]
    pub previous_hash: String,
    /// `H(previousHash || version || timestamp || height || canonical(tx))`.
    pub hash: String,
    /// Transactions, sorted ascending by origin, at most one per origin.
    pub tx: Vec<Transaction>,
    /// Proposing validator; zero key for genesis.
    pub origin: PublicKey,
    /// Proposer signature over `hash`; zero signature for genesis.
    pub sig: Signature,
    /// Quorum votes over `hash`.
    pub votes: Vec<Vote>,
}

/// Typed payload carried by a message envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Payload {
    /// Disseminate a pending transaction.
    AddTx {
        /// The transaction.
        tx: Transaction,
    },
    /// Proposer broadcasts a candidate block.
    Propose {
        /// The candidate.
        block: Block,
    },
    /// Validator attests to a candidate.
    Sign {
        /// Hash of the candidate.
        #[serde(rename = "blockHash")]
        block_hash: String,
        /// Signature over the hash.
        sig: Signature,
    },
    /// Proposer announces a quorum-attested block.
    Confirm {
        /// The block including its votes.
        block: Block,
    },
    /// Request a block range; `toHeight` 0 means "up to the tip".
    Sync {
        /// First height requested.
        #[serde(rename = "fromHeight")]
        from_height: u64,
        /// Last height requested, inclusive.
        #[serde(rename = "toHeight")]
        to_height: u64,
    },
}

/// Signed message envelope exchanged over the overlay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Deduplication key, up to 128 chars of `[A-Za-z0-9,_-]`.
    pub ident: String,
    /// Per-origin monotonic counter.
    pub seq: u64,
    /// Sender public key.
    pub origin: PublicKey,
    /// Destination public key, or empty string for broadcast.
    pub dest: String,
    /// Signature over `ident || seq || origin || dest || canonical(data)`.
    pub sig: Signature,
    /// The payload.
    pub data: Payload,
}

/// True if `s` is a valid ident of at most `max` chars (`[A-Za-z0-9,_-]`).
pub fn valid_ident(s: &str, max: usize) -> bool {
    !s.is_empty()
        && s.len() <= max
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b',' | b'_' | b'-'))
}

/// Wall clock in ms since UNIX epoch; 0 if the clock is unavailable.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn default_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    17468
}
fn default_port_block_feed() -> u16 {
    17469
}
fn default_path_keys() -> String {
    "./keys".to_string()
}
fn default_path_state() -> String {
    "./state".to_string()
}
fn default_path_blockstore() -> String {
    "./blockstore".to_string()
}
fn default_path_genesis() -> String {
    "./genesis/block.v1.json".to_string()
}
fn default_network_size() -> usize {
    7
}
fn default_p2p_interval_ms() -> u64 {
    3_000
}
fn default_morph_interval_ms() -> u64 {
    120_000
}

/// Node configuration root, loaded from TOML.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Advertised host, as registered on chain.
    #[serde(default = "default_ip")]
    pub ip: String,
    /// Advertised port, as registered on chain.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen port for the WebSocket block feed.
    #[serde(default = "default_port_block_feed")]
    pub port_block_feed: u16,
    /// HTTP bind address; empty means `ip:port`.
    #[serde(default)]
    pub http: String,
    /// Overlay bind address; empty means `ip:(port+1)`.
    #[serde(default)]
    pub udp: String,
    /// Directory holding key files and the API token.
    #[serde(default = "default_path_keys")]
    pub path_keys: String,
    /// Directory holding transient node state (overlay identity).
    #[serde(default = "default_path_state")]
    pub path_state: String,
    /// Directory holding the block store.
    #[serde(default = "default_path_blockstore")]
    pub path_blockstore: String,
    /// Path to the genesis block JSON document.
    #[serde(default = "default_path_genesis")]
    pub path_genesis: String,
    /// Target registry cardinality; floors the phase timeout scaling.
    #[serde(default = "default_network_size")]
    pub network_size: usize,
    /// Base overlay interval in ms; drives stacking and phase timeouts.
    #[serde(default = "default_p2p_interval_ms")]
    pub network_p2p_interval_ms: u64,
    /// Overlay refresh interval in ms; drives re-dialing and the credit window.
    #[serde(default = "default_morph_interval_ms")]
    pub network_morph_interval_ms: u64,
    /// Whether to sync and self-register into the validator set at startup.
    #[serde(default)]
    pub bootstrap: bool,
}

impl Default for Config {
    fn default() -> Self {
        // An empty TOML document yields every field's default.
        toml::from_str("").expect("all config fields carry defaults")
    }
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::Read)?;
        toml::from_str(&raw).map_err(|_| ConfigError::Parse)
    }

    /// Key-file ident for this node, derived from the advertised endpoint.
    pub fn ident(&self) -> String {
        format!("{}_{}", self.ip, self.port)
    }

    /// Effective HTTP bind address.
    pub fn http_addr(&self) -> String {
        if self.http.is_empty() {
            format!("{}:{}", self.ip, self.port)
        } else {
            self.http.clone()
        }
    }

    /// Effective overlay bind address.
    pub fn udp_addr(&self) -> String {
        if self.udp.is_empty() {
            format!("{}:{}", self.ip, self.port + 1)
        } else {
            self.udp.clone()
        }
    }

    /// Effective block feed bind address.
    pub fn feed_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port_block_feed)
    }
}
