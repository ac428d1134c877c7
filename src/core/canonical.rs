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

//! Canonical encoding: the single source of every hashed or signed byte string.
//!
//! Objects are emitted with keys in fixed order, integers in plain decimal,
//! strings with the minimum JSON escapes, arrays in given order, and no
//! whitespace. General-purpose JSON serializers are never used for hashing
//! or signing input; a payload that does not survive decode-and-re-encode
//! byte-identically is treated as adversarial and dropped.

use crate::core::types::{Block, Command, CommandOp, Envelope, Payload, Transaction, Vote};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

/// Canonical encoding error.
#[derive(Debug, Error)]
pub enum CanonError {
    #[error("invalid base64url")]
    Base64,
    #[error("rng unavailable")]
    Rng,
}

/// Unpadded URL-safe base64.
pub fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode unpadded URL-safe base64.
pub fn b64_decode(s: &str) -> Result<Vec<u8>, CanonError> {
    URL_SAFE_NO_PAD.decode(s).map_err(|_| CanonError::Base64)
}

/// SHA-256 over `data`, returned in wire encoding (43 chars).
pub fn sha256_b64(data: &[u8]) -> String {
    b64(digest::digest(&digest::SHA256, data).as_ref())
}

/// SHA-256 over `data`, raw 32 bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let d = digest::digest(&digest::SHA256, data);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    out
}

/// Random ident of `n` base64url chars (n must be a multiple of 4).
pub fn random_ident(n: usize) -> Result<String, CanonError> {
    let rng = SystemRandom::new();
    let mut raw = vec![0u8; n * 3 / 4];
    rng.fill(&mut raw).map_err(|_| CanonError::Rng)?;
    Ok(b64(&raw))
}

fn push_str(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn push_command(out: &mut String, cmd: &Command) {
    out.push_str("{\"seq\":");
    out.push_str(&cmd.seq.to_string());
    match &cmd.op {
        CommandOp::AddPeer {
            host,
            port,
            public_key,
        } => {
            out.push_str(",\"command\":\"addPeer\",\"host\":");
            push_str(out, host);
            out.push_str(",\"port\":");
            out.push_str(&port.to_string());
            out.push_str(",\"publicKey\":");
            push_str(out, public_key.as_str());
        }
        CommandOp::RemovePeer { public_key } => {
            out.push_str(",\"command\":\"removePeer\",\"publicKey\":");
            push_str(out, public_key.as_str());
        }
        CommandOp::ModifyStake { public_key, stake } => {
            out.push_str(",\"command\":\"modifyStake\",\"publicKey\":");
            push_str(out, public_key.as_str());
            out.push_str(",\"stake\":");
            out.push_str(&stake.to_string());
        }
        CommandOp::Data { ns, base64url } => {
            out.push_str(",\"command\":\"data\",\"ns\":");
            push_str(out, ns);
            out.push_str(",\"base64url\":");
            push_str(out, base64url);
        }
        CommandOp::TestLoad { timestamp } => {
            out.push_str(",\"command\":\"testLoad\",\"timestamp\":");
            out.push_str(&timestamp.to_string());
        }
    }
    out.push('}');
}

/// Canonical form of a command list.
pub fn commands(cmds: &[Command]) -> String {
    let mut out = String::with_capacity(64 * cmds.len() + 2);
    out.push('[');
    for (i, c) in cmds.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_command(&mut out, c);
    }
    out.push(']');
    out
}

fn push_transaction(out: &mut String, tx: &Transaction) {
    out.push_str("{\"ident\":");
    push_str(out, &tx.ident);
    out.push_str(",\"origin\":");
    push_str(out, tx.origin.as_str());
    out.push_str(",\"timestamp\":");
    out.push_str(&tx.timestamp.to_string());
    out.push_str(",\"commands\":");
    out.push_str(&commands(&tx.commands));
    out.push_str(",\"sig\":");
    push_str(out, &tx.sig.0);
    out.push('}');
}

/// Canonical form of a transaction.
pub fn transaction(tx: &Transaction) -> String {
    let mut out = String::with_capacity(256);
    push_transaction(&mut out, tx);
    out
}

/// Canonical form of a transaction list.
pub fn transactions(txs: &[Transaction]) -> String {
    let mut out = String::with_capacity(256 * txs.len() + 2);
    out.push('[');
    for (i, tx) in txs.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_transaction(&mut out, tx);
    }
    out.push(']');
    out
}

fn push_vote(out: &mut String, v: &Vote) {
    out.push_str("{\"origin\":");
    push_str(out, v.origin.as_str());
    out.push_str(",\"sig\":");
    push_str(out, &v.sig.0);
    out.push('}');
}

/// Canonical form of a block.
pub fn block(b: &Block) -> String {
    let mut out = String::with_capacity(512 + 256 * b.tx.len());
    out.push_str("{\"version\":");
    out.push_str(&b.version.to_string());
    out.push_str(",\"height\":");
    out.push_str(&b.height.to_string());
    out.push_str(",\"timestamp\":");
    out.push_str(&b.timestamp.to_string());
    out.push_str(",\"previousHash\":");
    push_str(&mut out, &b.previous_hash);
    out.push_str(",\"hash\":");
    push_str(&mut out, &b.hash);
    out.push_str(",\"tx\":");
    out.push_str(&transactions(&b.tx));
    out.push_str(",\"origin\":");
    push_str(&mut out, b.origin.as_str());
    out.push_str(",\"sig\":");
    push_str(&mut out, &b.sig.0);
    out.push_str(",\"votes\":[");
    for (i, v) in b.votes.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_vote(&mut out, v);
    }
    out.push_str("]}");
    out
}

/// Canonical form of an envelope payload.
pub fn payload(p: &Payload) -> String {
    let mut out = String::with_capacity(256);
    match p {
        Payload::AddTx { tx } => {
            out.push_str("{\"type\":\"addTx\",\"tx\":");
            push_transaction(&mut out, tx);
            out.push('}');
        }
        Payload::Propose { block: b } => {
            out.push_str("{\"type\":\"propose\",\"block\":");
            out.push_str(&block(b));
            out.push('}');
        }
        Payload::Sign { block_hash, sig } => {
            out.push_str("{\"type\":\"sign\",\"blockHash\":");
            push_str(&mut out, block_hash);
            out.push_str(",\"sig\":");
            push_str(&mut out, &sig.0);
            out.push('}');
        }
        Payload::Confirm { block: b } => {
            out.push_str("{\"type\":\"confirm\",\"block\":");
            out.push_str(&block(b));
            out.push('}');
        }
        Payload::Sync {
            from_height,
            to_height,
        } => {
            out.push_str("{\"type\":\"sync\",\"fromHeight\":");
            out.push_str(&from_height.to_string());
            out.push_str(",\"toHeight\":");
            out.push_str(&to_height.to_string());
            out.push('}');
        }
    }
    out
}

/// Canonical form of a full envelope.
pub fn envelope(e: &Envelope) -> String {
    let mut out = String::with_capacity(384);
    out.push_str("{\"ident\":");
    push_str(&mut out, &e.ident);
    out.push_str(",\"seq\":");
    out.push_str(&e.seq.to_string());
    out.push_str(",\"origin\":");
    push_str(&mut out, e.origin.as_str());
    out.push_str(",\"dest\":");
    push_str(&mut out, &e.dest);
    out.push_str(",\"sig\":");
    push_str(&mut out, &e.sig.0);
    out.push_str(",\"data\":");
    out.push_str(&payload(&e.data));
    out.push('}');
    out
}

/// Signing input of a transaction: `ident || timestamp || canonical(commands)`.
pub fn tx_signing_bytes(ident: &str, timestamp: u64, cmds: &[Command]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ident.len() + 20 + 64 * cmds.len());
    out.extend_from_slice(ident.as_bytes());
    out.extend_from_slice(timestamp.to_string().as_bytes());
    out.extend_from_slice(commands(cmds).as_bytes());
    out
}

/// Hash input of a block:
/// `previousHash || version || timestamp || height || canonical(tx)`.
pub fn block_hash_input(
    previous_hash: &str,
    version: u16,
    timestamp: u64,
    height: u64,
    txs: &[Transaction],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(previous_hash.len() + 40 + 256 * txs.len());
    out.extend_from_slice(previous_hash.as_bytes());
    out.extend_from_slice(version.to_string().as_bytes());
    out.extend_from_slice(timestamp.to_string().as_bytes());
    out.extend_from_slice(height.to_string().as_bytes());
    out.extend_from_slice(transactions(txs).as_bytes());
    out
}

/// Hash of a block over its canonical fields, in wire encoding.
pub fn block_hash(b: &Block) -> String {
    sha256_b64(&block_hash_input(
        &b.previous_hash,
        b.version,
        b.timestamp,
        b.height,
        &b.tx,
    ))
}

/// Signing input of an envelope:
/// `ident || seq || origin || dest || canonical(data)`.
pub fn envelope_signing_bytes(
    ident: &str,
    seq: u64,
    origin: &str,
    dest: &str,
    data: &Payload,
) -> Vec<u8> {
    let body = payload(data);
    let mut out = Vec::with_capacity(ident.len() + 20 + origin.len() + dest.len() + body.len());
    out.extend_from_slice(ident.as_bytes());
    out.extend_from_slice(seq.to_string().as_bytes());
    out.extend_from_slice(origin.as_bytes());
    out.extend_from_slice(dest.as_bytes());
    out.extend_from_slice(body.as_bytes());
    out
}

/// Seed for proposer selection at a height: `H(previousHash || height)`.
pub fn proposer_seed(previous_hash: &str, height: u64) -> [u8; 32] {
    let mut input = Vec::with_capacity(previous_hash.len() + 20);
    input.extend_from_slice(previous_hash.as_bytes());
    input.extend_from_slice(height.to_string().as_bytes());
    sha256(&input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PublicKey;

    #[test]
    fn string_escapes_are_minimal() {
        let mut out = String::new();
        push_str(&mut out, "a\"b\\c\nd\u{1}");
        assert_eq!(out, "\"a\\\"b\\\\c\\nd\\u0001\"");
    }

    #[test]
    fn command_order_is_fixed() {
        let cmd = Command {
            seq: 1,
            op: CommandOp::Data {
                ns: "t".into(),
                base64url: "YWJj".into(),
            },
        };
        assert_eq!(
            commands(&[cmd]),
            "[{\"seq\":1,\"command\":\"data\",\"ns\":\"t\",\"base64url\":\"YWJj\"}]"
        );
    }

    #[test]
    fn sync_payload_shape() {
        let p = Payload::Sync {
            from_height: 3,
            to_height: 0,
        };
        assert_eq!(payload(&p), "{\"type\":\"sync\",\"fromHeight\":3,\"toHeight\":0}");
    }

    #[test]
    fn zero_key_is_43_chars() {
        assert_eq!(PublicKey::zero().as_str().len(), 43);
    }
}
