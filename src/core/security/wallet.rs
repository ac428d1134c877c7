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

//! Wallet: the node's Ed25519 identity and the only holder of its secret key.
//!
//! Key files live under `path_keys`:
//! - `<ident>.public` (0644): raw 32-byte public key.
//! - `<ident>.private` (0600): raw 64 bytes, seed followed by public key.
//! - `<ident>.api-token` (0600): the HTTP API token, created on first start.
//!
//! Private material is written atomically (tmp + fsync + rename) and seed
//! buffers are zeroized as soon as the keypair is constructed. Signing is
//! rate limited and leaves an audit trail of message digests.

use crate::core::canonical;
use crate::core::types::{PublicKey, Signature};
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use zeroize::Zeroize;

const MAX_AUDIT_BYTES: u64 = 32 * 1024 * 1024;
const AUDIT_ROTATE_KEEP: usize = 3;
const SIGN_LIMIT_PER_SEC: u32 = 10_000;

/// Wallet errors.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("io")]
    Io,
    #[error("invalid key encoding")]
    InvalidKey,
    #[error("crypto")]
    Crypto,
    #[error("rate limited")]
    RateLimited,
    #[error("bad signature")]
    BadSignature,
}

fn set_private_perms_best_effort(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

fn set_public_perms_best_effort(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o644));
    }
}

/// Atomic write to disk (best-effort fsync, then rename).
fn atomic_write_private(path: &Path, bytes: &[u8]) -> Result<(), WalletError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|_| WalletError::Io)?;
    }

    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");

    {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .map_err(|_| WalletError::Io)?;
        f.write_all(bytes).map_err(|_| WalletError::Io)?;
        let _ = f.sync_all();
    }

    set_private_perms_best_effort(&tmp);
    fs::rename(&tmp, path).map_err(|_| WalletError::Io)?;
    set_private_perms_best_effort(path);
    Ok(())
}

fn rotate_audit_if_needed(path: &Path) {
    let Ok(md) = fs::metadata(path) else {
        return;
    };
    if md.len() <= MAX_AUDIT_BYTES {
        return;
    }

    // best-effort rotation (no crash if it fails)
    for i in (1..=AUDIT_ROTATE_KEEP).rev() {
        let dst = PathBuf::from(format!("{}.{}", path.display(), i));
        let src = if i == 1 {
            path.to_path_buf()
        } else {
            PathBuf::from(format!("{}.{}", path.display(), i - 1))
        };
        if src.exists() {
            let _ = fs::rename(&src, &dst);
        }
    }
}

fn append_audit(path: &Path, action: &str, msg: &[u8]) -> Result<(), WalletError> {
    rotate_audit_if_needed(path);

    // store SHA-256(message) only, never the content
    let line = format!(
        "{{\"action\":\"{}\",\"msg_sha256\":\"{}\"}}\n",
        action,
        hex::encode(canonical::sha256(msg))
    );

    let mut f = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|_| WalletError::Io)?;
    set_private_perms_best_effort(path);
    f.write_all(line.as_bytes()).map_err(|_| WalletError::Io)?;
    Ok(())
}

/// Signing rate limiter (fixed one-second window).
#[derive(Debug)]
struct RateLimiter {
    window_start: Instant,
    count: u32,
    limit_per_sec: u32,
}

impl RateLimiter {
    fn new(limit_per_sec: u32) -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
            limit_per_sec,
        }
    }

    fn allow(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.count = 0;
        }
        if self.count >= self.limit_per_sec {
            return false;
        }
        self.count = self.count.saturating_add(1);
        true
    }
}

/// The node's signing identity.
pub struct Wallet {
    keypair: Ed25519KeyPair,
    public: PublicKey,
    limiter: Mutex<RateLimiter>,
    audit_path: Option<PathBuf>,
}

impl Wallet {
    /// Load or create the key files `<ident>.public` / `<ident>.private`
    /// under `path_keys`.
    pub fn open(path_keys: &Path, ident: &str) -> Result<Self, WalletError> {
        fs::create_dir_all(path_keys).map_err(|_| WalletError::Io)?;
        let priv_path = path_keys.join(format!("{ident}.private"));
        let pub_path = path_keys.join(format!("{ident}.public"));
        let audit_path = path_keys.join(format!("{ident}.audit.log"));

        let keypair = if priv_path.exists() {
            let mut raw = fs::read(&priv_path).map_err(|_| WalletError::Io)?;
            if raw.len() != 64 {
                raw.zeroize();
                return Err(WalletError::InvalidKey);
            }
            let kp = Ed25519KeyPair::from_seed_and_public_key(&raw[..32], &raw[32..])
                .map_err(|_| WalletError::InvalidKey);
            raw.zeroize();
            kp?
        } else {
            let rng = SystemRandom::new();
            let mut seed = [0u8; 32];
            rng.fill(&mut seed).map_err(|_| WalletError::Crypto)?;
            let kp =
                Ed25519KeyPair::from_seed_unchecked(&seed).map_err(|_| WalletError::InvalidKey)?;

            let mut raw = [0u8; 64];
            raw[..32].copy_from_slice(&seed);
            raw[32..].copy_from_slice(kp.public_key().as_ref());
            let res = atomic_write_private(&priv_path, &raw);
            seed.zeroize();
            raw.zeroize();
            res?;

            fs::write(&pub_path, kp.public_key().as_ref()).map_err(|_| WalletError::Io)?;
            set_public_perms_best_effort(&pub_path);
            kp
        };

        let public = PublicKey(canonical::b64(keypair.public_key().as_ref()));
        Ok(Self {
            keypair,
            public,
            limiter: Mutex::new(RateLimiter::new(SIGN_LIMIT_PER_SEC)),
            audit_path: Some(audit_path),
        })
    }

    /// In-memory wallet with no key files; used by tests and tooling.
    pub fn ephemeral() -> Result<Self, WalletError> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| WalletError::Crypto)?;
        let keypair =
            Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).map_err(|_| WalletError::InvalidKey)?;
        let public = PublicKey(canonical::b64(keypair.public_key().as_ref()));
        Ok(Self {
            keypair,
            public,
            limiter: Mutex::new(RateLimiter::new(SIGN_LIMIT_PER_SEC)),
            audit_path: None,
        })
    }

    /// The wallet's public key in wire encoding.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Sign `msg`, returning the detached signature in wire encoding.
    pub fn sign(&self, msg: &[u8]) -> Result<Signature, WalletError> {
        let mut guard = self.limiter.lock().map_err(|_| WalletError::RateLimited)?;
        if !guard.allow() {
            return Err(WalletError::RateLimited);
        }
        drop(guard);

        if let Some(path) = &self.audit_path {
            let _ = append_audit(path, "sign", msg);
        }
        let sig = self.keypair.sign(msg);
        Ok(Signature(canonical::b64(sig.as_ref())))
    }
}

/// Verify a wire-encoded signature by a wire-encoded public key.
pub fn verify(origin: &PublicKey, sig: &Signature, msg: &[u8]) -> Result<(), WalletError> {
    let pk_bytes = origin.decode().ok_or(WalletError::BadSignature)?;
    let sig_bytes = sig.decode().ok_or(WalletError::BadSignature)?;
    let pk = UnparsedPublicKey::new(&ED25519, pk_bytes);
    pk.verify(msg, &sig_bytes)
        .map_err(|_| WalletError::BadSignature)
}

/// Load the HTTP API token for `ident`, creating `<ident>.api-token` on first use.
pub fn load_or_create_token(path_keys: &Path, ident: &str) -> Result<String, WalletError> {
    fs::create_dir_all(path_keys).map_err(|_| WalletError::Io)?;
    let path = path_keys.join(format!("{ident}.api-token"));
    if path.exists() {
        let tok = fs::read_to_string(&path).map_err(|_| WalletError::Io)?;
        let tok = tok.trim().to_string();
        if tok.is_empty() {
            return Err(WalletError::InvalidKey);
        }
        return Ok(tok);
    }

    let rng = SystemRandom::new();
    let mut raw = [0u8; 24];
    rng.fill(&mut raw).map_err(|_| WalletError::Crypto)?;
    let tok = canonical::b64(&raw);
    atomic_write_private(&path, tok.as_bytes())?;
    Ok(tok)
}
