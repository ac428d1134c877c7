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

//! Message router: envelope admission and sealing.
//!
//! Inbound envelopes are admitted only when well-formed, signed by their
//! origin, sent by a registry member, and strictly newer than the last seen
//! sequence from that origin. Replays and stale reorders are dropped
//! silently. Dissemination itself is the overlay's flood; the router never
//! re-publishes.

use crate::core::canonical;
use crate::core::security::wallet::{self, Wallet, WalletError};
use crate::core::state::registry::Registry;
use crate::core::types::{valid_ident, Envelope, Payload, PublicKey, MSG_IDENT_MAX_LEN};
use std::collections::HashMap;
use thiserror::Error;

/// Admission errors; all end in a silent drop.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("malformed envelope")]
    Malformed,
    #[error("addressed to another node")]
    NotAddressed,
    #[error("origin not in the validator registry")]
    UnknownOrigin,
    #[error("bad envelope signature")]
    BadSignature,
    #[error("replayed or reordered message")]
    Replay,
    #[error("wallet")]
    Wallet,
}

impl From<WalletError> for RouterError {
    fn from(_: WalletError) -> Self {
        RouterError::Wallet
    }
}

/// Envelope admission state and the outbound sequence counter.
#[derive(Debug, Default)]
pub struct Router {
    next_seq: u64,
    last_seq: HashMap<PublicKey, u64>,
}

impl Router {
    /// Fresh router; outbound sequence starts at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an inbound envelope or say why it must be dropped.
    ///
    /// A self-registration exception applies to `AddTx`: a node announcing
    /// its own `AddPeer` is not yet in the registry, so an `AddTx` envelope
    /// whose transaction is a pure self-`AddPeer` from the envelope's own
    /// origin is admitted on the strength of its signature alone. No other
    /// payload from an unregistered key gets through.
    pub fn admit(
        &mut self,
        env: &Envelope,
        registry: &Registry,
        self_key: &PublicKey,
    ) -> Result<(), RouterError> {
        if !valid_ident(&env.ident, MSG_IDENT_MAX_LEN) {
            return Err(RouterError::Malformed);
        }
        if !env.dest.is_empty() && env.dest != self_key.0 {
            return Err(RouterError::NotAddressed);
        }

        let registered = registry.contains(&env.origin);
        let self_registration = matches!(
            &env.data,
            Payload::AddTx { tx } if tx.origin == env.origin && tx.is_self_registration()
        );
        if !registered && !self_registration {
            return Err(RouterError::UnknownOrigin);
        }

        let msg = canonical::envelope_signing_bytes(
            &env.ident,
            env.seq,
            env.origin.as_str(),
            &env.dest,
            &env.data,
        );
        wallet::verify(&env.origin, &env.sig, &msg).map_err(|_| RouterError::BadSignature)?;

        let last = self.last_seq.entry(env.origin.clone()).or_insert(0);
        if env.seq <= *last {
            return Err(RouterError::Replay);
        }
        *last = env.seq;
        Ok(())
    }

    /// Build and sign an outbound envelope. `dest` of `None` broadcasts.
    pub fn seal(
        &mut self,
        wallet: &Wallet,
        dest: Option<&PublicKey>,
        data: Payload,
    ) -> Result<Envelope, RouterError> {
        self.next_seq += 1;
        let ident = canonical::random_ident(16).map_err(|_| RouterError::Malformed)?;
        let dest = dest.map(|d| d.0.clone()).unwrap_or_default();
        let msg = canonical::envelope_signing_bytes(
            &ident,
            self.next_seq,
            wallet.public_key().as_str(),
            &dest,
            &data,
        );
        let sig = wallet.sign(&msg)?;
        Ok(Envelope {
            ident,
            seq: self.next_seq,
            origin: wallet.public_key().clone(),
            dest,
            sig,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seal_from(router: &mut Router, wallet: &Wallet) -> Envelope {
        router
            .seal(
                wallet,
                None,
                Payload::Sync {
                    from_height: 0,
                    to_height: 0,
                },
            )
            .unwrap()
    }

    #[test]
    fn replayed_envelope_is_dropped() {
        let wallet = Wallet::ephemeral().unwrap();
        let mut sender = Router::new();
        let env = seal_from(&mut sender, &wallet);

        // registry check is bypassed with an empty registry only for AddTx,
        // so drive admit through a registry carrying the sender
        let registry = registry_with(wallet.public_key());
        let me = PublicKey::zero();

        let mut receiver = Router::new();
        receiver.admit(&env, &registry, &me).unwrap();
        assert!(matches!(
            receiver.admit(&env, &registry, &me),
            Err(RouterError::Replay)
        ));
    }

    #[test]
    fn tampered_payload_fails_signature() {
        let wallet = Wallet::ephemeral().unwrap();
        let mut sender = Router::new();
        let mut env = seal_from(&mut sender, &wallet);
        env.data = Payload::Sync {
            from_height: 9,
            to_height: 0,
        };

        let registry = registry_with(wallet.public_key());
        let mut receiver = Router::new();
        assert!(matches!(
            receiver.admit(&env, &registry, &PublicKey::zero()),
            Err(RouterError::BadSignature)
        ));
    }

    #[test]
    fn unknown_origin_is_rejected() {
        let wallet = Wallet::ephemeral().unwrap();
        let mut sender = Router::new();
        let env = seal_from(&mut sender, &wallet);
        let mut receiver = Router::new();
        assert!(matches!(
            receiver.admit(&env, &Registry::new(), &PublicKey::zero()),
            Err(RouterError::UnknownOrigin)
        ));
    }

    #[test]
    fn unregistered_add_tx_is_limited_to_self_registration() {
        use crate::core::types::{Command, CommandOp, Transaction};

        let wallet = Wallet::ephemeral().unwrap();
        let mut sender = Router::new();
        let me = PublicKey::zero();

        // a pure self-AddPeer from an unknown key is admitted
        let join = Transaction {
            ident: "join".into(),
            origin: wallet.public_key().clone(),
            timestamp: 1,
            commands: vec![Command {
                seq: 1,
                op: CommandOp::AddPeer {
                    host: "h".into(),
                    port: 1,
                    public_key: wallet.public_key().clone(),
                },
            }],
            sig: crate::core::types::Signature::zero(),
        };
        let env = sender
            .seal(&wallet, None, Payload::AddTx { tx: join })
            .unwrap();
        Router::new().admit(&env, &Registry::new(), &me).unwrap();

        // the same key smuggling a stake change against a validator is not
        let victim = PublicKey(canonical::b64(&[7u8; 32]));
        let rogue = Transaction {
            ident: "rogue".into(),
            origin: wallet.public_key().clone(),
            timestamp: 1,
            commands: vec![Command {
                seq: 1,
                op: CommandOp::ModifyStake {
                    public_key: victim,
                    stake: 0,
                },
            }],
            sig: crate::core::types::Signature::zero(),
        };
        let env = sender
            .seal(&wallet, None, Payload::AddTx { tx: rogue })
            .unwrap();
        assert!(matches!(
            Router::new().admit(&env, &Registry::new(), &me),
            Err(RouterError::UnknownOrigin)
        ));
    }

    #[test]
    fn directed_envelope_for_other_node_is_ignored() {
        let wallet = Wallet::ephemeral().unwrap();
        let other = PublicKey(canonical::b64(&[9u8; 32]));
        let mut sender = Router::new();
        let env = sender
            .seal(
                &wallet,
                Some(&other),
                Payload::Sync {
                    from_height: 0,
                    to_height: 0,
                },
            )
            .unwrap();
        let registry = registry_with(wallet.public_key());
        let mut receiver = Router::new();
        assert!(matches!(
            receiver.admit(&env, &registry, &PublicKey::zero()),
            Err(RouterError::NotAddressed)
        ));
    }

    fn registry_with(key: &PublicKey) -> Registry {
        use crate::core::types::{Block, Command, CommandOp, Signature, Transaction};
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
                commands: vec![Command {
                    seq: 1,
                    op: CommandOp::AddPeer {
                        host: "h".into(),
                        port: 1,
                        public_key: key.clone(),
                    },
                }],
                sig: Signature::zero(),
            }],
            origin: PublicKey::zero(),
            sig: Signature::zero(),
            votes: vec![],
        };
        Registry::from_chain([&block])
    }
}
