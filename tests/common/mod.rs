// Copyright (c) 2026 Divachain
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]
#![allow(dead_code)]

//! Shared fixtures: deterministic validator networks and signed blocks.

use divachain::core::canonical;
use divachain::core::security::wallet::Wallet;
use divachain::core::state::registry::Registry;
use divachain::core::types::{
    Block, Command, CommandOp, PublicKey, Signature, Transaction, Vote, BLOCK_VERSION,
};

pub const GENESIS_TS: u64 = 1_700_000_000_000;

/// Genesis block enumerating `keys` with `stake` each.
pub fn genesis_for(keys: &[PublicKey], stake: i64) -> Block {
    let mut commands = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        commands.push(Command {
            seq: commands.len() as u32 + 1,
            op: CommandOp::AddPeer {
                host: "127.0.0.1".into(),
                port: 17_470 + i as u16 * 10,
                public_key: key.clone(),
            },
        });
        commands.push(Command {
            seq: commands.len() as u32 + 1,
            op: CommandOp::ModifyStake {
                public_key: key.clone(),
                stake,
            },
        });
    }

    let mut block = Block {
        version: BLOCK_VERSION,
        height: 0,
        timestamp: GENESIS_TS,
        previous_hash: String::new(),
        hash: String::new(),
        tx: vec![Transaction {
            ident: "genesis".into(),
            origin: PublicKey::zero(),
            timestamp: GENESIS_TS,
            commands,
            sig: Signature::zero(),
        }],
        origin: PublicKey::zero(),
        sig: Signature::zero(),
        votes: vec![],
    };
    block.hash = canonical::block_hash(&block);
    block
}

/// `n` ephemeral wallets plus the genesis block registering them.
pub fn make_net(n: usize, stake: i64) -> (Vec<Wallet>, Block) {
    let wallets: Vec<Wallet> = (0..n).map(|_| Wallet::ephemeral().unwrap()).collect();
    let keys: Vec<PublicKey> = wallets.iter().map(|w| w.public_key().clone()).collect();
    let genesis = genesis_for(&keys, stake);
    (wallets, genesis)
}

/// A signed transaction by `wallet`.
pub fn sign_tx(wallet: &Wallet, ident: &str, timestamp: u64, commands: Vec<Command>) -> Transaction {
    let sig = wallet
        .sign(&canonical::tx_signing_bytes(ident, timestamp, &commands))
        .unwrap();
    Transaction {
        ident: ident.into(),
        origin: wallet.public_key().clone(),
        timestamp,
        commands,
        sig,
    }
}

/// A data command.
pub fn data_cmd(seq: u32, ns: &str) -> Command {
    Command {
        seq,
        op: CommandOp::Data {
            ns: ns.into(),
            base64url: "YWJj".into(),
        },
    }
}

/// A fully signed and quorum-voted block on top of `prev`, proposed by
/// `wallets[proposer]` and voted by every wallet in the registry.
pub fn build_block(
    wallets: &[Wallet],
    registry: &Registry,
    prev: &Block,
    mut txs: Vec<Transaction>,
    proposer: usize,
    timestamp: u64,
) -> Block {
    txs.sort_by(|a, b| a.origin.cmp(&b.origin));
    let mut block = Block {
        version: BLOCK_VERSION,
        height: prev.height + 1,
        timestamp,
        previous_hash: prev.hash.clone(),
        hash: String::new(),
        tx: txs,
        origin: wallets[proposer].public_key().clone(),
        sig: Signature::zero(),
        votes: vec![],
    };
    block.hash = canonical::block_hash(&block);
    block.sig = wallets[proposer].sign(block.hash.as_bytes()).unwrap();
    block.votes = wallets
        .iter()
        .filter(|w| registry.contains(w.public_key()))
        .map(|w| Vote {
            origin: w.public_key().clone(),
            sig: w.sign(block.hash.as_bytes()).unwrap(),
        })
        .collect();
    block
}
