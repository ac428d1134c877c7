// Copyright (c) 2026 Divachain
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Registry determinism: replaying the same chain always yields the same
//! validator set, and stakes never go negative.

use divachain::core::canonical;
use divachain::core::state::registry::Registry;
use divachain::core::types::{Block, Command, CommandOp, PublicKey, Signature, Transaction};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Add(u8, u16),
    Remove(u8),
    Stake(u8, i64),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8, any::<u16>()).prop_map(|(k, port)| Op::Add(k, port)),
        (0u8..8).prop_map(Op::Remove),
        (0u8..8, -100i64..100).prop_map(|(k, s)| Op::Stake(k, s)),
    ]
}

fn key(i: u8) -> PublicKey {
    PublicKey(canonical::b64(&[i; 32]))
}

fn chain_from(ops: &[Op], ops_per_block: usize) -> Vec<Block> {
    let mut blocks = Vec::new();
    for (height, chunk) in ops.chunks(ops_per_block.max(1)).enumerate() {
        let commands: Vec<Command> = chunk
            .iter()
            .enumerate()
            .map(|(i, op)| Command {
                seq: i as u32 + 1,
                op: match op {
                    Op::Add(k, port) => CommandOp::AddPeer {
                        host: format!("host-{k}"),
                        port: *port,
                        public_key: key(*k),
                    },
                    Op::Remove(k) => CommandOp::RemovePeer { public_key: key(*k) },
                    Op::Stake(k, s) => CommandOp::ModifyStake {
                        public_key: key(*k),
                        stake: *s,
                    },
                },
            })
            .collect();
        blocks.push(Block {
            version: 1,
            height: height as u64,
            timestamp: height as u64,
            previous_hash: String::new(),
            hash: format!("h{height}"),
            tx: vec![Transaction {
                ident: "t".into(),
                origin: PublicKey::zero(),
                timestamp: 0,
                commands,
                sig: Signature::zero(),
            }],
            origin: PublicKey::zero(),
            sig: Signature::zero(),
            votes: vec![],
        });
    }
    blocks
}

proptest! {
    #[test]
    fn replay_yields_identical_registries(
        ops in proptest::collection::vec(arb_op(), 0..64),
        per_block in 1usize..8,
    ) {
        let chain = chain_from(&ops, per_block);
        let a = Registry::from_chain(chain.iter());
        let b = Registry::from_chain(chain.iter());
        prop_assert_eq!(a, b);
    }

    #[test]
    fn stakes_are_never_negative(
        ops in proptest::collection::vec(arb_op(), 0..64),
    ) {
        let chain = chain_from(&ops, 4);
        let reg = Registry::from_chain(chain.iter());
        let total: u64 = reg.iter().map(|(_, p)| p.stake).sum();
        prop_assert_eq!(reg.total(), total);
        prop_assert!(reg.quorum() <= total || total == 0);
    }

    #[test]
    fn block_chunking_does_not_change_the_fold(
        ops in proptest::collection::vec(arb_op(), 0..48),
    ) {
        // the same command stream split into different block sizes folds
        // to the same registry
        let a = Registry::from_chain(chain_from(&ops, 3).iter());
        let b = Registry::from_chain(chain_from(&ops, 7).iter());
        prop_assert_eq!(a, b);
    }
}
