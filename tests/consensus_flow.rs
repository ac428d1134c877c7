// Copyright (c) 2026 Divachain
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Factory-level consensus scenarios: propose -> sign -> confirm, proposer
//! failover, adversarial votes, and replayed proposals.

mod common;

use common::{build_block, data_cmd, make_net, sign_tx, GENESIS_TS};
use divachain::core::consensus::factory::{
    verify_block, verify_transaction, BlockFactory, FactoryConfig, FactoryError, Outcome,
};
use divachain::core::consensus::proposer;
use divachain::core::consensus::vote_pool::VotePool;
use divachain::core::router::{Router, RouterError};
use divachain::core::security::wallet::Wallet;
use divachain::core::state::block_store::BlockStore;
use divachain::core::state::registry::Registry;
use divachain::core::tx_pool::TxPool;
use divachain::core::types::{Block, Command, CommandOp, Payload, Signature};
use std::time::Duration;

fn factory_cfg(n: usize) -> FactoryConfig {
    FactoryConfig {
        max_tx_per_block: 256,
        network_size: n,
        p2p_interval: Duration::from_millis(50),
    }
}

fn find_propose(outcomes: &[Outcome]) -> Block {
    outcomes
        .iter()
        .find_map(|o| match o {
            Outcome::Broadcast(Payload::Propose { block }) => Some(block.clone()),
            _ => None,
        })
        .expect("no Propose outcome")
}

fn find_sign(outcomes: &[Outcome]) -> (String, Signature) {
    outcomes
        .iter()
        .find_map(|o| match o {
            Outcome::Broadcast(Payload::Sign { block_hash, sig }) => {
                Some((block_hash.clone(), sig.clone()))
            }
            _ => None,
        })
        .expect("no Sign outcome")
}

fn find_confirm(outcomes: &[Outcome]) -> Option<Block> {
    outcomes.iter().find_map(|o| match o {
        Outcome::Broadcast(Payload::Confirm { block }) => Some(block.clone()),
        _ => None,
    })
}

/// Wallets, registry, per-node factories, and the proposer index for height 1.
fn setup(n: usize) -> (Vec<Wallet>, Block, Registry, Vec<BlockFactory>, usize) {
    let (wallets, genesis) = make_net(n, 10);
    let registry = Registry::from_chain([&genesis]);
    let factories: Vec<BlockFactory> = wallets
        .iter()
        .map(|w| BlockFactory::new(factory_cfg(n), w.public_key().clone()))
        .collect();
    let ranking = proposer::ranked(&genesis.hash, 1, &registry);
    let proposer_idx = wallets
        .iter()
        .position(|w| w.public_key() == &ranking[0])
        .expect("proposer not among wallets");
    (wallets, genesis, registry, factories, proposer_idx)
}

#[test]
fn single_block_commit_across_nodes() {
    let (wallets, genesis, registry, mut factories, p) = setup(5);

    let mut pool = TxPool::new(64);
    pool.insert(sign_tx(
        &wallets[p],
        "tx1",
        GENESIS_TS + 1,
        vec![data_cmd(1, "t")],
    ))
    .unwrap();

    let mut votes = VotePool::new();
    let outcomes = factories[p]
        .try_propose(
            &wallets[p],
            &registry,
            &genesis,
            &mut pool,
            &mut votes,
            GENESIS_TS + 2,
        )
        .unwrap();
    let proposed = find_propose(&outcomes);
    assert!(pool.is_empty(), "pool drains into the candidate");

    // every other validator verifies and answers with a Sign
    let mut signs = Vec::new();
    for (i, wallet) in wallets.iter().enumerate() {
        if i == p {
            continue;
        }
        let outcomes = factories[i]
            .on_propose(proposed.clone(), wallet, &registry, &genesis)
            .unwrap();
        let (hash, sig) = find_sign(&outcomes);
        assert_eq!(hash, proposed.hash);
        signs.push((i, hash, sig));
    }

    // proposer (stake 10) + 2 signers (30) is below quorum 34; the third
    // signer crosses it and yields the Confirm
    let mut confirmed: Option<Block> = None;
    for (idx, (i, hash, sig)) in signs.into_iter().enumerate() {
        let outcomes = factories[p]
            .on_sign(
                &hash,
                wallets[i].public_key().clone(),
                sig,
                &registry,
                &mut votes,
            )
            .unwrap();
        match idx {
            0 | 1 => assert!(find_confirm(&outcomes).is_none()),
            _ => {
                if let Some(block) = find_confirm(&outcomes) {
                    confirmed = Some(block);
                    break;
                }
            }
        }
    }
    let block = confirmed.expect("quorum never reached");
    assert!(block.votes.len() >= 4);

    // every node re-verifies the Confirm and lands on the same tip
    let dirs: Vec<_> = (0..2).map(|_| tempfile::tempdir().unwrap()).collect();
    let mut tips = Vec::new();
    for (i, factory) in factories.iter().enumerate().take(2) {
        factory.on_confirm(&block, &registry, &genesis).unwrap();
        let mut store =
            BlockStore::open_with_genesis(&dirs[i].path().join("db"), genesis.clone()).unwrap();
        store.append(block.clone()).unwrap();
        tips.push(store.tip().hash.clone());
    }
    assert_eq!(tips[0], tips[1]);
}

#[test]
fn proposer_failover_after_timeout() {
    let (wallets, genesis, registry, mut factories, _) = setup(5);
    let ranking = proposer::ranked(&genesis.hash, 1, &registry);

    // the computed proposer dies before proposing; everyone times out
    for factory in factories.iter_mut() {
        factory.on_timeout();
        assert_eq!(factory.round(), 1);
    }

    let second = wallets
        .iter()
        .position(|w| w.public_key() == &ranking[1])
        .unwrap();

    let mut pool = TxPool::new(64);
    pool.insert(sign_tx(
        &wallets[second],
        "tx1",
        GENESIS_TS + 1,
        vec![data_cmd(1, "t")],
    ))
    .unwrap();
    let mut votes = VotePool::new();
    let outcomes = factories[second]
        .try_propose(
            &wallets[second],
            &registry,
            &genesis,
            &mut pool,
            &mut votes,
            GENESIS_TS + 2,
        )
        .unwrap();
    let proposed = find_propose(&outcomes);

    // peers that also timed out accept the second-ranked proposer
    let other = (0..wallets.len())
        .find(|&i| i != second && wallets[i].public_key() != &ranking[0])
        .unwrap();
    let outcomes = factories[other]
        .on_propose(proposed.clone(), &wallets[other], &registry, &genesis)
        .unwrap();
    find_sign(&outcomes);

    // a validator further down the ranking is still rejected at round 1
    let third = wallets
        .iter()
        .position(|w| w.public_key() == &ranking[2])
        .unwrap();
    let rogue = build_block(&wallets, &registry, &genesis, vec![], third, GENESIS_TS + 3);
    let mut fresh = BlockFactory::new(factory_cfg(5), wallets[other].public_key().clone());
    fresh.on_timeout(); // round 1: eligibility is ranked[0..=1]
    assert!(matches!(
        fresh.on_propose(rogue, &wallets[other], &registry, &genesis),
        Err(FactoryError::NotProposer)
    ));
}

#[test]
fn adversarial_vote_is_not_counted() {
    let (wallets, genesis, registry, mut factories, p) = setup(5);

    let mut pool = TxPool::new(64);
    pool.insert(sign_tx(
        &wallets[p],
        "tx1",
        GENESIS_TS + 1,
        vec![data_cmd(1, "t")],
    ))
    .unwrap();
    let mut votes = VotePool::new();
    let outcomes = factories[p]
        .try_propose(
            &wallets[p],
            &registry,
            &genesis,
            &mut pool,
            &mut votes,
            GENESIS_TS + 2,
        )
        .unwrap();
    let proposed = find_propose(&outcomes);

    // a key outside the registry signs the candidate hash
    let intruder = Wallet::ephemeral().unwrap();
    let bad_sig = intruder.sign(proposed.hash.as_bytes()).unwrap();
    assert!(matches!(
        factories[p].on_sign(
            &proposed.hash,
            intruder.public_key().clone(),
            bad_sig,
            &registry,
            &mut votes,
        ),
        Err(FactoryError::UnknownValidator)
    ));

    // two legitimate signers leave the proposer short of quorum (30 < 34)
    let mut legit: Vec<usize> = (0..wallets.len()).filter(|&i| i != p).collect();
    let last = legit.pop().unwrap();
    for i in legit.into_iter().take(2) {
        let sig = wallets[i].sign(proposed.hash.as_bytes()).unwrap();
        let outcomes = factories[p]
            .on_sign(
                &proposed.hash,
                wallets[i].public_key().clone(),
                sig,
                &registry,
                &mut votes,
            )
            .unwrap();
        assert!(find_confirm(&outcomes).is_none(), "committed below quorum");
    }

    // the next legitimate vote crosses quorum
    let sig = wallets[last].sign(proposed.hash.as_bytes()).unwrap();
    let outcomes = factories[p]
        .on_sign(
            &proposed.hash,
            wallets[last].public_key().clone(),
            sig,
            &registry,
            &mut votes,
        )
        .unwrap();
    let block = find_confirm(&outcomes).expect("legitimate quorum must confirm");
    assert!(block
        .votes
        .iter()
        .all(|v| v.origin != *intruder.public_key()));
}

#[test]
fn replayed_proposal_does_not_sign_twice() {
    let (wallets, genesis, registry, mut factories, p) = setup(5);

    let mut pool = TxPool::new(64);
    pool.insert(sign_tx(
        &wallets[p],
        "tx1",
        GENESIS_TS + 1,
        vec![data_cmd(1, "t")],
    ))
    .unwrap();
    let mut votes = VotePool::new();
    let outcomes = factories[p]
        .try_propose(
            &wallets[p],
            &registry,
            &genesis,
            &mut pool,
            &mut votes,
            GENESIS_TS + 2,
        )
        .unwrap();
    let proposed = find_propose(&outcomes);

    // the router drops the byte-identical replay before the factory sees it
    let mut sender = Router::new();
    let env = sender
        .seal(
            &wallets[p],
            None,
            Payload::Propose {
                block: proposed.clone(),
            },
        )
        .unwrap();
    let other = (p + 1) % wallets.len();
    let mut receiver = Router::new();
    let me = wallets[other].public_key().clone();
    receiver.admit(&env, &registry, &me).unwrap();
    assert!(matches!(
        receiver.admit(&env, &registry, &me),
        Err(RouterError::Replay)
    ));

    // even a re-delivered proposal produces no second Sign
    let outcomes = factories[other]
        .on_propose(proposed.clone(), &wallets[other], &registry, &genesis)
        .unwrap();
    find_sign(&outcomes);
    let outcomes = factories[other]
        .on_propose(proposed, &wallets[other], &registry, &genesis)
        .unwrap();
    assert!(outcomes.is_empty());
}

#[test]
fn unregistered_origin_cannot_alter_the_validator_set() {
    let (wallets, genesis, registry, mut factories, p) = setup(5);
    let outsider = Wallet::ephemeral().unwrap();

    // a throwaway key signs a stake-zeroing command against a validator
    let rogue = sign_tx(
        &outsider,
        "rogue",
        GENESIS_TS + 1,
        vec![Command {
            seq: 1,
            op: CommandOp::ModifyStake {
                public_key: wallets[0].public_key().clone(),
                stake: 0,
            },
        }],
    );
    assert!(matches!(
        verify_transaction(&rogue, &registry),
        Err(FactoryError::UnknownValidator)
    ));

    // a block smuggling it past the pool is rejected wholesale
    let smuggled = build_block(
        &wallets,
        &registry,
        &genesis,
        vec![rogue.clone()],
        p,
        GENESIS_TS + 2,
    );
    assert!(matches!(
        verify_block(&smuggled, &genesis, &registry),
        Err(FactoryError::UnknownValidator)
    ));

    // the proposer's own drain discards it and keeps only authorized traffic
    let mut pool = TxPool::new(64);
    pool.insert(rogue).unwrap();
    pool.insert(sign_tx(
        &wallets[p],
        "legit",
        GENESIS_TS + 1,
        vec![data_cmd(1, "t")],
    ))
    .unwrap();
    let mut votes = VotePool::new();
    let outcomes = factories[p]
        .try_propose(
            &wallets[p],
            &registry,
            &genesis,
            &mut pool,
            &mut votes,
            GENESIS_TS + 3,
        )
        .unwrap();
    let proposed = find_propose(&outcomes);
    assert_eq!(proposed.tx.len(), 1);
    assert_eq!(proposed.tx[0].ident, "legit");

    // while a pure self-registration from the same outsider is accepted
    let join = sign_tx(
        &outsider,
        "join",
        GENESIS_TS + 1,
        vec![Command {
            seq: 1,
            op: CommandOp::AddPeer {
                host: "127.0.0.1".into(),
                port: 17_999,
                public_key: outsider.public_key().clone(),
            },
        }],
    );
    verify_transaction(&join, &registry).unwrap();
}

#[test]
fn duplicate_origin_in_block_is_invalid() {
    let (wallets, genesis, registry, _, p) = setup(3);

    let tx1 = sign_tx(&wallets[p], "a", GENESIS_TS + 1, vec![data_cmd(1, "x")]);
    let tx2 = sign_tx(&wallets[p], "b", GENESIS_TS + 1, vec![data_cmd(1, "y")]);
    let block = build_block(
        &wallets,
        &registry,
        &genesis,
        vec![tx1, tx2],
        p,
        GENESIS_TS + 2,
    );
    assert!(matches!(
        verify_block(&block, &genesis, &registry),
        Err(FactoryError::Invalid)
    ));
}

#[test]
fn tampered_block_hash_is_invalid() {
    let (wallets, genesis, registry, _, p) = setup(3);
    let tx = sign_tx(&wallets[p], "a", GENESIS_TS + 1, vec![data_cmd(1, "x")]);
    let mut block = build_block(
        &wallets,
        &registry,
        &genesis,
        vec![tx],
        p,
        GENESIS_TS + 2,
    );
    block.timestamp += 1; // hash no longer covers the fields
    assert!(verify_block(&block, &genesis, &registry).is_err());
}
