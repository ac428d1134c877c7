// Copyright (c) 2026 Divachain
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Block store: genesis bootstrap, linkage enforcement, range queries,
//! persistence across reopen.

mod common;

use common::{build_block, data_cmd, make_net, sign_tx, GENESIS_TS};
use divachain::core::state::block_store::{BlockStore, StoreError};
use divachain::core::state::registry::Registry;

#[test]
fn genesis_loads_from_file() {
    let (_, genesis) = make_net(3, 10);
    let dir = tempfile::tempdir().unwrap();
    let genesis_path = dir.path().join("genesis.json");
    std::fs::write(&genesis_path, serde_json::to_vec(&genesis).unwrap()).unwrap();

    let store = BlockStore::open(&dir.path().join("db"), &genesis_path).unwrap();
    assert_eq!(store.height(), 0);
    assert_eq!(store.tip().hash, genesis.hash);
    assert_eq!(store.genesis().unwrap().hash, genesis.hash);
}

#[test]
fn corrupt_genesis_is_fatal() {
    let (_, mut genesis) = make_net(3, 10);
    genesis.hash = "not-the-real-hash".into();
    let dir = tempfile::tempdir().unwrap();
    let genesis_path = dir.path().join("genesis.json");
    std::fs::write(&genesis_path, serde_json::to_vec(&genesis).unwrap()).unwrap();

    assert!(matches!(
        BlockStore::open(&dir.path().join("db"), &genesis_path),
        Err(StoreError::Genesis)
    ));
}

#[test]
fn append_enforces_linkage() {
    let (wallets, genesis) = make_net(3, 10);
    let registry = Registry::from_chain([&genesis]);
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlockStore::open_with_genesis(&dir.path().join("db"), genesis.clone()).unwrap();

    let tx = sign_tx(&wallets[0], "a", GENESIS_TS + 1, vec![data_cmd(1, "t")]);
    let b1 = build_block(&wallets, &registry, &genesis, vec![tx], 0, GENESIS_TS + 2);

    // wrong height first
    let mut skipped = b1.clone();
    skipped.height = 5;
    assert!(matches!(store.append(skipped), Err(StoreError::Linkage)));

    // wrong previous hash
    let tx2 = sign_tx(&wallets[1], "b", GENESIS_TS + 1, vec![data_cmd(1, "t")]);
    let mut orphan = build_block(&wallets, &registry, &genesis, vec![tx2], 0, GENESIS_TS + 2);
    orphan.previous_hash = "elsewhere".into();
    assert!(matches!(store.append(orphan), Err(StoreError::Linkage)));

    store.append(b1.clone()).unwrap();
    assert_eq!(store.height(), 1);
    assert_eq!(store.tip().hash, b1.hash);
}

#[test]
fn range_and_reopen() {
    let (wallets, genesis) = make_net(3, 10);
    let registry = Registry::from_chain([&genesis]);
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("db");

    let mut chain = vec![genesis.clone()];
    {
        let mut store = BlockStore::open_with_genesis(&db_path, genesis.clone()).unwrap();
        for h in 1..=4u64 {
            let tx = sign_tx(
                &wallets[(h % 3) as usize],
                &format!("tx{h}"),
                GENESIS_TS + h,
                vec![data_cmd(1, "t")],
            );
            let block = build_block(
                &wallets,
                &registry,
                chain.last().unwrap(),
                vec![tx],
                0,
                GENESIS_TS + h,
            );
            store.append(block.clone()).unwrap();
            chain.push(block);
        }

        let mid = store.range(1, 3, 100).unwrap();
        assert_eq!(mid.len(), 3);
        assert_eq!(mid[0].height, 1);
        assert_eq!(mid[2].height, 3);

        let capped = store.range(0, 4, 2).unwrap();
        assert_eq!(capped.len(), 2);

        assert!(store.range(3, 1, 10).unwrap().is_empty());
        assert!(store.get_by_height(99).unwrap().is_none());
    }

    // reopen: tip survives, records decode
    let store = BlockStore::open_with_genesis(&db_path, genesis).unwrap();
    assert_eq!(store.height(), 4);
    assert_eq!(store.tip().hash, chain[4].hash);
    assert_eq!(store.get_by_height(2).unwrap().unwrap().hash, chain[2].hash);
}

#[test]
fn registry_snapshots_follow_the_chain() {
    let (wallets, genesis) = make_net(3, 10);
    let registry = Registry::from_chain([&genesis]);
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlockStore::open_with_genesis(&dir.path().join("db"), genesis.clone()).unwrap();

    // block 1 raises wallet 0's stake to 25
    let raise = sign_tx(
        &wallets[0],
        "raise",
        GENESIS_TS + 1,
        vec![divachain::core::types::Command {
            seq: 1,
            op: divachain::core::types::CommandOp::ModifyStake {
                public_key: wallets[0].public_key().clone(),
                stake: 25,
            },
        }],
    );
    let b1 = build_block(&wallets, &registry, &genesis, vec![raise], 0, GENESIS_TS + 2);
    store.append(b1).unwrap();

    let at_genesis = Registry::snapshot_at(&store, 0).unwrap();
    let at_tip = Registry::snapshot_at(&store, 1).unwrap();
    assert_eq!(at_genesis.stake_of(wallets[0].public_key()), 10);
    assert_eq!(at_tip.stake_of(wallets[0].public_key()), 25);
    assert_eq!(at_tip.total(), 45);

    // endpoints registered in genesis are visible at the tip
    assert!(store.has_network("127.0.0.1", 17_470).unwrap());
    assert!(!store.has_network("127.0.0.1", 1).unwrap());
}
