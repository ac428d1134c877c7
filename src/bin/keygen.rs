// Copyright (c) 2026 Divachain
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Generate the key files and API token for a node ident.
//!
//! Usage: `keygen <path_keys> <ident>`
//! Writes `<ident>.public` / `<ident>.private` / `<ident>.api-token` and
//! prints the public key in wire encoding.

use anyhow::Result;
use divachain::core::security::wallet::{load_or_create_token, Wallet};
use std::path::PathBuf;

fn main() -> Result<()> {
    let out_dir = std::env::args().nth(1).unwrap_or_else(|| "keys".to_string());
    let ident = std::env::args()
        .nth(2)
        .unwrap_or_else(|| "127.0.0.1_17468".to_string());
    let path = PathBuf::from(out_dir);

    let wallet = Wallet::open(&path, &ident).map_err(|e| anyhow::anyhow!("wallet: {e}"))?;
    load_or_create_token(&path, &ident).map_err(|e| anyhow::anyhow!("token: {e}"))?;

    println!("{}", wallet.public_key());
    Ok(())
}
