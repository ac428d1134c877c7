// Copyright (c) 2026 Divachain
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Security: the wallet and signature verification.

pub mod wallet;
