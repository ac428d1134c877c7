// Copyright (c) 2026 Divachain
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Runtime: the single-task core executor.

pub mod executor;
