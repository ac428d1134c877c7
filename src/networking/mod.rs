#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Networking: libp2p overlay transport.

pub mod p2p;
