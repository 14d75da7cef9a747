//! Cryptography module - composite digests, keyed signing, nonce search

mod hash;
mod provider;
mod nonce;

pub use hash::*;
pub use provider::*;
pub use nonce::*;
