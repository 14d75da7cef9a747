//! Engine module - layered hash-commitment construction and verification

mod canonical;
mod chain;

pub use canonical::*;
pub use chain::*;
