//! Storage module - time-sharded archive persistence for block records

mod archive;
mod writer;

pub use archive::*;
pub use writer::*;
