//! Record module - the block data model and process-wide chain index

mod block;
mod index;

pub use block::*;
pub use index::*;
