//! KESTREL (KS) Ledger Core Library
//!
//! Builds, commits, persists, and reconciles an append-only, row-numbered
//! chain of blocks across a small set of known validator nodes, using a
//! layered hash-commitment scheme.
//!
//! KS is the short form used in protocol identifiers and shard paths.

pub mod crypto;
pub mod ident;
pub mod record;
pub mod engine;
pub mod queue;
pub mod storage;
pub mod integrity;
pub mod net;
pub mod pool;
pub mod clock;
pub mod config;

/// Protocol constants - HARD-CODED, NEVER CONFIGURABLE
pub mod constants {
    /// Chain name (short form for paths/identifiers)
    pub const CHAIN_NAME: &str = "KS";

    /// Full chain name
    pub const CHAIN_FULL_NAME: &str = "KESTREL";

    /// Delimiter joining canonical fields before hashing/signing
    pub const CANON_DELIM: &str = "*";

    /// Delimiter joining batched payloads inside `cipher.data`
    pub const BATCH_DELIM: &str = "\u{001f}";

    /// Reserved uID of the row-1 genesis block, identical on every node.
    /// The time prefix decodes to 2020-01-01 00:00:00.000000 UTC.
    pub const GENESIS_UID: &str = "1343aa500000000000\
7a1c44e09b3df6258c017e4aa95b82d3f40c\
6d91e7b25a38d09c14efb6273a5048e19c2b";

    /// Block kind carrying the genesis configuration
    pub const GENESIS_KIND: u16 = 360;

    /// Block kind for file-upload requests (single-item batches)
    pub const FILE_REQUEST_KIND: u16 = 240;

    /// Block kind for file chunks (payload swapped for raw bytes at dequeue)
    pub const FILE_CHUNK_KIND: u16 = 250;

    /// Block kind for heartbeat/empty blocks (single-item batches)
    pub const HEARTBEAT_KIND: u16 = 300;

    /// Maximum number of pending entries drained into one block
    pub const MAX_BATCH: usize = 1000;

    /// Validator slot key used by convention for the proposer wallet
    pub const PROPOSER_SLOT: u32 = 1000;

    /// Number of shard buckets per calendar month
    pub const SHARD_BUCKETS: u64 = 50;

    /// Seconds after which an abandoned archive open-marker is overridden
    pub const ARCHIVE_STALE_SECS: u64 = 3;

    /// Initial delay between peer fetch retries
    pub const PEER_RETRY_BASE_MS: u64 = 2_500;

    /// Escalated retry delay once failures accumulate
    pub const PEER_RETRY_MAX_MS: u64 = 10_000;

    /// Consecutive failures before the retry delay escalates
    pub const PEER_RETRY_ESCALATE_AFTER: u32 = 10;
}
