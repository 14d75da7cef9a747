//! Block record structure
//!
//! One ledger entry: header, opaque payload, the four-layer hash
//! commitment, nonces, the validator section, and chain linkage.
//! Serialized as JSON inside shard archives; field names are part of
//! the persisted format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::GENESIS_UID;
use crate::crypto::NonceSpec;

/// Protocol version written into new headers
pub const BLOCK_VERSION: u32 = 1;

/// Timestamp format of `header.time`, derived from the uID
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Node-capability flags carried in the header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlags {
    /// Node keeps full shard archives
    pub archive: bool,
    /// Node relays blocks for other layers
    pub relay: bool,
}

/// Block header metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    #[serde(rename = "type")]
    pub kind: u16,
    #[serde(rename = "rowNo")]
    pub row_no: i64,
    #[serde(rename = "uID")]
    pub uid: String,
    /// Wall-clock time decoded from the uID ([`TIME_FORMAT`])
    pub time: String,
    /// True when the payload batches more than one pending entry
    pub multi: bool,
    #[serde(rename = "nonceSpec")]
    pub nonce_spec: NonceSpec,
    pub flags: NodeFlags,
    /// Per-kind previous-link strings (parallel per-type chains)
    #[serde(rename = "prevList")]
    pub prev_list: BTreeMap<u16, String>,
}

/// Opaque payload plus its signature
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CipherSection {
    /// Base64 of the (joined) payload bytes
    pub data: String,
    /// Payload format tag
    pub ver: String,
    /// Signature over data + ver
    pub sign: String,
}

/// The four commitment digests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HashSection {
    pub info: String,
    pub data: String,
    pub block: String,
    #[serde(rename = "FINAL")]
    pub fin: String,
}

/// Proof values, one per nonce-bearing layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NonceSection {
    pub info: String,
    pub data: String,
    pub block: String,
}

/// Proposer assignment and required work accounting
///
/// Slot 1000 holds the proposer wallet by convention. `count` records,
/// per wallet, the required nonce step count times three (one share per
/// nonce-bearing layer).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSection {
    pub data: BTreeMap<u32, String>,
    pub info: BTreeMap<u32, String>,
    pub block: BTreeMap<u32, String>,
    pub count: BTreeMap<String, u64>,
    /// Signature over the maps above
    pub sign: String,
}

/// One ledger entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub header: BlockHeader,
    pub cipher: CipherSection,
    pub hashes: HashSection,
    pub nonces: NonceSection,
    pub validator: ValidatorSection,
    /// Previous block's uID + sign; empty at row 1
    pub prev: String,
    /// Top-level signature over the four hashes
    pub sign: String,
}

impl BlockRecord {
    /// The link string the next block must carry in `prev`
    pub fn prev_link(&self) -> String {
        let mut link = self.header.uid.clone();
        link.push_str(&self.sign);
        link
    }

    /// Archive entry name for this record
    pub fn entry_name(&self) -> String {
        format!("{}.json", self.header.uid)
    }

    /// True for the reserved row-1 block
    pub fn is_genesis(&self) -> bool {
        self.header.row_no == 1 && self.header.uid == GENESIS_UID
    }

    /// Proposer wallet from the conventional slot, if seeded
    pub fn proposer(&self) -> Option<&str> {
        self.validator
            .data
            .get(&crate::constants::PROPOSER_SLOT)
            .map(String::as_str)
    }
}
