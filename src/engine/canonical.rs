//! Canonical string construction
//!
//! Every byte fed into a commitment or signature comes from here. Maps
//! canonicalize in ascending key order - an explicit, deterministic
//! contract, independent of any runtime iteration order.

use std::collections::BTreeMap;

use crate::constants::CANON_DELIM;
use crate::record::{BlockHeader, BlockRecord, ValidatorSection};

/// Join canonical fields with the protocol delimiter
pub fn join(parts: &[&str]) -> String {
    parts.join(CANON_DELIM)
}

fn slot_map(map: &BTreeMap<u32, String>) -> String {
    map.iter()
        .map(|(slot, wallet)| format!("{slot}:{wallet}"))
        .collect::<Vec<_>>()
        .join(";")
}

fn count_map(map: &BTreeMap<String, u64>) -> String {
    map.iter()
        .map(|(wallet, count)| format!("{wallet}:{count}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Canonical form of the per-kind previous links
pub fn prev_list(map: &BTreeMap<u16, String>) -> String {
    map.iter()
        .map(|(kind, link)| format!("{kind}:{link}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Input of the cipher signature: payload and format tag
pub fn cipher_sign_input(data: &str, ver: &str) -> String {
    join(&[data, ver])
}

/// Input of the data layer: payload, tag, and the cipher signature
pub fn data_layer_input(data: &str, ver: &str, cipher_sign: &str) -> String {
    join(&[data, ver, cipher_sign])
}

/// Input of the info layer: the full header metadata
pub fn info_layer_input(header: &BlockHeader) -> String {
    let spec = &header.nonce_spec;
    join(&[
        &header.version.to_string(),
        &header.kind.to_string(),
        &header.uid,
        &header.time,
        &header.multi.to_string(),
        &format!("{:?}", spec.kind),
        &spec.method.to_string(),
        &spec.difficulty.to_string(),
        &header.flags.archive.to_string(),
        &header.flags.relay.to_string(),
    ])
}

/// Input of the block layer: the two lower-layer digests
pub fn block_layer_input(data_hash: &str, info_hash: &str) -> String {
    join(&[data_hash, info_hash])
}

/// Input of the validator signature
///
/// The maps concatenate in their construction sequence: data, info,
/// block, block again, count.
pub fn validator_input(validator: &ValidatorSection) -> String {
    join(&[
        &slot_map(&validator.data),
        &slot_map(&validator.info),
        &slot_map(&validator.block),
        &slot_map(&validator.block),
        &count_map(&validator.count),
    ])
}

/// Input of the FINAL commitment, binding linkage to the proofs
pub fn final_input(record: &BlockRecord) -> String {
    join(&[
        &record.validator.sign,
        &record.prev,
        &record.header.row_no.to_string(),
        &prev_list(&record.header.prev_list),
        &record.hashes.data,
        &record.hashes.info,
        &record.hashes.block,
    ])
}

/// Input of the top-level signature over the four digests
pub fn top_sign_input(record: &BlockRecord) -> String {
    join(&[
        &record.hashes.info,
        &record.hashes.data,
        &record.hashes.block,
        &record.hashes.fin,
    ])
}
