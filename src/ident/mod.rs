//! Block identifier derivation
//!
//! One canonical module for the time-embedding block IDs: generation,
//! the exact-inverse timestamp decode, and shard-archive naming. Every
//! other component resolves IDs through here.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use thiserror::Error;

use crate::constants::SHARD_BUCKETS;
use crate::crypto::{keyed_hex, sha256_hex};

/// Current identifier length (hex chars)
pub const ID_LEN: usize = 90;

/// Legacy identifier length still accepted on decode
pub const LEGACY_ID_LEN: usize = 72;

/// Hex chars of the packed-time prefix: date 7, time-of-day 5, micros 6
const TIME_PREFIX_LEN: usize = 18;

/// Identifier errors
#[derive(Debug, Error)]
pub enum IdentError {
    #[error("Identifier length {0} is neither {ID_LEN} nor {LEGACY_ID_LEN}")]
    BadLength(usize),
    #[error("Identifier time prefix is not valid hex")]
    BadHex,
    #[error("Identifier time prefix decodes to an impossible timestamp")]
    BadTime,
}

/// Pack a timestamp into the 18-char hex prefix
fn pack_time(time: DateTime<Utc>) -> String {
    let date = time.year() as u64 * 10_000 + time.month() as u64 * 100 + time.day() as u64;
    let tod = time.hour() as u64 * 10_000 + time.minute() as u64 * 100 + time.second() as u64;
    let micros = time.timestamp_subsec_micros() as u64;
    format!("{:07x}{:05x}{:06x}", date, tod, micros)
}

/// Derive a fresh 90-char identifier from a timestamp and a seed
///
/// Two chained keyed hash rounds over (prefix, seed, per-call
/// randomness) produce the fragments, so concurrent calls with the
/// same timestamp still yield distinct IDs.
pub fn generate(time: DateTime<Utc>, seed: &str) -> String {
    let prefix = pack_time(time);
    let salt: u64 = rand::random();
    let round1 = keyed_hex(seed, format!("{prefix}{salt:016x}").as_bytes());
    let round2 = keyed_hex(&round1, seed.as_bytes());
    format!("{prefix}{}{}", &round1[..36], &round2[..36])
}

/// Derive an identifier in the legacy 72-char encoding
///
/// Same prefix, 27-char fragments. Kept for decode-compatibility tests;
/// new blocks always use [`generate`].
pub fn generate_legacy(time: DateTime<Utc>, seed: &str) -> String {
    let prefix = pack_time(time);
    let salt: u64 = rand::random();
    let round1 = keyed_hex(seed, format!("{prefix}{salt:016x}").as_bytes());
    let round2 = keyed_hex(&round1, seed.as_bytes());
    format!("{prefix}{}{}", &round1[..27], &round2[..27])
}

/// Recover the timestamp embedded in a 72- or 90-char identifier
pub fn time_from_key(id: &str) -> Result<DateTime<Utc>, IdentError> {
    if id.len() != ID_LEN && id.len() != LEGACY_ID_LEN {
        return Err(IdentError::BadLength(id.len()));
    }
    let prefix = &id[..TIME_PREFIX_LEN];
    let date = u64::from_str_radix(&prefix[..7], 16).map_err(|_| IdentError::BadHex)?;
    let tod = u64::from_str_radix(&prefix[7..12], 16).map_err(|_| IdentError::BadHex)?;
    let micros = u64::from_str_radix(&prefix[12..18], 16).map_err(|_| IdentError::BadHex)?;

    let (year, month, day) = ((date / 10_000) as i32, (date / 100 % 100) as u32, (date % 100) as u32);
    let (hour, minute, second) = ((tod / 10_000) as u32, (tod / 100 % 100) as u32, (tod % 100) as u32);

    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_micro_opt(hour, minute, second, micros as u32))
        .ok_or(IdentError::BadTime)?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Derive the shard-archive stem `{YYYYMM}-{NN}` for an identifier
///
/// The bucket is a stable hash of the packed-time prefix, so every node
/// files the same block into the same archive.
pub fn storage_file_name(id: &str) -> Result<String, IdentError> {
    let time = time_from_key(id)?;
    let digest = sha256_hex(id[..TIME_PREFIX_LEN].as_bytes());
    // first 8 hex chars are plenty for a 50-way split
    let word = u64::from_str_radix(&digest[..8], 16).map_err(|_| IdentError::BadHex)?;
    Ok(format!(
        "{:04}{:02}-{:02}",
        time.year(),
        time.month(),
        word % SHARD_BUCKETS
    ))
}
