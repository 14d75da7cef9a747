//! Nonce search seam
//!
//! The Slide and Bounce proof-search strategies live outside this core;
//! this module defines their contract and a self-contained counter
//! search honoring it, plus the per-block-kind difficulty table.

use serde::{Deserialize, Serialize};

use super::sha256_hex;

/// Proof-search strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NonceKind {
    Slide,
    Bounce,
}

/// Declared proof parameters for one commitment layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceSpec {
    #[serde(rename = "type")]
    pub kind: NonceKind,
    pub method: u32,
    pub difficulty: u32,
}

impl NonceSpec {
    /// Fixed fallback used when a block kind has no table entry
    pub const fn fallback(kind: NonceKind) -> Self {
        Self { kind, method: 1, difficulty: 1 }
    }

    /// Clamp invalid declared parameters back to the fixed defaults
    pub fn normalized(self) -> Self {
        let method = if self.method == 0 { 1 } else { self.method };
        let difficulty = if self.difficulty == 0 || self.difficulty > 8 { 1 } else { self.difficulty };
        Self { kind: self.kind, method, difficulty }
    }
}

impl Default for NonceSpec {
    fn default() -> Self {
        Self::fallback(NonceKind::Slide)
    }
}

/// Static difficulty table: block kind -> declared proof parameters
pub fn spec_for_kind(block_kind: u16) -> NonceSpec {
    match block_kind {
        // genesis carries the heaviest commitment
        360 => NonceSpec { kind: NonceKind::Slide, method: 2, difficulty: 2 },
        240 | 250 => NonceSpec { kind: NonceKind::Bounce, method: 1, difficulty: 1 },
        300 => NonceSpec { kind: NonceKind::Slide, method: 1, difficulty: 1 },
        100 => NonceSpec { kind: NonceKind::Slide, method: 1, difficulty: 2 },
        _ => NonceSpec::fallback(NonceKind::Slide),
    }
}

/// Proof-search capability consumed by the chain engine
pub trait NonceProvider: Send + Sync {
    /// Expected number of search steps for the declared parameters
    fn step_count(&self, spec: &NonceSpec) -> u64;

    /// Find a nonce satisfying the difficulty predicate for `input`
    fn search(&self, spec: &NonceSpec, input: &str) -> String;

    /// Check a stored nonce against the predicate
    fn verify(&self, spec: &NonceSpec, input: &str, nonce: &str) -> bool;
}

/// Default provider: incrementing counter against a hex-zero predicate
///
/// Slide requires `difficulty` leading zero digits of the probe digest,
/// Bounce the same count of trailing zeros.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterSearch;

impl CounterSearch {
    fn probe(input: &str, nonce: &str) -> String {
        let mut data = String::with_capacity(input.len() + nonce.len() + 1);
        data.push_str(input);
        data.push(':');
        data.push_str(nonce);
        sha256_hex(data.as_bytes())
    }

    fn satisfies(spec: &NonceSpec, digest: &str) -> bool {
        let n = spec.difficulty as usize;
        let zeros = "0".repeat(n);
        match spec.kind {
            NonceKind::Slide => digest.starts_with(&zeros),
            NonceKind::Bounce => digest.ends_with(&zeros),
        }
    }
}

impl NonceProvider for CounterSearch {
    fn step_count(&self, spec: &NonceSpec) -> u64 {
        let spec = spec.normalized();
        (1u64 << (4 * spec.difficulty.min(8))) * spec.method as u64
    }

    fn search(&self, spec: &NonceSpec, input: &str) -> String {
        let spec = spec.normalized();
        let mut n: u64 = 0;
        loop {
            let candidate = n.to_string();
            if Self::satisfies(&spec, &Self::probe(input, &candidate)) {
                return candidate;
            }
            n = n.wrapping_add(1);
        }
    }

    fn verify(&self, spec: &NonceSpec, input: &str, nonce: &str) -> bool {
        let spec = spec.normalized();
        Self::satisfies(&spec, &Self::probe(input, nonce))
    }
}
