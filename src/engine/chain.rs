//! Hash-chain construction and verification
//!
//! `make` runs the layer sequence once per block and terminates on
//! success or failure - no intermediate persisted states. `verify`
//! recomputes every commitment from stored content and fails closed at
//! the first mismatch.

use std::sync::Arc;

use thiserror::Error;

use crate::constants::PROPOSER_SLOT;
use crate::crypto::{HashProvider, NonceProvider};
use crate::engine::canonical;
use crate::record::BlockRecord;

/// Engine errors (construction only; verification returns a bare bool)
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Record has no uID assigned")]
    MissingUid,
    #[error("Proposer wallet key is empty")]
    MissingWallet,
}

/// The commitment engine, generic over its crypto collaborators
#[derive(Clone)]
pub struct ChainEngine {
    hasher: Arc<dyn HashProvider>,
    nonces: Arc<dyn NonceProvider>,
}

impl ChainEngine {
    pub fn new(hasher: Arc<dyn HashProvider>, nonces: Arc<dyn NonceProvider>) -> Self {
        Self { hasher, nonces }
    }

    /// Fill a record's proofs and signatures in place
    ///
    /// Expects header, cipher payload, `prev`, and `prevList` to be
    /// populated by the queue; everything else is computed here.
    pub fn make(&self, record: &mut BlockRecord, wallet: &str) -> Result<(), EngineError> {
        if record.header.uid.is_empty() {
            return Err(EngineError::MissingUid);
        }
        if wallet.is_empty() {
            return Err(EngineError::MissingWallet);
        }
        let spec = record.header.nonce_spec.normalized();
        record.header.nonce_spec = spec;

        // 1. seed the validator section
        record.validator.data.insert(PROPOSER_SLOT, wallet.to_string());
        record.validator.info.insert(PROPOSER_SLOT, wallet.to_string());
        record.validator.block.insert(PROPOSER_SLOT, wallet.to_string());
        record
            .validator
            .count
            .insert(wallet.to_string(), self.nonces.step_count(&spec) * 3);

        // 2. data layer
        let sign_input = canonical::cipher_sign_input(&record.cipher.data, &record.cipher.ver);
        record.cipher.sign = self.hasher.keyed_sign(wallet, &sign_input);
        let data_input =
            canonical::data_layer_input(&record.cipher.data, &record.cipher.ver, &record.cipher.sign);
        record.nonces.data = self.nonces.search(&spec, &data_input);
        record.hashes.data = self
            .hasher
            .digest(&canonical::join(&[&data_input, &record.nonces.data]));

        // 3. info layer
        let info_input = canonical::info_layer_input(&record.header);
        record.nonces.info = self.nonces.search(&spec, &info_input);
        record.hashes.info = self
            .hasher
            .digest(&canonical::join(&[&info_input, &record.nonces.info]));

        // 4. block layer
        let block_input = canonical::block_layer_input(&record.hashes.data, &record.hashes.info);
        record.nonces.block = self.nonces.search(&spec, &block_input);
        record.hashes.block = self
            .hasher
            .digest(&canonical::join(&[&block_input, &record.nonces.block]));

        // 5. validator signature
        record.validator.sign = self
            .hasher
            .keyed_sign(wallet, &canonical::validator_input(&record.validator));

        // 6. FINAL commitment (no nonce)
        record.hashes.fin = self.hasher.digest(&canonical::final_input(record));

        // 7. top-level signature
        record.sign = self.hasher.digest(&canonical::top_sign_input(record));
        Ok(())
    }

    /// Recompute every commitment; false at the first mismatch
    pub fn verify(&self, record: &BlockRecord) -> bool {
        let wallet = match record.proposer() {
            Some(wallet) if !wallet.is_empty() => wallet.to_string(),
            _ => {
                tracing::debug!(uid = %record.header.uid, "verify: no proposer wallet");
                return false;
            }
        };
        let spec = record.header.nonce_spec.normalized();

        // cipher signature
        let sign_input = canonical::cipher_sign_input(&record.cipher.data, &record.cipher.ver);
        if self.hasher.keyed_sign(&wallet, &sign_input) != record.cipher.sign {
            return Self::fail(record, "cipher sign");
        }

        // data nonce, then data hash
        let data_input =
            canonical::data_layer_input(&record.cipher.data, &record.cipher.ver, &record.cipher.sign);
        if !self.nonces.verify(&spec, &data_input, &record.nonces.data) {
            return Self::fail(record, "data nonce");
        }
        if self
            .hasher
            .digest(&canonical::join(&[&data_input, &record.nonces.data]))
            != record.hashes.data
        {
            return Self::fail(record, "data hash");
        }

        // info nonce, then info hash
        let info_input = canonical::info_layer_input(&record.header);
        if !self.nonces.verify(&spec, &info_input, &record.nonces.info) {
            return Self::fail(record, "info nonce");
        }
        if self
            .hasher
            .digest(&canonical::join(&[&info_input, &record.nonces.info]))
            != record.hashes.info
        {
            return Self::fail(record, "info hash");
        }

        // block nonce, then block hash
        let block_input = canonical::block_layer_input(&record.hashes.data, &record.hashes.info);
        if !self.nonces.verify(&spec, &block_input, &record.nonces.block) {
            return Self::fail(record, "block nonce");
        }
        if self
            .hasher
            .digest(&canonical::join(&[&block_input, &record.nonces.block]))
            != record.hashes.block
        {
            return Self::fail(record, "block hash");
        }

        // validator signature
        if self
            .hasher
            .keyed_sign(&wallet, &canonical::validator_input(&record.validator))
            != record.validator.sign
        {
            return Self::fail(record, "validator sign");
        }

        // FINAL, then top-level
        if self.hasher.digest(&canonical::final_input(record)) != record.hashes.fin {
            return Self::fail(record, "FINAL hash");
        }
        if self.hasher.digest(&canonical::top_sign_input(record)) != record.sign {
            return Self::fail(record, "top sign");
        }
        true
    }

    fn fail(record: &BlockRecord, layer: &str) -> bool {
        tracing::debug!(uid = %record.header.uid, layer, "verification mismatch");
        false
    }
}
