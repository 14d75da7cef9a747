//! Chain integrity checking and self-healing repair
//!
//! Validates the full local archive set, repairs duplication, gaps,
//! corruption, and broken links, and registers the healthy chain into
//! the shared index. Every repair answers `CheckAgain`; the outer loop
//! re-checks until the verdict settles.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{validator_peers, NodeConfig};
use crate::constants::GENESIS_UID;
use crate::engine::ChainEngine;
use crate::net::{NetError, PeerFetcher};
use crate::record::{ActiveGenesis, BlockRecord, ChainIndex};
use crate::storage::BlockStore;

/// Verdict of one integrity pass
#[derive(Debug, Clone, PartialEq)]
pub enum ChainStatus {
    /// A repair happened; check again
    CheckAgain,
    /// No local blocks at all; genesis bootstrap required
    GenesisNeed,
    /// Chain is consistent; carries the last block
    Valid(Box<BlockRecord>),
}

/// Integrity errors - only fatal conditions surface; everything
/// repairable is handled in place and reported as `CheckAgain`
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("Unknown network/layer: {network}/{layer}")]
    UnknownNetwork { network: String, layer: u8 },
    #[error("Peer fetch failed: {0}")]
    Net(#[from] NetError),
    #[error("Peer-delivered block failed verification")]
    PeerBlockInvalid,
    #[error("Genesis bootstrap failed: {0}")]
    Bootstrap(String),
    #[error("Integrity check cancelled")]
    Cancelled,
}

/// One verified block plus where it lives on disk
#[derive(Debug, Clone)]
pub(crate) struct Located {
    pub record: BlockRecord,
    pub archive: PathBuf,
}

/// The integrity checker for one (network, layer) chain
pub struct IntegrityChecker {
    pub(crate) store: Arc<BlockStore>,
    pub(crate) engine: ChainEngine,
    pub(crate) config: NodeConfig,
    pub(crate) index: Arc<ChainIndex>,
    pub(crate) genesis: Arc<ActiveGenesis>,
    pub(crate) fetcher: PeerFetcher,
}

impl IntegrityChecker {
    pub fn new(
        store: Arc<BlockStore>,
        engine: ChainEngine,
        config: NodeConfig,
        index: Arc<ChainIndex>,
        genesis: Arc<ActiveGenesis>,
        fetcher: PeerFetcher,
    ) -> Self {
        Self { store, engine, config, index, genesis, fetcher }
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn engine(&self) -> &ChainEngine {
        &self.engine
    }

    pub fn index(&self) -> &ChainIndex {
        &self.index
    }

    /// Genesis configuration cache, populated by a valid integrity pass
    pub fn genesis(&self) -> &ActiveGenesis {
        &self.genesis
    }

    /// Re-check until the verdict is not `CheckAgain`
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ChainStatus, IntegrityError> {
        loop {
            if cancel.is_cancelled() {
                return Err(IntegrityError::Cancelled);
            }
            match self.check(cancel).await? {
                ChainStatus::CheckAgain => continue,
                verdict => return Ok(verdict),
            }
        }
    }

    /// One full integrity pass over the local archive set
    pub async fn check(&self, cancel: &CancellationToken) -> Result<ChainStatus, IntegrityError> {
        if validator_peers(&self.config.network, self.config.layer).is_none() {
            return Err(IntegrityError::UnknownNetwork {
                network: self.config.network.clone(),
                layer: self.config.layer,
            });
        }

        let archives = match self.store.archives() {
            Ok(archives) => archives,
            Err(e) => {
                tracing::warn!(error = %e, "archive listing failed, retrying");
                return Ok(ChainStatus::CheckAgain);
            }
        };

        let mut by_row: BTreeMap<i64, Located> = BTreeMap::new();
        let mut seen_uids: HashMap<String, PathBuf> = HashMap::new();

        for path in archives {
            match self.scan_archive(&path, &mut by_row, &mut seen_uids) {
                Ok(true) => {}
                // a repair happened inside this archive
                Ok(false) => return Ok(ChainStatus::CheckAgain),
                Err(e) => {
                    tracing::warn!(archive = %path.display(), error = %e, "archive repair failed, retrying");
                    return Ok(ChainStatus::CheckAgain);
                }
            }
        }

        if by_row.is_empty() {
            return Ok(ChainStatus::GenesisNeed);
        }

        // row domain must be contiguous from 1
        let top = *by_row.keys().next_back().expect("non-empty");
        for expected in 1..=top {
            if !by_row.contains_key(&expected) {
                self.repair_gap(expected, &by_row, cancel).await?;
                return Ok(ChainStatus::CheckAgain);
            }
        }

        // backward link walk
        for row in (2..=top).rev() {
            let current = &by_row[&row];
            let previous = &by_row[&(row - 1)];
            if current.record.prev != previous.record.prev_link() {
                tracing::warn!(row = row - 1, "broken chain link, deleting lower block");
                self.delete_entry(&previous.archive, &previous.record.entry_name());
                return Ok(ChainStatus::CheckAgain);
            }
        }
        let first = &by_row[&1];
        if first.record.header.uid != GENESIS_UID || !first.record.prev.is_empty() {
            tracing::warn!("row 1 is not a well-formed genesis block, deleting");
            self.delete_entry(&first.archive, &first.record.entry_name());
            return Ok(ChainStatus::CheckAgain);
        }

        // decode and cache the genesis configuration
        let config = base64::engine::general_purpose::STANDARD
            .decode(&first.record.cipher.data)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok());
        let Some(config) = config else {
            tracing::warn!("genesis payload undecodable, deleting row 1");
            self.delete_entry(&first.archive, &first.record.entry_name());
            return Ok(ChainStatus::CheckAgain);
        };
        self.genesis.set(config);

        for (row, located) in &by_row {
            self.index.register(*row, &located.record.header.uid);
        }
        let last = by_row.remove(&top).expect("non-empty").record;
        tracing::info!(rows = top, "chain integrity verified");
        Ok(ChainStatus::Valid(Box::new(last)))
    }

    /// Scan one archive; Ok(true) = clean, Ok(false) = repaired
    fn scan_archive(
        &self,
        path: &Path,
        by_row: &mut BTreeMap<i64, Located>,
        seen_uids: &mut HashMap<String, PathBuf>,
    ) -> Result<bool, crate::storage::StorageError> {
        let entries = match self.store.read_entries(path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(archive = %path.display(), error = %e, "corrupt archive deleted");
                self.store.delete_archive(path)?;
                return Ok(false);
            }
        };
        if entries.is_empty() {
            tracing::warn!(archive = %path.display(), "empty archive deleted");
            self.store.delete_archive(path)?;
            return Ok(false);
        }

        let mut names = HashSet::new();
        if entries.iter().any(|(name, _)| !names.insert(name.clone())) {
            tracing::warn!(archive = %path.display(), "duplicate entry names pruned");
            self.store.rewrite_filtered(path, &HashSet::new())?;
            return Ok(false);
        }

        for (name, bytes) in entries {
            let record: BlockRecord = match serde_json::from_slice(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(entry = %name, error = %e, "undecodable entry deleted");
                    self.store.rewrite_filtered(path, &HashSet::from([name]))?;
                    return Ok(false);
                }
            };
            if !self.engine.verify(&record) {
                tracing::warn!(entry = %name, row = record.header.row_no, "verification failed, entry deleted");
                self.store.rewrite_filtered(path, &HashSet::from([name]))?;
                return Ok(false);
            }
            let row = record.header.row_no;
            if by_row.contains_key(&row) {
                tracing::warn!(row, entry = %name, "duplicate row number, second-seen entry deleted");
                self.store.rewrite_filtered(path, &HashSet::from([name]))?;
                return Ok(false);
            }
            if seen_uids.contains_key(&record.header.uid) {
                tracing::warn!(uid = %record.header.uid, "duplicate uID, second-seen entry deleted");
                self.store.rewrite_filtered(path, &HashSet::from([name]))?;
                return Ok(false);
            }
            seen_uids.insert(record.header.uid.clone(), path.to_path_buf());
            by_row.insert(row, Located { record, archive: path.to_path_buf() });
        }
        Ok(true)
    }

    /// Repair a missing row: roots delete above the gap to force
    /// regeneration, everyone else fetches the row from a peer
    async fn repair_gap(
        &self,
        missing: i64,
        by_row: &BTreeMap<i64, Located>,
        cancel: &CancellationToken,
    ) -> Result<(), IntegrityError> {
        if self.config.is_root() {
            let above = by_row
                .range(missing + 1..)
                .next()
                .expect("a gap implies a higher row exists");
            tracing::warn!(missing, deleting = above.0, "root repairing gap by deletion");
            self.delete_entry(&above.1.archive, &above.1.record.entry_name());
            return Ok(());
        }

        tracing::warn!(missing, "fetching missing row from peers");
        let record = self.fetcher.fetch_row(missing, cancel).await?;
        if record.header.row_no != missing || !self.engine.verify(&record) {
            tracing::warn!(missing, "peer delivered an unusable block for the gap");
            return Err(IntegrityError::PeerBlockInvalid);
        }
        self.store
            .write(&record)
            .await
            .map_err(|e| IntegrityError::Bootstrap(e.to_string()))?;
        Ok(())
    }

    /// Delete one entry, logging instead of failing - the next pass
    /// re-detects anything left behind
    pub(crate) fn delete_entry(&self, archive: &Path, name: &str) {
        if let Err(e) = self
            .store
            .rewrite_filtered(archive, &HashSet::from([name.to_string()]))
        {
            tracing::error!(archive = %archive.display(), entry = %name, error = %e, "entry deletion failed");
        }
    }
}
