//! Block assembly queue
//!
//! Batches homogeneous pending payloads into candidate blocks, threads
//! in previous-block linkage, and keeps the pending list durable so a
//! restart loses nothing that was accepted into the queue.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::constants::{
    BATCH_DELIM, FILE_CHUNK_KIND, FILE_REQUEST_KIND, GENESIS_KIND, GENESIS_UID, HEARTBEAT_KIND,
    MAX_BATCH,
};
use crate::crypto::{dedup_key, spec_for_kind};
use crate::ident;
use crate::pool::{DurablePool, PoolError};
use crate::record::{BlockHeader, BlockRecord, NodeFlags, BLOCK_VERSION, TIME_FORMAT};

/// Pool retention for pending entries awaiting a block
const PENDING_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Pending pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("Pending codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("Chunk file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No last block to link against")]
    MissingLast,
}

/// One pending payload awaiting inclusion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEntry {
    pub kind: u16,
    pub payload: String,
    /// Content-addressed pool key
    pub key: String,
}

/// A candidate block plus the pool keys it consumed
#[derive(Debug, Clone)]
pub struct CandidateBlock {
    pub record: BlockRecord,
    pub dedup_keys: Vec<String>,
}

/// The assembly queue; row assignment is single-writer through here
pub struct AssemblyQueue {
    pending: Mutex<VecDeque<PendingEntry>>,
    pool: Arc<dyn DurablePool>,
    clock: Arc<dyn Clock>,
    wallet: String,
    flags: NodeFlags,
}

impl AssemblyQueue {
    pub fn new(
        pool: Arc<dyn DurablePool>,
        clock: Arc<dyn Clock>,
        wallet: String,
        flags: NodeFlags,
    ) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            pool,
            clock,
            wallet,
            flags,
        }
    }

    /// Enqueue a payload; persists to the pool under its dedup key
    pub fn add(&self, kind: u16, payload: String) -> Result<String, QueueError> {
        let key = dedup_key(payload.as_bytes());
        let entry = PendingEntry { kind, payload, key: key.clone() };
        self.pool.put(&key, &bincode::serialize(&entry)?, PENDING_TTL)?;
        self.pending.lock().expect("pending poisoned").push_back(entry);
        Ok(key)
    }

    /// Reload surviving pool entries after a restart
    pub fn restore(&self) -> Result<usize, QueueError> {
        let mut pending = self.pending.lock().expect("pending poisoned");
        pending.clear();
        let mut restored = 0;
        for (_, bytes) in self.pool.entries()? {
            match bincode::deserialize::<PendingEntry>(&bytes) {
                Ok(entry) => {
                    pending.push_back(entry);
                    restored += 1;
                }
                Err(e) => tracing::warn!(error = %e, "skipping undecodable pending entry"),
            }
        }
        Ok(restored)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().expect("pending poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the next homogeneous batch into a candidate block
    ///
    /// Returns `None` when nothing is pending. The engine still has to
    /// run `make` on the candidate before it can be stored.
    pub fn get(&self, last: Option<&BlockRecord>) -> Result<Option<CandidateBlock>, QueueError> {
        let (batch, chunk_bytes) = {
            let mut pending = self.pending.lock().expect("pending poisoned");
            let Some(head) = pending.front() else {
                return Ok(None);
            };
            let kind = head.kind;
            // refuse to drain entries we cannot link yet
            if kind != GENESIS_KIND && last.is_none() {
                return Err(QueueError::MissingLast);
            }
            // chunk files are read before the entry leaves the pending
            // list, so an unreadable file drops nothing
            let chunk_bytes = if kind == FILE_CHUNK_KIND {
                Some(std::fs::read(&head.payload)?)
            } else {
                None
            };
            let limit = if single_item_kind(kind) { 1 } else { MAX_BATCH };
            let mut batch = Vec::new();
            while batch.len() < limit && pending.front().map(|e| e.kind) == Some(kind) {
                batch.push(pending.pop_front().unwrap());
            }
            (batch, chunk_bytes)
        };

        let kind = batch[0].kind;
        let dedup_keys: Vec<String> = batch.iter().map(|e| e.key.clone()).collect();

        // file chunks carry a path; the block carries the file bytes
        let data = if let Some(bytes) = chunk_bytes {
            base64::engine::general_purpose::STANDARD.encode(bytes)
        } else {
            let joined = batch
                .iter()
                .map(|e| e.payload.as_str())
                .collect::<Vec<_>>()
                .join(BATCH_DELIM);
            base64::engine::general_purpose::STANDARD.encode(joined.as_bytes())
        };

        let mut record = BlockRecord::default();
        record.cipher.data = data;
        record.cipher.ver = "1".to_string();
        record.header = self.build_header(kind, batch.len(), last)?;
        if kind != GENESIS_KIND {
            let last = last.ok_or(QueueError::MissingLast)?;
            let (prev, prev_list) = organize_block_order(last);
            record.prev = prev;
            record.header.prev_list = prev_list;
        }
        Ok(Some(CandidateBlock { record, dedup_keys }))
    }

    /// Release dedup keys once their block is accepted into the chain
    pub fn add_to_chain(&self, dedup_keys: &[String]) -> Result<(), QueueError> {
        for key in dedup_keys {
            self.pool.remove(key)?;
        }
        Ok(())
    }

    fn build_header(
        &self,
        kind: u16,
        batch_len: usize,
        last: Option<&BlockRecord>,
    ) -> Result<BlockHeader, QueueError> {
        let mut header = BlockHeader {
            version: BLOCK_VERSION,
            kind,
            row_no: 0,
            uid: String::new(),
            time: String::new(),
            multi: batch_len > 1,
            nonce_spec: spec_for_kind(kind),
            flags: self.flags,
            prev_list: BTreeMap::new(),
        };
        if kind == GENESIS_KIND {
            header.row_no = 1;
            header.uid = GENESIS_UID.to_string();
        } else {
            let last = last.ok_or(QueueError::MissingLast)?;
            header.row_no = last.header.row_no + 1;
            header.uid = ident::generate(self.clock.now(), &self.wallet);
        }
        // header.time is always re-derived from the uID
        let time = ident::time_from_key(&header.uid).expect("freshly generated uid decodes");
        header.time = time.format(TIME_FORMAT).to_string();
        Ok(header)
    }
}

/// Single-item batch kinds: file requests, file chunks, heartbeats
fn single_item_kind(kind: u16) -> bool {
    matches!(kind, FILE_REQUEST_KIND | FILE_CHUNK_KIND | HEARTBEAT_KIND)
}

/// Thread linkage from the last accepted block into the next one
///
/// `prev` is the last block's uID+sign; the per-kind list carries the
/// last block's own list forward with its own kind updated.
pub fn organize_block_order(last: &BlockRecord) -> (String, BTreeMap<u16, String>) {
    let link = last.prev_link();
    let mut prev_list = last.header.prev_list.clone();
    prev_list.insert(last.header.kind, link.clone());
    (link, prev_list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SkewClock;
    use crate::pool::SledPool;

    fn queue() -> (tempfile::TempDir, AssemblyQueue) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::Config::new().path(dir.path().join("pool")).temporary(true).open().unwrap();
        let pool = Arc::new(SledPool::open(&db, "pending").unwrap());
        let queue = AssemblyQueue::new(
            pool,
            Arc::new(SkewClock::new()),
            "wallet".to_string(),
            NodeFlags::default(),
        );
        (dir, queue)
    }

    fn last_block() -> BlockRecord {
        let mut rec = BlockRecord::default();
        let time = chrono::Utc::now();
        rec.header.kind = 360;
        rec.header.row_no = 1;
        rec.header.uid = GENESIS_UID.to_string();
        rec.header.time = time.format(TIME_FORMAT).to_string();
        rec.sign = "genesis-sign".to_string();
        rec
    }

    #[test]
    fn test_same_kind_batching_then_single() {
        let (_dir, queue) = queue();
        queue.add(100, "a".to_string()).unwrap();
        queue.add(100, "b".to_string()).unwrap();
        queue.add(100, "c".to_string()).unwrap();
        queue.add(300, "hb".to_string()).unwrap();

        let last = last_block();
        let first = queue.get(Some(&last)).unwrap().unwrap();
        assert_eq!(first.record.header.kind, 100);
        assert!(first.record.header.multi);
        assert_eq!(first.dedup_keys.len(), 3);

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&first.record.cipher.data)
            .unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), format!("a{BATCH_DELIM}b{BATCH_DELIM}c"));

        let second = queue.get(Some(&last)).unwrap().unwrap();
        assert_eq!(second.record.header.kind, 300);
        assert!(!second.record.header.multi);
        assert_eq!(second.dedup_keys.len(), 1);

        assert!(queue.get(Some(&last)).unwrap().is_none());
    }

    #[test]
    fn test_heartbeat_never_batches() {
        let (_dir, queue) = queue();
        queue.add(300, "1".to_string()).unwrap();
        queue.add(300, "2".to_string()).unwrap();
        let candidate = queue.get(Some(&last_block())).unwrap().unwrap();
        assert_eq!(candidate.dedup_keys.len(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_chunk_payload_replaced_by_file_bytes() {
        let (dir, queue) = queue();
        let chunk = dir.path().join("chunk.bin");
        std::fs::write(&chunk, b"raw chunk bytes").unwrap();
        queue.add(250, chunk.to_string_lossy().into_owned()).unwrap();

        let candidate = queue.get(Some(&last_block())).unwrap().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&candidate.record.cipher.data)
            .unwrap();
        assert_eq!(decoded, b"raw chunk bytes");
    }

    #[test]
    fn test_missing_chunk_file_keeps_entry_queued() {
        let (dir, queue) = queue();
        let chunk = dir.path().join("late.bin");
        queue.add(250, chunk.to_string_lossy().into_owned()).unwrap();

        let last = last_block();
        assert!(matches!(queue.get(Some(&last)), Err(QueueError::Io(_))));
        assert_eq!(queue.len(), 1);

        // once the file appears the same entry drains normally
        std::fs::write(&chunk, b"late bytes").unwrap();
        let candidate = queue.get(Some(&last)).unwrap().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&candidate.record.cipher.data)
            .unwrap();
        assert_eq!(decoded, b"late bytes");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_genesis_pinned() {
        let (_dir, queue) = queue();
        queue.add(360, "{\"supply\":1000}".to_string()).unwrap();
        let candidate = queue.get(None).unwrap().unwrap();
        assert_eq!(candidate.record.header.row_no, 1);
        assert_eq!(candidate.record.header.uid, GENESIS_UID);
        assert!(candidate.record.prev.is_empty());
        assert!(candidate.record.header.prev_list.is_empty());
    }

    #[test]
    fn test_linkage_from_last_block() {
        let (_dir, queue) = queue();
        queue.add(100, "payload".to_string()).unwrap();
        let last = last_block();
        let candidate = queue.get(Some(&last)).unwrap().unwrap();
        assert_eq!(candidate.record.header.row_no, 2);
        assert_eq!(candidate.record.prev, last.prev_link());
        assert_eq!(candidate.record.header.prev_list[&360], last.prev_link());
    }

    #[test]
    fn test_missing_last_is_error() {
        let (_dir, queue) = queue();
        queue.add(100, "payload".to_string()).unwrap();
        assert!(matches!(queue.get(None), Err(QueueError::MissingLast)));
    }

    #[test]
    fn test_restore_reloads_pool() {
        let (_dir, queue) = queue();
        queue.add(100, "a".to_string()).unwrap();
        let key = queue.add(100, "b".to_string()).unwrap();
        queue.add_to_chain(&[key]).unwrap();

        assert_eq!(queue.restore().unwrap(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_empty_queue_yields_nothing() {
        let (_dir, queue) = queue();
        assert!(queue.get(Some(&last_block())).unwrap().is_none());
    }
}
