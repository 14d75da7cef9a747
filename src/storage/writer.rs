//! Write-behind path
//!
//! Pending records wait in the durable pool; a periodic single-flight
//! drain moves one record per tick into its shard archive, deleting it
//! from the pool only after the write lands.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::pool::DurablePool;
use crate::record::BlockRecord;
use crate::storage::{BlockStore, StorageError};

/// Pool retention for records awaiting their archive write
const WRITE_BEHIND_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Asynchronous archive writer
pub struct WriteBehind {
    store: Arc<BlockStore>,
    pool: Arc<dyn DurablePool>,
}

impl WriteBehind {
    pub fn new(store: Arc<BlockStore>, pool: Arc<dyn DurablePool>) -> Self {
        Self { store, pool }
    }

    /// Park a record in the durable pool for a later drain tick
    pub fn enqueue(&self, record: &BlockRecord) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(record)?;
        self.pool.put(&record.header.uid, &bytes, WRITE_BEHIND_TTL)?;
        Ok(())
    }

    /// Number of records still waiting for their archive write
    pub fn backlog(&self) -> usize {
        self.pool.len()
    }

    /// Drain one pending record; returns whether anything was written
    ///
    /// The pool entry is removed only after a successful archive write,
    /// so a crash between the two repeats the write instead of losing
    /// the record. Undecodable entries are dropped - they would wedge
    /// the drain head forever.
    pub async fn drain_one(&self) -> Result<bool, StorageError> {
        let Some((key, bytes)) = self.pool.first()? else {
            return Ok(false);
        };
        let record: BlockRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "dropping undecodable write-behind entry");
                self.pool.remove(&key)?;
                return Ok(false);
            }
        };
        self.store.write(&record).await?;
        self.pool.remove(&key)?;
        tracing::info!(uid = %record.header.uid, row = record.header.row_no, "drained block to archive");
        Ok(true)
    }

    /// Periodic drain task
    ///
    /// Skipped ticks (drain still running) keep the drain single-flight.
    pub fn spawn(
        self: Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.drain_one().await {
                            tracing::warn!(error = %e, "write-behind drain failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident;
    use crate::pool::SledPool;
    use crate::record::TIME_FORMAT;

    fn fixture() -> (tempfile::TempDir, Arc<BlockStore>, Arc<WriteBehind>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BlockStore::open(dir.path().join("block")).unwrap());
        let db = sled::Config::new().path(dir.path().join("pool")).temporary(true).open().unwrap();
        let pool = Arc::new(SledPool::open(&db, "write-behind").unwrap());
        let writer = Arc::new(WriteBehind::new(Arc::clone(&store), pool));
        (dir, store, writer)
    }

    fn record() -> BlockRecord {
        let mut rec = BlockRecord::default();
        let time = chrono::Utc::now();
        rec.header.row_no = 1;
        rec.header.uid = ident::generate(time, "wallet");
        rec.header.time = time.format(TIME_FORMAT).to_string();
        rec
    }

    #[tokio::test]
    async fn test_enqueue_then_drain() {
        let (_dir, store, writer) = fixture();
        let rec = record();
        writer.enqueue(&rec).unwrap();
        assert_eq!(writer.backlog(), 1);

        assert!(writer.drain_one().await.unwrap());
        assert_eq!(writer.backlog(), 0);
        assert_eq!(store.read(&rec.header.uid).unwrap().unwrap(), rec);
    }

    #[tokio::test]
    async fn test_drain_empty_pool_is_noop() {
        let (_dir, _store, writer) = fixture();
        assert!(!writer.drain_one().await.unwrap());
    }

    #[tokio::test]
    async fn test_drain_one_record_per_call() {
        let (_dir, _store, writer) = fixture();
        writer.enqueue(&record()).unwrap();
        writer.enqueue(&record()).unwrap();
        writer.drain_one().await.unwrap();
        assert_eq!(writer.backlog(), 1);
    }
}
