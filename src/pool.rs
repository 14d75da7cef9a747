//! Durable pending pool
//!
//! Persisted key -> value store with per-entry expiry, backing the
//! assembly queue and the write-behind storage path across restarts.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Pool database error: {0}")]
    Db(#[from] sled::Error),
    #[error("Pool codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Persisted key -> value store with expiry
pub trait DurablePool: Send + Sync {
    fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), PoolError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PoolError>;
    fn remove(&self, key: &str) -> Result<(), PoolError>;
    /// First live entry in key order, if any
    fn first(&self) -> Result<Option<(String, Vec<u8>)>, PoolError>;
    /// All live entries in key order
    fn entries(&self) -> Result<Vec<(String, Vec<u8>)>, PoolError>;
    /// Drop expired entries; returns how many were removed
    fn sweep_expired(&self) -> Result<usize, PoolError>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    expires_at_ms: i64,
    value: Vec<u8>,
}

impl Envelope {
    fn live(&self) -> bool {
        chrono::Utc::now().timestamp_millis() < self.expires_at_ms
    }
}

/// Sled-backed pool; one tree per concern
#[derive(Debug, Clone)]
pub struct SledPool {
    tree: sled::Tree,
}

impl SledPool {
    /// Open a named tree inside the shared node database
    pub fn open(db: &sled::Db, name: &str) -> Result<Self, PoolError> {
        Ok(Self { tree: db.open_tree(name)? })
    }
}

impl DurablePool for SledPool {
    fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), PoolError> {
        let envelope = Envelope {
            expires_at_ms: chrono::Utc::now().timestamp_millis() + ttl.as_millis() as i64,
            value: value.to_vec(),
        };
        self.tree.insert(key, bincode::serialize(&envelope)?)?;
        self.tree.flush()?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PoolError> {
        match self.tree.get(key)? {
            Some(bytes) => {
                let envelope: Envelope = bincode::deserialize(&bytes)?;
                Ok(envelope.live().then_some(envelope.value))
            }
            None => Ok(None),
        }
    }

    fn remove(&self, key: &str) -> Result<(), PoolError> {
        self.tree.remove(key)?;
        self.tree.flush()?;
        Ok(())
    }

    fn first(&self) -> Result<Option<(String, Vec<u8>)>, PoolError> {
        for item in self.tree.iter() {
            let (key, bytes) = item?;
            let envelope: Envelope = bincode::deserialize(&bytes)?;
            if envelope.live() {
                return Ok(Some((String::from_utf8_lossy(&key).into_owned(), envelope.value)));
            }
        }
        Ok(None)
    }

    fn entries(&self) -> Result<Vec<(String, Vec<u8>)>, PoolError> {
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (key, bytes) = item?;
            let envelope: Envelope = bincode::deserialize(&bytes)?;
            if envelope.live() {
                out.push((String::from_utf8_lossy(&key).into_owned(), envelope.value));
            }
        }
        Ok(out)
    }

    fn sweep_expired(&self) -> Result<usize, PoolError> {
        let mut dead = Vec::new();
        for item in self.tree.iter() {
            let (key, bytes) = item?;
            match bincode::deserialize::<Envelope>(&bytes) {
                Ok(envelope) if envelope.live() => {}
                // undecodable entries are swept along with expired ones
                _ => dead.push(key),
            }
        }
        let removed = dead.len();
        for key in dead {
            self.tree.remove(key)?;
        }
        if removed > 0 {
            self.tree.flush()?;
        }
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.tree.len()
    }
}

/// Periodic expiry sweep, cancellable for clean shutdown
pub fn spawn_expiry_sweep(
    pool: Arc<dyn DurablePool>,
    every: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => match pool.sweep_expired() {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(removed = n, "expired pool entries swept"),
                    Err(e) => tracing::warn!(error = %e, "pool sweep failed"),
                },
            }
        }
    })
}
