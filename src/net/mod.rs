//! Peer transport
//!
//! Bounded-timeout HTTP access to validator peers, plus the retry
//! loops the integrity subsystem leans on. Every loop is cancellable
//! so node shutdown is never blocked on an unreachable peer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::constants::{PEER_RETRY_BASE_MS, PEER_RETRY_ESCALATE_AFTER, PEER_RETRY_MAX_MS};
use crate::record::BlockRecord;

/// Network errors
#[derive(Debug, Error)]
pub enum NetError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Peer returned status {0}")]
    Status(u16),
    #[error("Peer response decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("No peers configured")]
    NoPeers,
    #[error("Fetch cancelled")]
    Cancelled,
}

/// Bounded-timeout GET/POST to a peer address
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn get_json(&self, peer: &str, path: &str) -> Result<serde_json::Value, NetError>;
    async fn post_json(
        &self,
        peer: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, NetError>;
}

/// Default transport over reqwest
#[derive(Debug, Clone)]
pub struct HttpPeer {
    client: reqwest::Client,
}

impl HttpPeer {
    pub fn new(timeout: Duration) -> Result<Self, NetError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PeerTransport for HttpPeer {
    async fn get_json(&self, peer: &str, path: &str) -> Result<serde_json::Value, NetError> {
        let response = self.client.get(format!("{peer}{path}")).send().await?;
        if !response.status().is_success() {
            return Err(NetError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    async fn post_json(
        &self,
        peer: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, NetError> {
        let response = self.client.post(format!("{peer}{path}")).json(body).send().await?;
        if !response.status().is_success() {
            return Err(NetError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}

/// Retry delay: base until the failure streak escalates, then max
pub fn backoff_delay(failures: u32) -> Duration {
    if failures >= PEER_RETRY_ESCALATE_AFTER {
        Duration::from_millis(PEER_RETRY_MAX_MS)
    } else {
        Duration::from_millis(PEER_RETRY_BASE_MS)
    }
}

/// Peer fetch helper rotating through the known peer set
#[derive(Clone)]
pub struct PeerFetcher {
    transport: Arc<dyn PeerTransport>,
    peers: Vec<String>,
}

impl PeerFetcher {
    pub fn new(transport: Arc<dyn PeerTransport>, peers: Vec<String>) -> Self {
        Self { transport, peers }
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Single attempt against one peer: `GET /block/{rowNo}/raw`
    pub async fn fetch_row_once(&self, peer: &str, row_no: i64) -> Result<BlockRecord, NetError> {
        let value = self.transport.get_json(peer, &format!("/block/{row_no}/raw")).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Single attempt against one peer: `GET /block/last/raw`
    pub async fn fetch_last_once(&self, peer: &str) -> Result<BlockRecord, NetError> {
        let value = self.transport.get_json(peer, "/block/last/raw").await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Single attempt against one peer: `GET /block/hash/{rowNo}`
    pub async fn fetch_hash_once(&self, peer: &str, row_no: i64) -> Result<String, NetError> {
        let value = self.transport.get_json(peer, &format!("/block/hash/{row_no}")).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Single attempt against one peer: `GET /block/{uid}`
    pub async fn fetch_by_uid_once(&self, peer: &str, uid: &str) -> Result<BlockRecord, NetError> {
        let value = self.transport.get_json(peer, &format!("/block/{uid}")).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fetch a row from any peer, retrying with backoff until it
    /// arrives or the token cancels
    pub async fn fetch_row(
        &self,
        row_no: i64,
        cancel: &CancellationToken,
    ) -> Result<BlockRecord, NetError> {
        self.retry_loop(cancel, |peer| {
            let fetcher = self.clone();
            let peer = peer.to_string();
            async move { fetcher.fetch_row_once(&peer, row_no).await }
        })
        .await
    }

    /// Fetch the last block from any peer, retrying with backoff
    pub async fn fetch_last(&self, cancel: &CancellationToken) -> Result<BlockRecord, NetError> {
        self.retry_loop(cancel, |peer| {
            let fetcher = self.clone();
            let peer = peer.to_string();
            async move { fetcher.fetch_last_once(&peer).await }
        })
        .await
    }

    async fn retry_loop<F, Fut>(
        &self,
        cancel: &CancellationToken,
        attempt: F,
    ) -> Result<BlockRecord, NetError>
    where
        F: Fn(&str) -> Fut,
        Fut: std::future::Future<Output = Result<BlockRecord, NetError>>,
    {
        if self.peers.is_empty() {
            return Err(NetError::NoPeers);
        }
        let mut failures: u32 = 0;
        loop {
            let peer = &self.peers[failures as usize % self.peers.len()];
            match attempt(peer).await {
                Ok(record) => return Ok(record),
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::warn!(peer = %peer, failures, error = %e, "peer fetch failed, retrying");
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(NetError::Cancelled),
                _ = tokio::time::sleep(backoff_delay(failures)) => {}
            }
        }
    }
}
