//! Node configuration and the static validator registry
//!
//! The registry is the authoritative list of validator peers per
//! (network, layer). A node configured for an unknown pair must fail
//! fast - integrity refuses to run against an unregistered chain.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Role of this node within its layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// Root/master: may regenerate blocks instead of fetching them
    Root,
    /// Ordinary validator: repairs gaps by fetching from peers
    Validator,
}

/// Node configuration, deserialized by the host process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network name, e.g. "main"
    pub network: String,
    /// Layer number, 1 = root layer
    pub layer: u8,
    pub role: NodeRole,
    /// Standalone nodes skip all peer reconciliation
    pub standalone: bool,
    pub data_dir: PathBuf,
    /// Proposer wallet key used for signing and uID seeding
    pub wallet_key: String,
    /// Extra peer addresses beyond the static registry
    pub peers: Vec<String>,
}

impl NodeConfig {
    /// Directory holding this chain's shard archives
    pub fn block_dir(&self) -> PathBuf {
        self.data_dir
            .join(&self.network)
            .join(format!("layer{}", self.layer))
            .join("block")
    }

    pub fn is_root(&self) -> bool {
        self.role == NodeRole::Root
    }

    /// Registry peers plus configured extras, deduplicated in order
    pub fn all_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = validator_peers(&self.network, self.layer)
            .map(|list| list.iter().map(|p| p.to_string()).collect())
            .unwrap_or_default();
        for extra in &self.peers {
            if !peers.iter().any(|p| p == extra) {
                peers.push(extra.clone());
            }
        }
        peers
    }
}

/// Static validator registry: (network, layer) -> peer addresses
///
/// Returns `None` for unknown pairs; callers treat that as fatal.
pub fn validator_peers(network: &str, layer: u8) -> Option<&'static [&'static str]> {
    match (network, layer) {
        ("main", 1) => Some(&[
            "http://val1.ks-main.net:7240",
            "http://val2.ks-main.net:7240",
            "http://val3.ks-main.net:7240",
        ]),
        ("main", 2) => Some(&[
            "http://relay1.ks-main.net:7241",
            "http://relay2.ks-main.net:7241",
        ]),
        ("test", 1) => Some(&["http://val1.ks-test.net:7240"]),
        ("local", 1) => Some(&[]),
        _ => None,
    }
}
