//! Shared chain registries
//!
//! The chain index and the active genesis configuration are owned
//! explicitly and passed to the components that need them - never
//! ambient singletons. Both are append/set-once: the first writer wins.

use std::collections::BTreeMap;
use std::sync::RwLock;

/// Process-wide rowNo -> uID mapping
///
/// Populated only after a full integrity pass succeeds.
#[derive(Debug, Default)]
pub struct ChainIndex {
    rows: RwLock<BTreeMap<i64, String>>,
}

impl ChainIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a row; returns false when the row was already claimed
    pub fn register(&self, row_no: i64, uid: &str) -> bool {
        let mut rows = self.rows.write().expect("chain index poisoned");
        if rows.contains_key(&row_no) {
            return false;
        }
        rows.insert(row_no, uid.to_string());
        true
    }

    /// Look up the uID registered for a row
    pub fn uid_for(&self, row_no: i64) -> Option<String> {
        self.rows.read().expect("chain index poisoned").get(&row_no).cloned()
    }

    /// Highest registered row, 0 when empty
    pub fn top_row(&self) -> i64 {
        self.rows
            .read()
            .expect("chain index poisoned")
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.rows.read().expect("chain index poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all registered rows in ascending order
    pub fn snapshot(&self) -> Vec<(i64, String)> {
        self.rows
            .read()
            .expect("chain index poisoned")
            .iter()
            .map(|(r, u)| (*r, u.clone()))
            .collect()
    }
}

/// Set-once cache of the decoded row-1 genesis configuration
#[derive(Debug, Default)]
pub struct ActiveGenesis {
    config: RwLock<Option<serde_json::Value>>,
}

impl ActiveGenesis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the configuration; returns false when already set
    pub fn set(&self, config: serde_json::Value) -> bool {
        let mut slot = self.config.write().expect("genesis cache poisoned");
        if slot.is_some() {
            return false;
        }
        *slot = Some(config);
        true
    }

    pub fn get(&self) -> Option<serde_json::Value> {
        self.config.read().expect("genesis cache poisoned").clone()
    }

    pub fn is_set(&self) -> bool {
        self.config.read().expect("genesis cache poisoned").is_some()
    }
}
