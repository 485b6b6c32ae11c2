//! Known-peer registry with newline-delimited file persistence.
//!
//! The in-memory list is kept behind a mutex by the node; persistence
//! works on snapshots so the lock is never held across file I/O.

use std::fs;
use std::path::Path;

use lode_core::error::NetworkError;

/// Ordered, de-duplicated list of peer addresses (`host:port`).
///
/// Index 0 is the bootstrap node.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KnownPeers {
    peers: Vec<String>,
}

impl KnownPeers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an address if absent. Returns whether it was added.
    pub fn add(&mut self, addr: impl Into<String>) -> bool {
        let addr = addr.into();
        if self.peers.contains(&addr) {
            return false;
        }
        self.peers.push(addr);
        true
    }

    /// Merge a batch of addresses, keeping first-seen order.
    pub fn extend(&mut self, addrs: impl IntoIterator<Item = String>) {
        for addr in addrs {
            self.add(addr);
        }
    }

    /// Remove an address after a failed dial.
    pub fn remove(&mut self, addr: &str) {
        self.peers.retain(|peer| peer != addr);
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.peers.iter().any(|peer| peer == addr)
    }

    /// The bootstrap address, when the list is non-empty.
    pub fn first(&self) -> Option<String> {
        self.peers.first().cloned()
    }

    /// Snapshot of all addresses.
    pub fn all(&self) -> Vec<String> {
        self.peers.clone()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Load the peer list from a newline-delimited file.
///
/// A missing file yields an empty list.
pub fn load_peers(path: &Path) -> Result<Vec<String>, NetworkError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path).map_err(|e| NetworkError::Io(e.to_string()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Persist a peer-list snapshot, newline-delimited.
pub fn save_peers(path: &Path, peers: &[String]) -> Result<(), NetworkError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| NetworkError::Io(e.to_string()))?;
    }
    fs::write(path, peers.join("\n")).map_err(|e| NetworkError::Io(e.to_string()))
}
