//! In-memory pool of pending transactions, keyed by hex transaction id.
//!
//! Insertion happens when a `tx` message arrives; the pool is cleared
//! wholesale after a successful mine. There is no eviction, TTL, or size
//! cap. Not thread-safe on its own; the node wraps it in a mutex.

use std::collections::HashMap;

use crate::types::Transaction;

/// Pending transactions awaiting inclusion in a block.
#[derive(Debug, Default)]
pub struct Mempool {
    entries: HashMap<String, Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction, returning its hex id. Re-inserting the same
    /// transaction is a no-op overwrite.
    pub fn insert(&mut self, tx: Transaction) -> String {
        let txid = hex::encode(tx.id.as_bytes());
        self.entries.insert(txid.clone(), tx);
        txid
    }

    pub fn get(&self, txid: &str) -> Option<&Transaction> {
        self.entries.get(txid)
    }

    pub fn contains(&self, txid: &str) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn remove(&mut self, txid: &str) -> Option<Transaction> {
        self.entries.remove(txid)
    }

    /// Snapshot of all pending transactions.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.entries.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
