//! Derived index of unspent transaction outputs.
//!
//! Each entry maps `utxo-<txid>` to the encoded list of that transaction's
//! outputs not yet spent. An entry whose last output is spent is deleted,
//! never stored empty. The index holds only a store handle; full rebuilds
//! take the result of [`find_utxo`](crate::chain::find_utxo) from the
//! caller.

use std::collections::HashMap;
use std::sync::Arc;

use rocksdb::{Direction, IteratorMode, WriteBatch, DB};
use tracing::{debug, info};

use lode_core::error::{ChainError, LodeError, TransactionError};
use lode_core::types::{Block, TxOutput};

use crate::store::{storage_err, UTXO_PREFIX};

/// Keys deleted per write batch during a prefix purge.
const DELETE_BATCH_SIZE: usize = 100_000;

/// The UTXO index over a shared store handle.
pub struct UtxoSet {
    db: Arc<DB>,
}

impl UtxoSet {
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }

    fn key(txid: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(UTXO_PREFIX.len() + txid.len());
        key.extend_from_slice(UTXO_PREFIX);
        key.extend_from_slice(txid);
        key
    }

    fn encode_outputs(outputs: &[TxOutput]) -> Result<Vec<u8>, LodeError> {
        bincode::encode_to_vec(outputs, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()).into())
    }

    fn decode_outputs(bytes: &[u8]) -> Result<Vec<TxOutput>, LodeError> {
        let (outputs, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| LodeError::from(TransactionError::Serialization(e.to_string())))?;
        Ok(outputs)
    }

    /// Replace the whole index with a fresh chain scan result.
    ///
    /// Existing `utxo-` keys are purged in batches of [`DELETE_BATCH_SIZE`]
    /// to bound write-batch size, then every scanned entry is written.
    pub fn reindex(&self, utxos: HashMap<String, Vec<TxOutput>>) -> Result<(), LodeError> {
        self.delete_by_prefix(UTXO_PREFIX)?;

        let mut batch = WriteBatch::default();
        let count = utxos.len();
        for (txid_hex, outputs) in &utxos {
            let txid = hex::decode(txid_hex)
                .map_err(|e| TransactionError::Serialization(e.to_string()))?;
            batch.put(Self::key(&txid), Self::encode_outputs(outputs)?);
        }
        self.db.write(batch).map_err(storage_err)?;

        info!(entries = count, "utxo index rebuilt");
        Ok(())
    }

    fn delete_by_prefix(&self, prefix: &[u8]) -> Result<(), LodeError> {
        let mut batch = WriteBatch::default();
        let mut pending = 0usize;

        let iter = self.db.iterator(IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item.map_err(storage_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            batch.delete(&key);
            pending += 1;
            if pending == DELETE_BATCH_SIZE {
                self.db.write(std::mem::take(&mut batch)).map_err(storage_err)?;
                pending = 0;
            }
        }
        if pending > 0 {
            self.db.write(batch).map_err(storage_err)?;
        }
        Ok(())
    }

    /// Apply one block's spends and new outputs in a single atomic batch.
    ///
    /// Mutations are staged in memory first so that transactions within the
    /// block observe each other's effects, then committed together.
    pub fn update(&self, block: &Block) -> Result<(), LodeError> {
        let mut staged: HashMap<Vec<u8>, Vec<TxOutput>> = HashMap::new();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let key = Self::key(input.prev_txid.as_bytes());
                    let outputs = match staged.get(&key) {
                        Some(outputs) => outputs.clone(),
                        None => {
                            let bytes = self
                                .db
                                .get(&key)
                                .map_err(storage_err)?
                                .ok_or_else(|| {
                                    ChainError::UtxoEntryMissing(hex::encode(
                                        input.prev_txid.as_bytes(),
                                    ))
                                })?;
                            Self::decode_outputs(&bytes)?
                        }
                    };
                    let surviving: Vec<TxOutput> = outputs
                        .into_iter()
                        .enumerate()
                        .filter(|(index, _)| *index as i64 != input.out_index)
                        .map(|(_, out)| out)
                        .collect();
                    staged.insert(key, surviving);
                }
            }
            staged.insert(Self::key(tx.id.as_bytes()), tx.outputs.clone());
        }

        let mut batch = WriteBatch::default();
        for (key, outputs) in &staged {
            if outputs.is_empty() {
                batch.delete(key);
            } else {
                batch.put(key, Self::encode_outputs(outputs)?);
            }
        }
        self.db.write(batch).map_err(storage_err)?;

        debug!(height = block.height, "utxo index updated");
        Ok(())
    }

    /// Greedy selection of spendable outputs for `amount`.
    ///
    /// Accumulation stops once the target is reached; iteration order over
    /// the index is arbitrary and no coin-selection optimization is
    /// attempted. Returns the accumulated value and a map of hex txid to
    /// output indexes within the surviving list.
    pub fn find_spendable(
        &self,
        pubkey_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<i64>>), LodeError> {
        let mut accumulated = 0u64;
        let mut spendable: HashMap<String, Vec<i64>> = HashMap::new();

        let iter = self.db.iterator(IteratorMode::From(UTXO_PREFIX, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(storage_err)?;
            if !key.starts_with(UTXO_PREFIX) {
                break;
            }
            let txid_hex = hex::encode(&key[UTXO_PREFIX.len()..]);
            for (index, out) in Self::decode_outputs(&value)?.iter().enumerate() {
                if out.is_locked_with(pubkey_hash) && accumulated < amount {
                    accumulated += out.value;
                    spendable.entry(txid_hex.clone()).or_default().push(index as i64);
                }
            }
        }
        Ok((accumulated, spendable))
    }

    /// Every unspent output locked to `pubkey_hash`.
    pub fn find_unspent_outputs(&self, pubkey_hash: &[u8]) -> Result<Vec<TxOutput>, LodeError> {
        let mut unspent = Vec::new();

        let iter = self.db.iterator(IteratorMode::From(UTXO_PREFIX, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(storage_err)?;
            if !key.starts_with(UTXO_PREFIX) {
                break;
            }
            for out in Self::decode_outputs(&value)? {
                if out.is_locked_with(pubkey_hash) {
                    unspent.push(out);
                }
            }
        }
        Ok(unspent)
    }

    /// Number of transactions with at least one unspent output.
    pub fn count_transactions(&self) -> Result<usize, LodeError> {
        let mut count = 0;
        let iter = self.db.iterator(IteratorMode::From(UTXO_PREFIX, Direction::Forward));
        for item in iter {
            let (key, _) = item.map_err(storage_err)?;
            if !key.starts_with(UTXO_PREFIX) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }
}
