//! The persistent block chain: append, lookup, iterate, mine.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rocksdb::{WriteBatch, DB};
use tracing::{debug, info};

use lode_core::crypto::{self, KeyPair};
use lode_core::error::{ChainError, LodeError, TransactionError};
use lode_core::types::{Block, Hash256, Transaction, TxOutput};

use crate::store::{self, storage_err, TIP_KEY};

/// Handle to the persisted chain, tracking the best tip in memory.
///
/// All operations take `&self`; concurrent readers share the RocksDB
/// handle and writers serialize through atomic [`WriteBatch`] commits.
#[derive(Debug)]
pub struct Chain {
    db: Arc<DB>,
    tip: RwLock<Hash256>,
}

impl Chain {
    /// Create a fresh chain at `dir`, mining the genesis block from a
    /// coinbase paying `address`.
    ///
    /// Fails with [`ChainError::AlreadyExists`] when a database is already
    /// present at the path.
    pub fn create(dir: impl AsRef<Path>, address: &str) -> Result<Self, LodeError> {
        let dir = dir.as_ref();
        if store::db_exists(dir) {
            return Err(ChainError::AlreadyExists.into());
        }
        let db = store::open_db(dir)?;

        let coinbase = Transaction::coinbase(address, Vec::new())?;
        let genesis = Block::genesis(coinbase)?;

        let mut batch = WriteBatch::default();
        batch.put(genesis.hash.as_bytes(), genesis.encode()?);
        batch.put(TIP_KEY, genesis.hash.as_bytes());
        db.write(batch).map_err(storage_err)?;

        info!(hash = %genesis.hash, "chain created with genesis block");
        Ok(Self { db: Arc::new(db), tip: RwLock::new(genesis.hash) })
    }

    /// Open an existing chain at `dir`.
    ///
    /// Fails with [`ChainError::NotInitialized`] when no best-tip pointer
    /// has ever been committed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, LodeError> {
        let dir = dir.as_ref();
        if !store::db_exists(dir) {
            return Err(ChainError::NotInitialized.into());
        }
        let db = store::open_db(dir)?;

        let tip_bytes = db
            .get(TIP_KEY)
            .map_err(storage_err)?
            .ok_or(ChainError::NotInitialized)?;
        let tip = Hash256::from_slice(&tip_bytes)?;

        debug!(tip = %tip, "chain opened");
        Ok(Self { db: Arc::new(db), tip: RwLock::new(tip) })
    }

    /// Shared handle to the underlying store, for the UTXO index.
    pub fn db(&self) -> Arc<DB> {
        self.db.clone()
    }

    /// Hash of the current best tip.
    pub fn tip(&self) -> Hash256 {
        *self.tip.read()
    }

    /// The block the best-tip pointer designates, if any.
    fn best_block(&self) -> Result<Option<Block>, LodeError> {
        match self.db.get(TIP_KEY).map_err(storage_err)? {
            Some(tip_bytes) => {
                let tip = Hash256::from_slice(&tip_bytes)?;
                Ok(Some(self.get_block(&tip)?))
            }
            None => Ok(None),
        }
    }

    /// Store a block received from a peer.
    ///
    /// A block already present is a no-op. The best-tip pointer advances
    /// only when the new height is strictly greater, so a block at an
    /// already-occupied height is stored without displacing the tip.
    pub fn add_block(&self, block: &Block) -> Result<(), LodeError> {
        if self.db.get(block.hash.as_bytes()).map_err(storage_err)?.is_some() {
            debug!(hash = %block.hash, "block already stored");
            return Ok(());
        }

        let mut batch = WriteBatch::default();
        batch.put(block.hash.as_bytes(), block.encode()?);

        let becomes_tip = match self.best_block()? {
            Some(best) => block.height > best.height,
            None => true,
        };
        if becomes_tip {
            batch.put(TIP_KEY, block.hash.as_bytes());
        }
        self.db.write(batch).map_err(storage_err)?;

        if becomes_tip {
            *self.tip.write() = block.hash;
            info!(hash = %block.hash, height = block.height, "new best tip");
        } else {
            debug!(hash = %block.hash, height = block.height, "stored non-tip block");
        }
        Ok(())
    }

    /// Fetch a block by hash; absence is a typed error.
    pub fn get_block(&self, hash: &Hash256) -> Result<Block, LodeError> {
        let bytes = self
            .db
            .get(hash.as_bytes())
            .map_err(storage_err)?
            .ok_or_else(|| ChainError::BlockNotFound(hash.to_string()))?;
        Ok(Block::decode(&bytes)?)
    }

    /// Height of the best tip, or 0 when the pointer is absent.
    pub fn get_best_height(&self) -> Result<i64, LodeError> {
        Ok(self.best_block()?.map(|b| b.height).unwrap_or(0))
    }

    /// All block hashes from the tip back to genesis, newest first.
    pub fn get_block_hashes(&self) -> Result<Vec<Hash256>, LodeError> {
        let mut hashes = Vec::new();
        let mut iter = self.iterator();
        while let Some(block) = iter.next_block()? {
            hashes.push(block.hash);
        }
        Ok(hashes)
    }

    /// Cursor over the chain from the best tip back to genesis.
    pub fn iterator(&self) -> ChainIterator {
        ChainIterator { db: self.db.clone(), current: self.tip() }
    }

    /// Verify, assemble, and proof-of-work a new block on top of the tip.
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block, LodeError> {
        for tx in &transactions {
            if !self.verify_transaction(tx)? {
                return Err(
                    TransactionError::Invalid(hex::encode(tx.id.as_bytes())).into()
                );
            }
        }

        let best = self.best_block()?.ok_or(ChainError::NotInitialized)?;
        let block = Block::new(transactions, best.hash, best.height + 1)?;

        let mut batch = WriteBatch::default();
        batch.put(block.hash.as_bytes(), block.encode()?);
        batch.put(TIP_KEY, block.hash.as_bytes());
        self.db.write(batch).map_err(storage_err)?;
        *self.tip.write() = block.hash;

        info!(hash = %block.hash, height = block.height, txs = block.transactions.len(), "mined block");
        Ok(block)
    }

    /// Scan the chain from the tip for a transaction by id.
    pub fn find_transaction(&self, id: &Hash256) -> Result<Transaction, LodeError> {
        let mut iter = self.iterator();
        while let Some(block) = iter.next_block()? {
            for tx in block.transactions {
                if tx.id == *id {
                    return Ok(tx);
                }
            }
        }
        Err(TransactionError::NotFound(hex::encode(id.as_bytes())).into())
    }

    /// Look up every transaction referenced by `tx`'s inputs.
    fn prev_transactions(
        &self,
        tx: &Transaction,
    ) -> Result<HashMap<String, Transaction>, LodeError> {
        let mut prev_txs = HashMap::new();
        for input in &tx.inputs {
            let prev = self.find_transaction(&input.prev_txid)?;
            prev_txs.insert(hex::encode(prev.id.as_bytes()), prev);
        }
        Ok(prev_txs)
    }

    /// Sign every input of `tx` against the chain's prev-tx lookups.
    pub fn sign_transaction(
        &self,
        tx: &mut Transaction,
        keypair: &KeyPair,
    ) -> Result<(), LodeError> {
        let prev_txs = self.prev_transactions(tx)?;
        crypto::sign_transaction(tx, keypair, &prev_txs)?;
        Ok(())
    }

    /// Verify `tx` against the chain. Coinbase passes trivially; an input
    /// referencing a transaction absent from the chain makes `tx` invalid.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool, LodeError> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        match self.prev_transactions(tx) {
            Ok(prev_txs) => Ok(crypto::verify_transaction(tx, &prev_txs)?),
            Err(LodeError::Transaction(TransactionError::NotFound(_))) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Cursor walking the chain backwards by following `prev_hash` links.
pub struct ChainIterator {
    db: Arc<DB>,
    current: Hash256,
}

impl ChainIterator {
    /// The next (older) block, or `None` past genesis.
    pub fn next_block(&mut self) -> Result<Option<Block>, LodeError> {
        if self.current.is_zero() {
            return Ok(None);
        }
        let bytes = self
            .db
            .get(self.current.as_bytes())
            .map_err(storage_err)?
            .ok_or_else(|| ChainError::BlockNotFound(self.current.to_string()))?;
        let block = Block::decode(&bytes)?;
        self.current = block.prev_hash;
        Ok(Some(block))
    }
}

/// Authoritative UTXO rebuild: walk the whole chain and collect, per
/// transaction, the outputs no later transaction spends.
///
/// Output order within a transaction is preserved because outputs are addressed
/// by their position in the surviving list.
pub fn find_utxo(chain: &Chain) -> Result<HashMap<String, Vec<TxOutput>>, LodeError> {
    let mut unspent: HashMap<String, Vec<TxOutput>> = HashMap::new();
    let mut spent: HashMap<String, Vec<i64>> = HashMap::new();

    let mut iter = chain.iterator();
    while let Some(block) = iter.next_block()? {
        for tx in &block.transactions {
            let txid = hex::encode(tx.id.as_bytes());
            for (index, out) in tx.outputs.iter().enumerate() {
                let is_spent = spent
                    .get(&txid)
                    .is_some_and(|indexes| indexes.contains(&(index as i64)));
                if !is_spent {
                    unspent.entry(txid.clone()).or_default().push(out.clone());
                }
            }
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    spent
                        .entry(hex::encode(input.prev_txid.as_bytes()))
                        .or_default()
                        .push(input.out_index);
                }
            }
        }
    }
    Ok(unspent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_core::address;
    use lode_core::constants::SUBSIDY;
    use lode_core::pow::ProofOfWork;

    fn test_address() -> String {
        let kp = KeyPair::generate();
        address::encode_address(&address::hash160(&kp.public_key().to_raw_bytes()))
    }

    fn temp_chain() -> (Chain, tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let addr = test_address();
        let chain = Chain::create(dir.path().join("blocks"), &addr).unwrap();
        (chain, dir, addr)
    }

    fn coinbase_block(height: i64, prev: Hash256) -> Block {
        let cb = Transaction::coinbase(&test_address(), Vec::new()).unwrap();
        Block::new(vec![cb], prev, height).unwrap()
    }

    // --- Creation / opening ---

    #[test]
    fn create_mines_genesis() {
        let (chain, _dir, addr) = temp_chain();
        assert_eq!(chain.get_best_height().unwrap(), 0);

        let hashes = chain.get_block_hashes().unwrap();
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0], chain.tip());

        let genesis = chain.get_block(&chain.tip()).unwrap();
        assert!(genesis.prev_hash.is_zero());
        assert!(ProofOfWork::new(&genesis).validate().unwrap());

        let coinbase = &genesis.transactions[0];
        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.outputs[0].value, SUBSIDY);
        assert_eq!(
            coinbase.outputs[0].pubkey_hash,
            address::decode_address(&addr).unwrap()
        );
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks");
        let addr = test_address();
        let chain = Chain::create(&path, &addr).unwrap();
        drop(chain);
        let err = Chain::create(&path, &addr).unwrap_err();
        assert!(matches!(err, LodeError::Chain(ChainError::AlreadyExists)));
    }

    #[test]
    fn open_uninitialized_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Chain::open(dir.path().join("blocks")).unwrap_err();
        assert!(matches!(err, LodeError::Chain(ChainError::NotInitialized)));
    }

    #[test]
    fn reopen_preserves_tip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks");
        let tip = {
            let chain = Chain::create(&path, &test_address()).unwrap();
            let block = coinbase_block(1, chain.tip());
            chain.add_block(&block).unwrap();
            chain.tip()
        };
        let chain = Chain::open(&path).unwrap();
        assert_eq!(chain.tip(), tip);
        assert_eq!(chain.get_best_height().unwrap(), 1);
    }

    // --- add_block ---

    #[test]
    fn add_block_is_idempotent() {
        let (chain, _dir, _) = temp_chain();
        let block = coinbase_block(1, chain.tip());

        chain.add_block(&block).unwrap();
        chain.add_block(&block).unwrap();

        assert_eq!(chain.get_block_hashes().unwrap().len(), 2);
        assert_eq!(chain.get_best_height().unwrap(), 1);
    }

    #[test]
    fn equal_height_does_not_displace_tip() {
        let (chain, _dir, _) = temp_chain();
        let genesis_hash = chain.tip();

        let first = coinbase_block(1, genesis_hash);
        chain.add_block(&first).unwrap();
        assert_eq!(chain.tip(), first.hash);

        let rival = coinbase_block(1, genesis_hash);
        chain.add_block(&rival).unwrap();
        assert_eq!(chain.tip(), first.hash);
        // The rival is stored, just not the tip.
        assert_eq!(chain.get_block(&rival.hash).unwrap(), rival);
    }

    #[test]
    fn best_height_never_decreases() {
        let (chain, _dir, _) = temp_chain();
        let mut observed = vec![chain.get_best_height().unwrap()];

        let b1 = coinbase_block(1, chain.tip());
        chain.add_block(&b1).unwrap();
        observed.push(chain.get_best_height().unwrap());

        let rival = coinbase_block(1, b1.prev_hash);
        chain.add_block(&rival).unwrap();
        observed.push(chain.get_best_height().unwrap());

        let b2 = coinbase_block(2, chain.tip());
        chain.add_block(&b2).unwrap();
        observed.push(chain.get_best_height().unwrap());

        assert!(observed.windows(2).all(|w| w[0] <= w[1]), "{observed:?}");
        assert_eq!(*observed.last().unwrap(), 2);
    }

    // --- mine_block ---

    #[test]
    fn mine_block_extends_tip() {
        let (chain, _dir, _) = temp_chain();
        let cb = Transaction::coinbase(&test_address(), Vec::new()).unwrap();
        let block = chain.mine_block(vec![cb]).unwrap();

        assert_eq!(block.height, 1);
        assert_eq!(chain.tip(), block.hash);
        assert!(ProofOfWork::new(&block).validate().unwrap());
    }

    #[test]
    fn mine_block_rejects_unknown_inputs() {
        let (chain, _dir, _) = temp_chain();
        let mut tx = Transaction {
            timestamp: 1_700_000_000,
            id: Hash256::ZERO,
            inputs: vec![lode_core::types::TxInput {
                prev_txid: Hash256([0xAA; 32]),
                out_index: 0,
                signature: vec![0; 64],
                pubkey: vec![0; 64],
            }],
            outputs: vec![TxOutput { value: 1, pubkey_hash: vec![0; 20] }],
        };
        tx.id = tx.hash().unwrap();

        let err = chain.mine_block(vec![tx]).unwrap_err();
        assert!(matches!(
            err,
            LodeError::Transaction(TransactionError::Invalid(_))
        ));
    }

    // --- Lookup / iteration ---

    #[test]
    fn get_block_not_found() {
        let (chain, _dir, _) = temp_chain();
        let err = chain.get_block(&Hash256([0x99; 32])).unwrap_err();
        assert!(matches!(err, LodeError::Chain(ChainError::BlockNotFound(_))));
    }

    #[test]
    fn find_transaction_locates_coinbase() {
        let (chain, _dir, _) = temp_chain();
        let genesis = chain.get_block(&chain.tip()).unwrap();
        let id = genesis.transactions[0].id;
        assert_eq!(chain.find_transaction(&id).unwrap().id, id);
    }

    #[test]
    fn find_transaction_not_found() {
        let (chain, _dir, _) = temp_chain();
        let err = chain.find_transaction(&Hash256([0x42; 32])).unwrap_err();
        assert!(matches!(
            err,
            LodeError::Transaction(TransactionError::NotFound(_))
        ));
    }

    #[test]
    fn iterator_walks_newest_first() {
        let (chain, _dir, _) = temp_chain();
        let genesis_hash = chain.tip();
        let b1 = coinbase_block(1, genesis_hash);
        chain.add_block(&b1).unwrap();
        let b2 = coinbase_block(2, b1.hash);
        chain.add_block(&b2).unwrap();

        let hashes = chain.get_block_hashes().unwrap();
        assert_eq!(hashes, vec![b2.hash, b1.hash, genesis_hash]);

        let mut heights = Vec::new();
        let mut iter = chain.iterator();
        while let Some(block) = iter.next_block().unwrap() {
            heights.push(block.height);
        }
        assert_eq!(heights, vec![2, 1, 0]);
    }

    #[test]
    fn verify_coinbase_passes() {
        let (chain, _dir, _) = temp_chain();
        let cb = Transaction::coinbase(&test_address(), Vec::new()).unwrap();
        assert!(chain.verify_transaction(&cb).unwrap());
    }

    #[test]
    fn verify_unknown_prev_is_invalid() {
        let (chain, _dir, _) = temp_chain();
        let mut tx = Transaction {
            timestamp: 1_700_000_000,
            id: Hash256::ZERO,
            inputs: vec![lode_core::types::TxInput {
                prev_txid: Hash256([0xBB; 32]),
                out_index: 0,
                signature: vec![],
                pubkey: vec![],
            }],
            outputs: vec![],
        };
        tx.id = tx.hash().unwrap();
        assert!(!chain.verify_transaction(&tx).unwrap());
    }

    // --- find_utxo ---

    #[test]
    fn find_utxo_covers_all_coinbases() {
        let (chain, _dir, _) = temp_chain();
        let b1 = coinbase_block(1, chain.tip());
        chain.add_block(&b1).unwrap();

        let utxo = find_utxo(&chain).unwrap();
        assert_eq!(utxo.len(), 2);
        let total: u64 = utxo.values().flatten().map(|o| o.value).sum();
        assert_eq!(total, 2 * SUBSIDY);
    }
}
