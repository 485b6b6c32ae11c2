//! Core protocol types: transactions, blocks, and the hashes that link them.
//!
//! All structures use bincode with the standard config as THE canonical
//! encoding; the same bytes feed transaction ids, signing preimages,
//! disk storage, and the wire. The "empty hash" of the protocol (genesis
//! `prev_hash`, cleared transaction id, iterator sentinel) is represented
//! as the all-zero [`Hash256`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::address;
use crate::constants::{COINBASE_DATA_LENGTH, SUBSIDY};
use crate::error::{AddressError, BlockError, LodeError, TransactionError};
use crate::pow::ProofOfWork;

/// A 32-byte SHA-256 hash value.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Marks coinbase inputs, the genesis parent, and a
    /// transaction id that has been cleared for hashing.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a Hash256 from a byte slice; errors unless exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TransactionError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TransactionError::Serialization(format!("bad hash length {}", bytes.len())))?;
        Ok(Self(arr))
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Single SHA-256 over arbitrary bytes.
pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256(Sha256::digest(data).into())
}

/// A transaction input, spending one output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// Id of the transaction containing the referenced output.
    /// [`Hash256::ZERO`] for coinbase inputs.
    pub prev_txid: Hash256,
    /// Index of the referenced output. `-1` for coinbase inputs.
    pub out_index: i64,
    /// Fixed-width ECDSA signature (`r ‖ s`, 32 bytes each). Empty until signed.
    pub signature: Vec<u8>,
    /// Raw P-256 public key (`x ‖ y`, 32 bytes each). For coinbase inputs
    /// this field carries arbitrary coinbase data instead.
    pub pubkey: Vec<u8>,
}

impl TxInput {
    /// Whether this input was created by the holder of `pubkey_hash`.
    pub fn uses_key(&self, pubkey_hash: &[u8]) -> bool {
        address::hash160(&self.pubkey) == pubkey_hash
    }
}

/// A transaction output, locking `value` to a public key hash.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Amount carried by this output.
    pub value: u64,
    /// 20-byte hash160 of the recipient's public key.
    pub pubkey_hash: Vec<u8>,
}

impl TxOutput {
    /// Create an output locked to the given address.
    pub fn new(value: u64, address: &str) -> Result<Self, AddressError> {
        let mut out = Self { value, pubkey_hash: Vec::new() };
        out.lock(address)?;
        Ok(out)
    }

    /// Lock this output to an address by storing its decoded pubkey hash.
    pub fn lock(&mut self, address: &str) -> Result<(), AddressError> {
        self.pubkey_hash = address::decode_address(address)?;
        Ok(())
    }

    /// Whether this output is spendable by the holder of `pubkey_hash`.
    pub fn is_locked_with(&self, pubkey_hash: &[u8]) -> bool {
        self.pubkey_hash == pubkey_hash
    }
}

/// A transaction transferring value between addresses.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Unix timestamp at creation.
    pub timestamp: i64,
    /// SHA-256 of the canonical encoding with this field cleared.
    pub id: Hash256,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Build the coinbase transaction paying the block subsidy to `to`.
    ///
    /// Empty `data` is replaced by [`COINBASE_DATA_LENGTH`] random bytes;
    /// either way the data ends up in the synthetic input's `pubkey` field.
    pub fn coinbase(to: &str, data: Vec<u8>) -> Result<Self, LodeError> {
        let data = if data.is_empty() {
            let mut buf = vec![0u8; COINBASE_DATA_LENGTH];
            rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut buf);
            buf
        } else {
            data
        };

        let input = TxInput {
            prev_txid: Hash256::ZERO,
            out_index: -1,
            signature: Vec::new(),
            pubkey: data,
        };
        let output = TxOutput::new(SUBSIDY, to)?;

        let mut tx = Self {
            timestamp: chrono::Utc::now().timestamp(),
            id: Hash256::ZERO,
            inputs: vec![input],
            outputs: vec![output],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Compute the transaction id: SHA-256 of the encoding with `id` cleared.
    pub fn hash(&self) -> Result<Hash256, TransactionError> {
        let mut copy = self.clone();
        copy.id = Hash256::ZERO;
        Ok(sha256(&copy.encode()?))
    }

    /// Canonical bincode encoding of this transaction.
    pub fn encode(&self) -> Result<Vec<u8>, TransactionError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }

    /// Decode a transaction from its canonical encoding.
    pub fn decode(data: &[u8]) -> Result<Self, TransactionError> {
        let (tx, _) = bincode::decode_from_slice(data, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))?;
        Ok(tx)
    }

    /// A coinbase transaction has exactly one input with a zero previous
    /// txid and output index `-1`.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prev_txid.is_zero()
            && self.inputs[0].out_index == -1
    }
}

/// A block of the append-only ledger.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Unix timestamp at creation.
    pub timestamp: i64,
    /// Proof-of-work digest, computed by the nonce search.
    pub hash: Hash256,
    /// Ordered transactions; never empty.
    pub transactions: Vec<Transaction>,
    /// Hash of the parent block; [`Hash256::ZERO`] for genesis.
    pub prev_hash: Hash256,
    /// Nonce satisfying the proof-of-work target.
    pub nonce: i64,
    /// Distance from genesis.
    pub height: i64,
}

impl Block {
    /// Assemble a block at the given height and run the proof-of-work search.
    pub fn new(
        transactions: Vec<Transaction>,
        prev_hash: Hash256,
        height: i64,
    ) -> Result<Self, BlockError> {
        let mut block = Self {
            timestamp: chrono::Utc::now().timestamp(),
            hash: Hash256::ZERO,
            transactions,
            prev_hash,
            nonce: 0,
            height,
        };
        let (nonce, hash) = ProofOfWork::new(&block).run()?;
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// The genesis block: a lone coinbase at height 0 with no parent.
    pub fn genesis(coinbase: Transaction) -> Result<Self, BlockError> {
        Self::new(vec![coinbase], Hash256::ZERO, 0)
    }

    /// Merkle root over the encoded transactions.
    pub fn hash_transactions(&self) -> Result<Hash256, BlockError> {
        let leaves = self
            .transactions
            .iter()
            .map(|tx| tx.encode())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BlockError::Serialization(e.to_string()))?;
        Ok(crate::merkle::merkle_root(&leaves))
    }

    /// Canonical bincode encoding, stable across runs of the same version.
    pub fn encode(&self) -> Result<Vec<u8>, BlockError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| BlockError::Serialization(e.to_string()))
    }

    /// Decode a block from its canonical encoding.
    pub fn decode(data: &[u8]) -> Result<Self, BlockError> {
        let (block, _) = bincode::decode_from_slice(data, bincode::config::standard())
            .map_err(|e| BlockError::Serialization(e.to_string()))?;
        Ok(block)
    }
}
