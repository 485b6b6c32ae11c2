//! Proof-of-work nonce search and validation.
//!
//! The target is `2^(256 - difficulty)`; a digest satisfies it exactly when
//! its leading `difficulty` bits are zero. The preimage at nonce `n` is
//! `prev_hash ‖ merkle_root ‖ BE64(n) ‖ BE64(difficulty)`; the block
//! timestamp and height are not committed.

use tracing::debug;

use crate::constants::DIFFICULTY;
use crate::error::BlockError;
use crate::types::{sha256, Block, Hash256};

/// A nonce search bound to one block.
pub struct ProofOfWork<'a> {
    block: &'a Block,
    difficulty: u32,
}

impl<'a> ProofOfWork<'a> {
    /// Bind a search to `block` at the default [`DIFFICULTY`].
    pub fn new(block: &'a Block) -> Self {
        Self::with_difficulty(block, DIFFICULTY)
    }

    /// Bind a search with an explicit difficulty (leading-zero bit count).
    pub fn with_difficulty(block: &'a Block, difficulty: u32) -> Self {
        Self { block, difficulty }
    }

    /// Preimage for a given nonce.
    fn prepare_data(&self, merkle_root: &Hash256, nonce: i64) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 + 32 + 8 + 8);
        data.extend_from_slice(self.block.prev_hash.as_bytes());
        data.extend_from_slice(merkle_root.as_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&i64::from(self.difficulty).to_be_bytes());
        data
    }

    /// Search nonces from zero until a digest meets the target.
    pub fn run(&self) -> Result<(i64, Hash256), BlockError> {
        let merkle_root = self.block.hash_transactions()?;
        for nonce in 0..i64::MAX {
            let digest = sha256(&self.prepare_data(&merkle_root, nonce));
            if meets_target(&digest, self.difficulty) {
                debug!(nonce, hash = %digest, "proof-of-work found");
                return Ok((nonce, digest));
            }
        }
        Err(BlockError::NonceExhausted)
    }

    /// Recompute the digest at the block's stored nonce and check the target.
    pub fn validate(&self) -> Result<bool, BlockError> {
        let merkle_root = self.block.hash_transactions()?;
        let digest = sha256(&self.prepare_data(&merkle_root, self.block.nonce));
        Ok(meets_target(&digest, self.difficulty))
    }
}

/// Whether the digest's leading `difficulty` bits are all zero, i.e. its
/// 256-bit integer value is strictly below `2^(256 - difficulty)`.
fn meets_target(hash: &Hash256, difficulty: u32) -> bool {
    let mut remaining = difficulty;
    for byte in hash.as_bytes() {
        if remaining == 0 {
            return true;
        }
        if remaining >= 8 {
            if *byte != 0 {
                return false;
            }
            remaining -= 8;
        } else {
            return byte.leading_zeros() >= remaining;
        }
    }
    remaining == 0
}
