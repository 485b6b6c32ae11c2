//! SHA-256 Merkle tree over encoded transactions.
//!
//! Level 0 hashes each leaf's bytes; internal nodes hash the concatenation
//! of their children. Odd-length layers duplicate the last node. Callers
//! guarantee at least one leaf per block.

use crate::types::{sha256, Hash256};

/// Compute the Merkle root from encoded transaction bytes.
///
/// Returns [`Hash256::ZERO`] for an empty slice, though blocks never
/// carry zero transactions.
pub fn merkle_root(leaves: &[Vec<u8>]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::ZERO;
    }

    let mut layer: Vec<Hash256> = leaves.iter().map(|l| sha256(l)).collect();
    while layer.len() > 1 {
        layer = next_layer(&layer);
    }
    layer[0]
}

/// Pair adjacent nodes, duplicating the last one when the layer is odd.
fn next_layer(layer: &[Hash256]) -> Vec<Hash256> {
    let mut next = Vec::with_capacity(layer.len().div_ceil(2));
    let mut i = 0;
    while i < layer.len() {
        let left = &layer[i];
        let right = if i + 1 < layer.len() { &layer[i + 1] } else { left };
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(left.as_bytes());
        data.extend_from_slice(right.as_bytes());
        next.push(sha256(&data));
        i += 2;
    }
    next
}
