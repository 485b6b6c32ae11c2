//! Base58Check address encoding.
//!
//! An address is `base58(version ‖ hash160(pubkey) ‖ checksum)` where
//! `hash160 = RIPEMD160(SHA256(pubkey))` and the checksum is the first four
//! bytes of a double SHA-256 over `version ‖ hash160`.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::constants::{ADDRESS_VERSION, CHECKSUM_LENGTH};
use crate::error::AddressError;

/// Length of a pubkey hash in bytes.
pub const PUBKEY_HASH_LENGTH: usize = 20;

/// Compute the 20-byte hash160 of a raw public key.
pub fn hash160(pubkey: &[u8]) -> Vec<u8> {
    let sha = Sha256::digest(pubkey);
    Ripemd160::digest(sha).to_vec()
}

/// First [`CHECKSUM_LENGTH`] bytes of `SHA256(SHA256(payload))`.
fn checksum(payload: &[u8]) -> Vec<u8> {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    second[..CHECKSUM_LENGTH].to_vec()
}

/// Encode a pubkey hash as a base58 address.
pub fn encode_address(pubkey_hash: &[u8]) -> String {
    let mut payload = Vec::with_capacity(1 + pubkey_hash.len() + CHECKSUM_LENGTH);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(pubkey_hash);
    let check = checksum(&payload);
    payload.extend_from_slice(&check);
    bs58::encode(payload).into_string()
}

/// Decode an address back into its 20-byte pubkey hash.
///
/// Recomputes and compares the checksum; a mismatch or a malformed payload
/// is a typed error, never a panic.
pub fn decode_address(address: &str) -> Result<Vec<u8>, AddressError> {
    let payload = bs58::decode(address)
        .into_vec()
        .map_err(|e| AddressError::InvalidBase58(e.to_string()))?;
    if payload.len() != 1 + PUBKEY_HASH_LENGTH + CHECKSUM_LENGTH {
        return Err(AddressError::InvalidLength(payload.len()));
    }

    let (body, actual) = payload.split_at(payload.len() - CHECKSUM_LENGTH);
    if checksum(body) != actual {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(body[1..].to_vec())
}

/// Whether the string is a well-formed address with a valid checksum.
pub fn validate_address(address: &str) -> bool {
    decode_address(address).is_ok()
}
