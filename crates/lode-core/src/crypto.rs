//! ECDSA P-256 operations: key pairs and transaction signing.
//!
//! # Signing scheme
//!
//! Each input is signed over a *trimmed copy* of the transaction: every
//! input's signature and pubkey are cleared, except the input being signed,
//! whose pubkey field temporarily holds the pubkey hash of the output it
//! spends. The bincode encoding of that copy is the ECDSA message (SHA-256
//! prehash applied by the scheme itself).
//!
//! Signatures are the fixed-width 64-byte `r ‖ s` form and public keys the
//! raw 64-byte `x ‖ y` form, so verifiers split both at the midpoint
//! without any length ambiguity.

use std::collections::HashMap;
use std::fmt;

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::{EncodedPoint, FieldBytes};
use rand::rngs::OsRng;

use crate::error::{CryptoError, TransactionError};
use crate::types::{Transaction, TxInput, TxOutput};

/// P-256 key pair for signing transaction inputs.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a random key pair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self { signing_key: SigningKey::random(&mut OsRng) }
    }

    /// Restore a key pair from 32-byte secret scalar material.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// The raw secret scalar (32 bytes). Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.signing_key.to_bytes());
        out
    }

    /// The public half of this key pair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey { verifying_key: self.signing_key.verifying_key().clone() }
    }

    /// Sign a message, returning the fixed 64-byte `r ‖ s` signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signature: Signature = self.signing_key.sign(message);
        let mut out = [0u8; 64];
        out.copy_from_slice(&signature.to_bytes());
        out
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self { signing_key: self.signing_key.clone() }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// P-256 public key for verifying transaction input signatures.
#[derive(Clone)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PublicKey {
    /// Parse a public key from the raw 64-byte `x ‖ y` form.
    pub fn from_raw_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 64 {
            return Err(CryptoError::InvalidPublicKey);
        }
        let x = FieldBytes::from_slice(&bytes[..32]);
        let y = FieldBytes::from_slice(&bytes[32..]);
        let point = EncodedPoint::from_affine_coordinates(x, y, false);
        let verifying_key = VerifyingKey::from_encoded_point(&point)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key })
    }

    /// Serialize as the raw 64-byte `x ‖ y` form.
    pub fn to_raw_bytes(&self) -> [u8; 64] {
        let point = self.verifying_key.to_encoded_point(false);
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(point.x().expect("uncompressed point has x"));
        out[32..].copy_from_slice(point.y().expect("uncompressed point has y"));
        out
    }

    /// Verify a fixed-width `r ‖ s` signature over a message.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let signature =
            Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
        self.verifying_key
            .verify(message, &signature)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_raw_bytes()))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_raw_bytes() == other.to_raw_bytes()
    }
}

impl Eq for PublicKey {}

/// Copy of `tx` with every input's signature and pubkey cleared.
pub fn trimmed_copy(tx: &Transaction) -> Transaction {
    Transaction {
        timestamp: tx.timestamp,
        id: tx.id,
        inputs: tx
            .inputs
            .iter()
            .map(|input| TxInput {
                prev_txid: input.prev_txid,
                out_index: input.out_index,
                signature: Vec::new(),
                pubkey: Vec::new(),
            })
            .collect(),
        outputs: tx.outputs.clone(),
    }
}

/// The previous output referenced by an input.
fn referenced_output<'a>(
    prev: &'a Transaction,
    input: &TxInput,
) -> Result<&'a TxOutput, TransactionError> {
    usize::try_from(input.out_index)
        .ok()
        .and_then(|index| prev.outputs.get(index))
        .ok_or_else(|| TransactionError::OutputIndexOutOfBounds {
            txid: hex::encode(input.prev_txid.as_bytes()),
            index: input.out_index,
        })
}

/// Sign every input of `tx` against its referenced previous output.
///
/// `prev_txs` maps hex-encoded transaction ids to the transactions whose
/// outputs the inputs spend. Coinbase transactions are signed trivially.
pub fn sign_transaction(
    tx: &mut Transaction,
    keypair: &KeyPair,
    prev_txs: &HashMap<String, Transaction>,
) -> Result<(), TransactionError> {
    if tx.is_coinbase() {
        return Ok(());
    }
    for input in &tx.inputs {
        let key = hex::encode(input.prev_txid.as_bytes());
        if !prev_txs.contains_key(&key) {
            return Err(TransactionError::UnknownPrevTx(key));
        }
    }

    let mut trimmed = trimmed_copy(tx);
    for (index, input) in tx.inputs.clone().iter().enumerate() {
        let prev = &prev_txs[&hex::encode(input.prev_txid.as_bytes())];
        let out = referenced_output(prev, input)?;

        trimmed.inputs[index].signature = Vec::new();
        trimmed.inputs[index].pubkey = out.pubkey_hash.clone();
        let preimage = trimmed.encode()?;
        tx.inputs[index].signature = keypair.sign(&preimage).to_vec();
        // Clear again so the next input signs a copy with a single live pubkey.
        trimmed.inputs[index].pubkey = Vec::new();
    }
    Ok(())
}

/// Verify every input signature of `tx`.
///
/// Reconstructs the per-input trimmed preimage and runs ECDSA verification
/// with the key embedded in the input. Returns `Ok(false)` on any
/// malformed key, malformed signature, or failed verification; a missing
/// prev-tx entry is a caller error and surfaces as `Err`.
pub fn verify_transaction(
    tx: &Transaction,
    prev_txs: &HashMap<String, Transaction>,
) -> Result<bool, TransactionError> {
    if tx.is_coinbase() {
        return Ok(true);
    }
    for input in &tx.inputs {
        let key = hex::encode(input.prev_txid.as_bytes());
        if !prev_txs.contains_key(&key) {
            return Err(TransactionError::UnknownPrevTx(key));
        }
    }

    let mut trimmed = trimmed_copy(tx);
    for (index, input) in tx.inputs.iter().enumerate() {
        let prev = &prev_txs[&hex::encode(input.prev_txid.as_bytes())];
        let Ok(out) = referenced_output(prev, input) else {
            return Ok(false);
        };

        trimmed.inputs[index].signature = Vec::new();
        trimmed.inputs[index].pubkey = out.pubkey_hash.clone();
        let preimage = trimmed.encode()?;
        trimmed.inputs[index].pubkey = Vec::new();

        let Ok(public_key) = PublicKey::from_raw_bytes(&input.pubkey) else {
            return Ok(false);
        };
        if public_key.verify(&preimage, &input.signature).is_err() {
            return Ok(false);
        }
    }
    Ok(true)
}
