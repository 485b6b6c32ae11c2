//! A single wallet: one P-256 key pair and its derived address.

use std::fmt;

use lode_core::address;
use lode_core::crypto::KeyPair;
use lode_core::error::CryptoError;

/// A spending key and its address.
pub struct Wallet {
    keypair: KeyPair,
}

impl Wallet {
    /// Generate a wallet with a fresh random key pair.
    pub fn generate() -> Self {
        Self { keypair: KeyPair::generate() }
    }

    /// Restore a wallet from its 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self { keypair: KeyPair::from_secret_bytes(bytes)? })
    }

    /// The raw secret scalar for persistence. Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.keypair.secret_bytes()
    }

    /// The signing key pair.
    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// The raw 64-byte `x ‖ y` public key.
    pub fn pubkey_bytes(&self) -> [u8; 64] {
        self.keypair.public_key().to_raw_bytes()
    }

    /// The base58 address derived from this wallet's public key.
    pub fn address(&self) -> String {
        address::encode_address(&address::hash160(&self.pubkey_bytes()))
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet").field("address", &self.address()).finish_non_exhaustive()
    }
}
