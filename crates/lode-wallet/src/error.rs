//! Wallet error types.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("io: {0}")] Io(#[from] std::io::Error),
    #[error("malformed wallet file {path}: {reason}")] Malformed { path: String, reason: String },
    #[error("unknown address: {0}")] UnknownAddress(String),
    #[error("crypto: {0}")] Crypto(#[from] lode_core::error::CryptoError),
}
