//! Error types for the Lode protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("unknown previous transaction: {0}")] UnknownPrevTx(String),
    #[error("transaction not found: {0}")] NotFound(String),
    #[error("invalid transaction: {0}")] Invalid(String),
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("output index {index} out of bounds in {txid}")] OutputIndexOutOfBounds { txid: String, index: i64 },
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("serialization: {0}")] Serialization(String),
    #[error("nonce space exhausted")] NonceExhausted,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid secret key bytes")] InvalidSecretKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58: {0}")] InvalidBase58(String),
    #[error("invalid payload length: {0}")] InvalidLength(usize),
    #[error("checksum mismatch")] InvalidChecksum,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("block not found: {0}")] BlockNotFound(String),
    #[error("chain not initialized")] NotInitialized,
    #[error("chain already exists")] AlreadyExists,
    #[error("utxo entry missing: {0}")] UtxoEntryMissing(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("io: {0}")] Io(String),
    #[error("timed out")] Timeout,
    #[error("malformed frame: {0}")] Decode(String),
    #[error("unknown command: {0}")] UnknownCommand(String),
    #[error("message too large: {size} > {max}")] MessageTooLarge { size: usize, max: usize },
}

#[derive(Error, Debug)]
pub enum LodeError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Address(#[from] AddressError),
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Network(#[from] NetworkError),
    #[error("storage: {0}")] Storage(String),
}
