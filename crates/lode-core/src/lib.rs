//! # lode-core
//! Foundation types for the Lode protocol: blocks, transactions,
//! proof-of-work, ECDSA signing, and addresses.

pub mod address;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod mempool;
pub mod merkle;
pub mod pow;
pub mod types;
