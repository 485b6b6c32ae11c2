//! # lode-wallet
//! Key pairs, addresses, and the on-disk wallet collection.

pub mod error;
pub mod store;
pub mod wallet;

pub use error::WalletError;
pub use store::WalletStore;
pub use wallet::Wallet;
