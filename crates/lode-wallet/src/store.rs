//! On-disk wallet collection: one JSON file per wallet, named by address.
//!
//! Key files are plaintext; production deployments would keep these in an
//! HSM or encrypted store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::WalletError;
use crate::wallet::Wallet;

/// Serialized form of a single wallet file.
#[derive(Serialize, Deserialize)]
struct WalletFile {
    /// Hex-encoded 32-byte secret scalar.
    secret: String,
}

/// A directory of wallets, loaded into memory and saved per wallet.
pub struct WalletStore {
    dir: PathBuf,
    wallets: HashMap<String, Wallet>,
}

impl WalletStore {
    /// Open the wallet directory, loading every `.json` key file.
    ///
    /// A missing directory is treated as an empty store; it is created on
    /// the first save.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, WalletError> {
        let dir = dir.as_ref().to_path_buf();
        let mut wallets = HashMap::new();

        if dir.is_dir() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                let wallet = load_wallet_file(&path)?;
                wallets.insert(wallet.address(), wallet);
            }
        }

        debug!(dir = %dir.display(), count = wallets.len(), "wallet store opened");
        Ok(Self { dir, wallets })
    }

    /// Generate a new wallet, persist its key file, and return the address.
    pub fn create_wallet(&mut self) -> Result<String, WalletError> {
        let wallet = Wallet::generate();
        let address = wallet.address();

        fs::create_dir_all(&self.dir)?;
        let file = WalletFile { secret: hex::encode(wallet.secret_bytes()) };
        let path = self.dir.join(format!("{address}.json"));
        fs::write(&path, serde_json::to_vec_pretty(&file).expect("wallet file serializes"))?;

        info!(%address, "created wallet");
        self.wallets.insert(address.clone(), wallet);
        Ok(address)
    }

    /// Look up a wallet by address.
    pub fn get(&self, address: &str) -> Result<&Wallet, WalletError> {
        self.wallets
            .get(address)
            .ok_or_else(|| WalletError::UnknownAddress(address.to_string()))
    }

    /// All known addresses.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.wallets.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}

fn load_wallet_file(path: &Path) -> Result<Wallet, WalletError> {
    let malformed = |reason: String| WalletError::Malformed {
        path: path.display().to_string(),
        reason,
    };

    let bytes = fs::read(path)?;
    let file: WalletFile =
        serde_json::from_slice(&bytes).map_err(|e| malformed(e.to_string()))?;
    let secret = hex::decode(&file.secret).map_err(|e| malformed(e.to_string()))?;
    Ok(Wallet::from_secret_bytes(&secret)?)
}
