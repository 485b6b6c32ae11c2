//! RocksDB access: open-with-recovery and the key schema.
//!
//! All persisted state lives in the default column family:
//! - `<32-byte block hash>` → encoded [`Block`](lode_core::types::Block)
//! - `lh` → hash of the current best tip
//! - `utxo-<txid>` → encoded surviving outputs of that transaction
//!
//! Block-hash keys never collide with the named keys because hashes are
//! exactly 32 bytes.

use std::path::Path;

use rocksdb::{Options, DB};
use tracing::warn;

use lode_core::error::LodeError;

/// Key of the best-tip pointer.
pub const TIP_KEY: &[u8] = b"lh";

/// Prefix of UTXO index entries.
pub const UTXO_PREFIX: &[u8] = b"utxo-";

/// Map a RocksDB error into the storage error kind.
pub(crate) fn storage_err(e: rocksdb::Error) -> LodeError {
    LodeError::Storage(e.to_string())
}

/// Whether a database has ever been created at `dir`.
///
/// RocksDB writes its `CURRENT` marker on first open; probing it avoids
/// opening (and thereby creating) the database.
pub fn db_exists(dir: &Path) -> bool {
    dir.join("CURRENT").exists()
}

/// Open the database, recovering once from a stale lock.
///
/// A process that crashed without releasing the lock file blocks the first
/// open; in that case the store is repaired and opened again. Any second
/// failure surfaces.
pub fn open_db(dir: &Path) -> Result<DB, LodeError> {
    let mut opts = Options::default();
    opts.create_if_missing(true);

    match DB::open(&opts, dir) {
        Ok(db) => Ok(db),
        Err(first) if first.to_string().to_lowercase().contains("lock") => {
            warn!(dir = %dir.display(), error = %first, "store locked, repairing");
            DB::repair(&opts, dir).map_err(storage_err)?;
            DB::open(&opts, dir).map_err(storage_err)
        }
        Err(first) => Err(storage_err(first)),
    }
}
