//! Persistence contract.
//!
//! The wallet reads and writes a handful of named records through
//! [`WalletStore`] and never assumes a storage engine. Values are JSON bytes.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::WalletError;

/// Record holding the encrypted seed envelope.
pub const SEED_KEY: &str = "seed";
/// Record holding the receive/change counters.
pub const COUNTERS_KEY: &str = "counters";
/// Record holding the ledger snapshot and chain tip.
pub const LEDGER_KEY: &str = "ledger";
/// Record holding the network and account the wallet was created for.
pub const CONFIG_KEY: &str = "config";

/// Key-value storage for wallet records.
pub trait WalletStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, WalletError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), WalletError>;
    fn delete(&self, key: &str) -> Result<(), WalletError>;
}

pub(crate) fn load_json<T: DeserializeOwned>(
    store: &dyn WalletStore,
    key: &str,
) -> Result<Option<T>, WalletError> {
    store
        .get(key)?
        .map(|bytes| {
            serde_json::from_slice(&bytes)
                .map_err(|e| WalletError::Serialization(format!("record {key}: {e}")))
        })
        .transpose()
}

pub(crate) fn save_json<T: Serialize>(
    store: &dyn WalletStore,
    key: &str,
    value: &T,
) -> Result<(), WalletError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    store.put(key, &bytes)
}

/// In-process store. Contents vanish with the value.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.records.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl WalletStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, WalletError> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), WalletError> {
        self.records.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), WalletError> {
        self.records.lock().remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per record in a directory.
///
/// Writes go to a temporary file that is renamed over the old record, so a
/// crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, WalletError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| WalletError::Storage(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> Result<PathBuf, WalletError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(WalletError::Storage(format!("invalid record key {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl WalletStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, WalletError> {
        let path = self.record_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WalletError::Storage(format!("read {}: {e}", path.display()))),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), WalletError> {
        let path = self.record_path(key)?;
        let tmp = path.with_extension("json.tmp");
        let io_err = |e: std::io::Error| WalletError::Storage(format!("write {}: {e}", path.display()));

        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(value).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&tmp, &path).map_err(io_err)
    }

    fn delete(&self, key: &str) -> Result<(), WalletError> {
        let path = self.record_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WalletError::Storage(format!("delete {}: {e}", path.display()))),
        }
    }
}
