//! Local persistence tiers.
//!
//! Both tiers are plain string key/value maps; typed artifacts go through
//! [`load_json`] / [`store_json`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;
use crate::fsutil::{read_optional, write_atomic};

/// Session-tier key for the PIN-wrapped MEK.
pub const EPHEMERAL_SESSION_KEY: &str = "kx.ephemeral_session";
/// Session-tier flag set while the vault is unlocked in this session.
pub const VAULT_UNLOCKED_FLAG: &str = "kx.vault_unlocked";

/// Durable-tier key for the PIN verifier of one device + account.
pub fn pin_verifier_key(device_id: &str, user_id: &str) -> String {
    format!("kx.pin_verifier:{device_id}:{user_id}")
}

pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

pub fn load_json<T: DeserializeOwned>(
    store: &dyn LocalStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn store_json<T: Serialize>(store: &dyn LocalStore, key: &str, value: &T) -> Result<(), StoreError> {
    store.set(key, &serde_json::to_string(value)?)
}

// ── In-memory (session tier) ──────────────────────────────────────────────────

/// Contents live exactly as long as the instance.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

// ── File-backed (durable tier) ────────────────────────────────────────────────

/// One JSON object on disk. Every write replaces the file atomically.
#[derive(Debug)]
pub struct FileLocalStore {
    path: PathBuf,
    io: Mutex<()>,
}

impl FileLocalStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            io: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<HashMap<String, String>, StoreError> {
        match read_optional(&self.path)? {
            Some(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
            _ => Ok(HashMap::new()),
        }
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<(), StoreError> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(map)?)
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _io = self.io.lock();
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _io = self.io.lock();
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _io = self.io.lock();
        let mut map = self.read_map()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}
