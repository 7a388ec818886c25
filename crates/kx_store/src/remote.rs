//! Remote row store boundary.
//!
//! The hosted backend exposes two tables to the vault: `keychain` (one row
//! per unlock factor) and `identities` (one row per user per identity
//! type). [`RemoteKeyStore`] is the seam; the two implementations here share
//! [`RemoteTables`] and differ only in where the document lives.
//!
//! Identity creation is a compare-and-swap create: a second insert for the
//! same `(user_id, identity_type)` fails with [`StoreError::Conflict`] so a
//! racing context can adopt the winner instead of forking the identity.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::fsutil::{read_optional, write_atomic};
use crate::models::{IdentityRecord, KeychainEntry, KeychainEntryKind, MasterKeyRecord, RecordId};

#[async_trait]
pub trait RemoteKeyStore: Send + Sync {
    async fn list_keychain_entries(&self, user_id: &str) -> Result<Vec<KeychainEntry>, StoreError>;

    async fn put_keychain_entry(&self, entry: KeychainEntry) -> Result<RecordId, StoreError>;

    /// The user's `password` keychain row, if vault setup has happened.
    async fn get_master_key_record(
        &self,
        user_id: &str,
    ) -> Result<Option<MasterKeyRecord>, StoreError> {
        let entries = self.list_keychain_entries(user_id).await?;
        Ok(entries
            .iter()
            .find(|e| e.kind == KeychainEntryKind::Password)
            .map(MasterKeyRecord::from))
    }

    async fn get_identity_record(
        &self,
        user_id: &str,
        identity_type: &str,
    ) -> Result<Option<IdentityRecord>, StoreError>;

    /// Append a new identity. Fails with `Conflict` if the pair already has one.
    async fn put_identity_record(&self, record: IdentityRecord) -> Result<RecordId, StoreError>;
}

// ── Shared table document ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row<T> {
    pub id: RecordId,
    #[serde(flatten)]
    pub data: T,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteTables {
    #[serde(default)]
    pub keychain: Vec<Row<KeychainEntry>>,
    #[serde(default)]
    pub identities: Vec<Row<IdentityRecord>>,
}

impl RemoteTables {
    fn keychain_for(&self, user_id: &str) -> Vec<KeychainEntry> {
        self.keychain
            .iter()
            .filter(|row| row.data.user_id == user_id)
            .map(|row| row.data.clone())
            .collect()
    }

    fn insert_keychain(&mut self, entry: KeychainEntry) -> Result<RecordId, StoreError> {
        // One master password per user; passkeys may be registered per device.
        if entry.kind == KeychainEntryKind::Password
            && self.keychain.iter().any(|row| {
                row.data.user_id == entry.user_id && row.data.kind == KeychainEntryKind::Password
            })
        {
            return Err(StoreError::Conflict(format!(
                "password keychain entry already exists for {}",
                entry.user_id
            )));
        }
        let id = Uuid::new_v4().to_string();
        self.keychain.push(Row {
            id: id.clone(),
            data: entry,
        });
        Ok(id)
    }

    fn identity_for(&self, user_id: &str, identity_type: &str) -> Option<IdentityRecord> {
        self.identities
            .iter()
            .find(|row| row.data.user_id == user_id && row.data.identity_type == identity_type)
            .map(|row| row.data.clone())
    }

    fn insert_identity(&mut self, record: IdentityRecord) -> Result<RecordId, StoreError> {
        if self
            .identity_for(&record.user_id, &record.identity_type)
            .is_some()
        {
            return Err(StoreError::Conflict(format!(
                "identity {} already exists for {}",
                record.identity_type, record.user_id
            )));
        }
        let id = Uuid::new_v4().to_string();
        self.identities.push(Row {
            id: id.clone(),
            data: record,
        });
        Ok(id)
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// Process-local row store. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemoteStore {
    tables: Arc<RwLock<RemoteTables>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity_count(&self, user_id: &str) -> usize {
        self.tables
            .read()
            .identities
            .iter()
            .filter(|row| row.data.user_id == user_id)
            .count()
    }
}

#[async_trait]
impl RemoteKeyStore for MemoryRemoteStore {
    async fn list_keychain_entries(&self, user_id: &str) -> Result<Vec<KeychainEntry>, StoreError> {
        Ok(self.tables.read().keychain_for(user_id))
    }

    async fn put_keychain_entry(&self, entry: KeychainEntry) -> Result<RecordId, StoreError> {
        self.tables.write().insert_keychain(entry)
    }

    async fn get_identity_record(
        &self,
        user_id: &str,
        identity_type: &str,
    ) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self.tables.read().identity_for(user_id, identity_type))
    }

    async fn put_identity_record(&self, record: IdentityRecord) -> Result<RecordId, StoreError> {
        self.tables.write().insert_identity(record)
    }
}

// ── JSON file ─────────────────────────────────────────────────────────────────

/// Row store persisted as one JSON document; used by the CLI.
#[derive(Debug)]
pub struct JsonFileRemoteStore {
    path: PathBuf,
    io: Mutex<()>,
}

impl JsonFileRemoteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            io: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<RemoteTables, StoreError> {
        match read_optional(&self.path)? {
            Some(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
            _ => Ok(RemoteTables::default()),
        }
    }

    fn save(&self, tables: &RemoteTables) -> Result<(), StoreError> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(tables)?)
    }

    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut RemoteTables) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let _io = self.io.lock();
        let mut tables = self.load()?;
        let out = f(&mut tables)?;
        self.save(&tables)?;
        debug!(path = %self.path.display(), "remote tables written");
        Ok(out)
    }
}

#[async_trait]
impl RemoteKeyStore for JsonFileRemoteStore {
    async fn list_keychain_entries(&self, user_id: &str) -> Result<Vec<KeychainEntry>, StoreError> {
        let _io = self.io.lock();
        Ok(self.load()?.keychain_for(user_id))
    }

    async fn put_keychain_entry(&self, entry: KeychainEntry) -> Result<RecordId, StoreError> {
        self.mutate(|tables| tables.insert_keychain(entry))
    }

    async fn get_identity_record(
        &self,
        user_id: &str,
        identity_type: &str,
    ) -> Result<Option<IdentityRecord>, StoreError> {
        let _io = self.io.lock();
        Ok(self.load()?.identity_for(user_id, identity_type))
    }

    async fn put_identity_record(&self, record: IdentityRecord) -> Result<RecordId, StoreError> {
        self.mutate(|tables| tables.insert_identity(record))
    }
}
