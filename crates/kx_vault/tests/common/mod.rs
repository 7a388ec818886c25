#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kx_crypto::{KdfParams, SymmetricKey};
use kx_store::{
    IdentityRecord, KeychainEntry, LocalStore, MemoryLocalStore, MemoryRemoteStore, RecordId,
    RemoteKeyStore, StoreError,
};
use kx_vault::provision::provision_with_key;
use kx_vault::{Vault, VaultConfig};
use tokio::sync::Notify;

pub const USER: &str = "u1";
pub const PASSWORD: &str = "correct-horse";
pub const SALT_S: &[u8; 16] = b"kylrix-salt-0001";

pub fn fast_kdf() -> KdfParams {
    KdfParams {
        unwrap_iterations: 64,
        verifier_iterations: 16,
        session_iterations: 8,
    }
}

pub fn config(node: &str) -> VaultConfig {
    VaultConfig {
        node_id: node.to_string(),
        kdf: fast_kdf(),
        ..VaultConfig::for_user(USER)
    }
}

/// Remote store holding a `password` row that wraps 32 zero bytes under
/// `PASSWORD` and `SALT_S`.
pub async fn provisioned_remote() -> MemoryRemoteStore {
    let remote = MemoryRemoteStore::new();
    let zero_mek = SymmetricKey::from_bytes(&[0u8; 32]).unwrap();
    provision_with_key(&remote, USER, PASSWORD, &zero_mek, SALT_S, &fast_kdf())
        .await
        .unwrap();
    remote
}

pub struct Context {
    pub vault: Vault,
    pub durable: Arc<MemoryLocalStore>,
    pub session: Arc<MemoryLocalStore>,
}

pub fn context(config: VaultConfig, remote: Arc<dyn RemoteKeyStore>) -> Context {
    context_with(config, remote, Arc::new(MemoryLocalStore::new()))
}

/// New execution context sharing an existing durable tier.
pub fn context_with(
    config: VaultConfig,
    remote: Arc<dyn RemoteKeyStore>,
    durable: Arc<MemoryLocalStore>,
) -> Context {
    let session = Arc::new(MemoryLocalStore::new());
    let vault = Vault::new(
        config,
        remote,
        durable.clone() as Arc<dyn LocalStore>,
        session.clone() as Arc<dyn LocalStore>,
    )
    .unwrap();
    Context {
        vault,
        durable,
        session,
    }
}

pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

/// Remote store that parks keychain reads until released.
pub struct GatedRemote {
    inner: MemoryRemoteStore,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedRemote {
    pub fn new(inner: MemoryRemoteStore) -> Self {
        Self {
            inner,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl RemoteKeyStore for GatedRemote {
    async fn list_keychain_entries(&self, user_id: &str) -> Result<Vec<KeychainEntry>, StoreError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.list_keychain_entries(user_id).await
    }

    async fn put_keychain_entry(&self, entry: KeychainEntry) -> Result<RecordId, StoreError> {
        self.inner.put_keychain_entry(entry).await
    }

    async fn get_identity_record(
        &self,
        user_id: &str,
        identity_type: &str,
    ) -> Result<Option<IdentityRecord>, StoreError> {
        self.inner.get_identity_record(user_id, identity_type).await
    }

    async fn put_identity_record(&self, record: IdentityRecord) -> Result<RecordId, StoreError> {
        self.inner.put_identity_record(record).await
    }
}
