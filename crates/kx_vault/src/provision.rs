//! First-run master key setup: generate the MEK and store it wrapped under
//! the master password as the account's `password` keychain row.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use chrono::Utc;
use kx_crypto::aead;
use kx_crypto::kdf::{derive_unwrap_key, generate_salt};
use kx_crypto::{KdfParams, SymmetricKey};
use kx_store::{KeychainEntry, KeychainEntryKind, RecordId, RemoteKeyStore, StoreError};
use tracing::info;
use zeroize::Zeroizing;

use crate::error::VaultError;
use crate::vault::run_blocking;

/// Generate a random MEK and store it under `password`. Refuses when the
/// account already has a master key.
pub async fn provision_master_key(
    remote: &dyn RemoteKeyStore,
    user_id: &str,
    password: &str,
    params: &KdfParams,
) -> Result<RecordId, VaultError> {
    let mek = SymmetricKey::generate();
    provision_with_key(remote, user_id, password, &mek, &generate_salt(), params).await
}

/// Store a caller-chosen MEK under `password` with the given salt.
pub async fn provision_with_key(
    remote: &dyn RemoteKeyStore,
    user_id: &str,
    password: &str,
    mek: &SymmetricKey,
    salt: &[u8],
    params: &KdfParams,
) -> Result<RecordId, VaultError> {
    if remote.get_master_key_record(user_id).await?.is_some() {
        return Err(StoreError::Conflict(format!("user {user_id} already has a master key")).into());
    }

    let secret = Zeroizing::new(password.as_bytes().to_vec());
    let salt_owned = salt.to_vec();
    let params = *params;
    let unwrap_key =
        run_blocking(move || derive_unwrap_key(&secret, &salt_owned, &params)).await??;

    let entry = KeychainEntry {
        user_id: user_id.to_string(),
        kind: KeychainEntryKind::Password,
        salt: B64.encode(salt),
        wrapped_key: aead::wrap_key(&unwrap_key, mek)?,
        created_at: Utc::now(),
    };
    let id = remote.put_keychain_entry(entry).await?;
    info!(user_id, record_id = %id, "master key provisioned");
    Ok(id)
}
