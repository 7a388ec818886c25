//! Passkey unlock hook.
//!
//! A `passkey` keychain row holds the MEK wrapped under a key released by a
//! platform authenticator. Presence can be probed today; the unwrap itself
//! needs a WebAuthn PRF integration that this crate does not ship, so
//! `unlock_with_passkey` always reports the factor as unavailable and the
//! caller falls back to password or PIN.

use kx_store::KeychainEntryKind;
use tracing::debug;

use crate::error::VaultError;
use crate::vault::Vault;

pub const PASSKEY_FACTOR: &str = "passkey";

impl Vault {
    /// Whether the account has a `passkey` keychain row.
    pub async fn has_passkey(&self) -> Result<bool, VaultError> {
        let entries = self
            .inner
            .remote
            .list_keychain_entries(&self.inner.config.user_id)
            .await?;
        Ok(entries.iter().any(|e| e.kind == KeychainEntryKind::Passkey))
    }

    pub async fn unlock_with_passkey(&self) -> Result<(), VaultError> {
        debug!(user_id = %self.inner.config.user_id, "passkey unlock requested");
        Err(VaultError::FactorUnavailable(format!(
            "{PASSKEY_FACTOR}: no platform authenticator integration"
        )))
    }
}
