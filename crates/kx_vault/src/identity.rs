//! E2E identity: load or create the user's X25519 keypair.
//!
//! The private key is stored as base64 PKCS#8, sealed under the MEK, in the
//! remote `identities` table. The storage layer rejects a second record for
//! the same `(user, type)` pair; the loser of that race adopts the winner's
//! record instead of keeping its own keypair.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use chrono::Utc;
use kx_crypto::{IdentityKeyPair, PublicKeyBytes};
use kx_store::{IdentityRecord, StoreError};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::VaultError;
use crate::vault::{CachedIdentity, Vault};

pub const DEFAULT_IDENTITY_TYPE: &str = "e2e_connect";
pub const DEFAULT_IDENTITY_LABEL: &str = "Connect E2E Identity";

impl Vault {
    /// Return the public key of the `(user_id, identity_type)` identity,
    /// restoring it from the remote record or creating it.
    pub async fn ensure_identity(
        &self,
        user_id: &str,
        identity_type: &str,
    ) -> Result<PublicKeyBytes, VaultError> {
        let epoch = self.epoch();
        let _ops = self.inner.ops.lock().await;
        self.current_key()?;

        if let Some(public) = self.cached_identity(user_id, identity_type) {
            return Ok(public);
        }

        let keypair = match self
            .inner
            .remote
            .get_identity_record(user_id, identity_type)
            .await?
        {
            Some(record) => self.restore_identity(&record)?,
            None => self.create_identity(user_id, identity_type).await?,
        };

        let public = *keypair.public();
        {
            let mut state = self.inner.state.write();
            if state.epoch != epoch {
                return Err(VaultError::Superseded);
            }
            state.identity = Some(CachedIdentity {
                user_id: user_id.to_string(),
                identity_type: identity_type.to_string(),
                keypair,
            });
        }
        debug!(user_id, identity_type, fingerprint = %public.fingerprint(), "identity cached");
        Ok(public)
    }

    fn cached_identity(&self, user_id: &str, identity_type: &str) -> Option<PublicKeyBytes> {
        let state = self.inner.state.read();
        state
            .identity
            .as_ref()
            .filter(|c| c.user_id == user_id && c.identity_type == identity_type)
            .map(|c| *c.keypair.public())
    }

    fn restore_identity(&self, record: &IdentityRecord) -> Result<IdentityKeyPair, VaultError> {
        let unavailable =
            |what: &str, e: &dyn std::fmt::Display| VaultError::IdentityUnavailable(format!("{what}: {e}"));

        let encoded = self.open_secret(&record.wrapped_private_key).map_err(|e| match e {
            VaultError::VaultLocked => VaultError::VaultLocked,
            other => unavailable("unwrap private key", &other),
        })?;
        let der = Zeroizing::new(
            B64.decode(encoded.as_bytes())
                .map_err(|e| unavailable("decode private key", &e))?,
        );
        let keypair =
            IdentityKeyPair::from_pkcs8(&der).map_err(|e| unavailable("import private key", &e))?;

        let stored = PublicKeyBytes::from_b64(&record.public_key)
            .map_err(|e| unavailable("stored public key", &e))?;
        if stored != *keypair.public() {
            return Err(VaultError::IdentityUnavailable(
                "private key does not match stored public key".into(),
            ));
        }
        Ok(keypair)
    }

    async fn create_identity(
        &self,
        user_id: &str,
        identity_type: &str,
    ) -> Result<IdentityKeyPair, VaultError> {
        let keypair = IdentityKeyPair::generate();
        let pkcs8 = Zeroizing::new(B64.encode(keypair.to_pkcs8().as_slice()));
        let record = IdentityRecord {
            user_id: user_id.to_string(),
            identity_type: identity_type.to_string(),
            label: identity_label(identity_type),
            public_key: keypair.public().to_b64(),
            wrapped_private_key: self.seal_secret(&pkcs8)?,
            created_at: Utc::now(),
        };

        match self.inner.remote.put_identity_record(record).await {
            Ok(id) => {
                info!(user_id, identity_type, record_id = %id, "identity created");
                Ok(keypair)
            }
            Err(StoreError::Conflict(reason)) => {
                warn!(user_id, identity_type, %reason, "identity created concurrently; adopting stored record");
                let stored = self
                    .inner
                    .remote
                    .get_identity_record(user_id, identity_type)
                    .await?
                    .ok_or_else(|| {
                        VaultError::IdentityUnavailable("conflicting record disappeared".into())
                    })?;
                self.restore_identity(&stored)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn identity_label(identity_type: &str) -> String {
    if identity_type == DEFAULT_IDENTITY_TYPE {
        DEFAULT_IDENTITY_LABEL.to_string()
    } else {
        format!("{identity_type} identity")
    }
}
