//! PIN quick unlock.
//!
//! Two artifacts back the PIN path:
//! - a `PinVerifier` in the durable tier (salted verifier hash, per device
//!   and account), checked first;
//! - an `EphemeralSessionRecord` in the session tier: the MEK re-wrapped
//!   under a key stretched from the PIN plus this context's session secret.
//!
//! Losing either one (new session, wiped storage) makes the PIN path
//! unavailable; the user falls back to the master password.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use kx_crypto::aead;
use kx_crypto::kdf::{derive_session_key, derive_verifier_hash, generate_salt};
use kx_crypto::keys::constant_time_eq;
use kx_crypto::{CryptoError, SymmetricKey};
use kx_store::local::{load_json, pin_verifier_key, store_json, EPHEMERAL_SESSION_KEY};
use kx_store::{EphemeralSessionRecord, PinVerifier};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::VaultError;
use crate::vault::{decode_b64, run_blocking, unwrap_error, Vault};

pub const MIN_PIN_LEN: usize = 4;
pub const MAX_PIN_LEN: usize = 8;

pub fn validate_pin(pin: &str) -> Result<(), VaultError> {
    if !(MIN_PIN_LEN..=MAX_PIN_LEN).contains(&pin.len()) {
        return Err(VaultError::InvalidPin(format!(
            "must be {MIN_PIN_LEN}-{MAX_PIN_LEN} digits"
        )));
    }
    if !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VaultError::InvalidPin("digits only".into()));
    }
    Ok(())
}

impl Vault {
    fn pin_verifier_key(&self) -> String {
        pin_verifier_key(&self.inner.config.device_id, &self.inner.config.user_id)
    }

    /// Provision the PIN for this device and wrap the current MEK for this
    /// session. Requires `Unlocked`.
    pub async fn setup_pin(&self, pin: &str) -> Result<(), VaultError> {
        validate_pin(pin)?;
        let epoch = self.epoch();
        let _ops = self.inner.ops.lock().await;
        if self.epoch() != epoch {
            return Err(VaultError::Superseded);
        }
        let mek = self.current_key()?;

        let verifier_salt = generate_salt();
        let session_salt = generate_salt();
        let secret = Zeroizing::new(pin.as_bytes().to_vec());
        let inner = self.inner.clone();
        let (hash, session_key) = run_blocking(move || -> Result<_, CryptoError> {
            let params = &inner.config.kdf;
            let hash = derive_verifier_hash(&secret, &verifier_salt, params)?;
            let key = derive_session_key(&secret, &inner.session_secret, &session_salt, params)?;
            Ok((hash, key))
        })
        .await??;

        let wrapped_mek = aead::wrap_key(&session_key, &mek)?;
        if self.epoch() != epoch {
            return Err(VaultError::Superseded);
        }

        store_json(
            self.inner.durable.as_ref(),
            &self.pin_verifier_key(),
            &PinVerifier {
                salt: B64.encode(verifier_salt),
                hash: B64.encode(hash),
            },
        )?;
        store_json(
            self.inner.session.as_ref(),
            EPHEMERAL_SESSION_KEY,
            &EphemeralSessionRecord {
                session_salt: B64.encode(session_salt),
                wrapped_mek,
            },
        )?;
        info!(user_id = %self.inner.config.user_id, device_id = %self.inner.config.device_id, "PIN configured");
        Ok(())
    }

    pub async fn unlock_with_pin(&self, pin: &str) -> Result<(), VaultError> {
        let entry = self.epoch();
        let _ops = self.inner.ops.lock().await;
        let epoch = self.begin_unlock(entry)?;

        let verifier: Option<PinVerifier> =
            load_json(self.inner.durable.as_ref(), &self.pin_verifier_key())?;
        let record: Option<EphemeralSessionRecord> =
            load_json(self.inner.session.as_ref(), EPHEMERAL_SESSION_KEY)?;
        let (Some(verifier), Some(record)) = (verifier, record) else {
            debug!(user_id = %self.inner.config.user_id, "PIN unlock unavailable");
            return Err(VaultError::PinUnavailable);
        };

        match self.unwrap_with_pin(pin, &verifier, &record).await {
            Ok(mek) => {
                self.commit_unlock(epoch, mek)?;
                info!(user_id = %self.inner.config.user_id, factor = "pin", "vault unlocked");
                Ok(())
            }
            Err(e) => {
                self.abort_unlock(epoch);
                Err(e)
            }
        }
    }

    async fn unwrap_with_pin(
        &self,
        pin: &str,
        verifier: &PinVerifier,
        record: &EphemeralSessionRecord,
    ) -> Result<SymmetricKey, VaultError> {
        let verifier_salt = decode_b64("PIN verifier salt", &verifier.salt)?;
        let session_salt = decode_b64("session salt", &record.session_salt)?;
        let expected = verifier.hash.clone();
        let secret = Zeroizing::new(pin.as_bytes().to_vec());
        let inner = self.inner.clone();

        // The session key is only derived once the verifier matches.
        let session_key = run_blocking(move || -> Result<Option<SymmetricKey>, CryptoError> {
            let params = &inner.config.kdf;
            let hash = derive_verifier_hash(&secret, &verifier_salt, params)?;
            if !constant_time_eq(B64.encode(hash).as_bytes(), expected.as_bytes()) {
                return Ok(None);
            }
            derive_session_key(&secret, &inner.session_secret, &session_salt, params).map(Some)
        })
        .await?
        .map_err(|e| VaultError::UnlockFailed(e.to_string()))?
        .ok_or(VaultError::IncorrectSecret)?;

        aead::unwrap_key(&session_key, &record.wrapped_mek).map_err(unwrap_error)
    }

    /// Whether a PIN verifier exists for this device and account.
    pub fn is_pin_set(&self) -> bool {
        match self.inner.durable.get(&self.pin_verifier_key()) {
            Ok(v) => v.is_some(),
            Err(e) => {
                warn!(error = %e, "failed to read PIN verifier");
                false
            }
        }
    }

    /// Remove both PIN artifacts.
    pub fn remove_pin(&self) -> Result<(), VaultError> {
        self.inner.durable.remove(&self.pin_verifier_key())?;
        self.inner.session.remove(EPHEMERAL_SESSION_KEY)?;
        info!(user_id = %self.inner.config.user_id, "PIN removed");
        Ok(())
    }
}
