//! Vault state machine.
//!
//! One `Vault` per execution context. Clones share the same state, so the
//! handle is passed to every consumer instead of living in a global.
//!
//! Locking discipline:
//! - `ops` (tokio mutex) single-flights unlock, PIN setup and identity
//!   creation. `lock()` never takes it.
//! - `state` (parking_lot) is never held across an `.await`.
//! - `state` is always taken before `memo`.
//! - Every committing path captures the epoch on entry, before queueing on
//!   the operation mutex, and compares it again before committing; `lock()`
//!   bumps the epoch, so a lock issued mid-operation always wins.
//! - `import_raw_key` is synchronous and skips the operation mutex; the
//!   epoch check alone orders it against `lock()`.

use std::num::NonZeroUsize;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use kx_crypto::aead::{self, CONTENT_AAD};
use kx_crypto::kdf::derive_unwrap_key;
use kx_crypto::{CryptoError, IdentityKeyPair, PublicKeyBytes, SessionSecret, SymmetricKey};
use kx_store::local::VAULT_UNLOCKED_FLAG;
use kx_store::{LocalStore, RemoteKeyStore};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::VaultConfig;
use crate::error::VaultError;
use crate::memo::DecryptionMemo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VaultPhase {
    Locked,
    Unlocking,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultStatus {
    pub phase: VaultPhase,
    pub unlocked: bool,
    pub has_key: bool,
    pub has_identity: bool,
}

pub(crate) struct CachedIdentity {
    pub user_id: String,
    pub identity_type: String,
    pub keypair: IdentityKeyPair,
}

pub(crate) struct VaultState {
    pub phase: VaultPhase,
    pub mek: Option<Arc<SymmetricKey>>,
    pub identity: Option<CachedIdentity>,
    pub epoch: u64,
}

pub(crate) struct Shared {
    pub config: VaultConfig,
    pub remote: Arc<dyn RemoteKeyStore>,
    pub durable: Arc<dyn LocalStore>,
    pub session: Arc<dyn LocalStore>,
    pub session_secret: SessionSecret,
    pub ops: tokio::sync::Mutex<()>,
    pub state: RwLock<VaultState>,
    pub memo: Mutex<DecryptionMemo>,
}

#[derive(Clone)]
pub struct Vault {
    pub(crate) inner: Arc<Shared>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("user_id", &self.inner.config.user_id)
            .field("node_id", &self.inner.config.node_id)
            .field("status", &self.status())
            .finish()
    }
}

impl Vault {
    /// Build a locked vault. `durable` outlives the process; `session` must
    /// not outlive this execution context.
    pub fn new(
        config: VaultConfig,
        remote: Arc<dyn RemoteKeyStore>,
        durable: Arc<dyn LocalStore>,
        session: Arc<dyn LocalStore>,
    ) -> Result<Self, VaultError> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.memo_capacity)
            .ok_or_else(|| VaultError::Config("memoCapacity must be at least 1".into()))?;

        // A fresh vault holds no key, whatever the session tier says.
        session.remove(VAULT_UNLOCKED_FLAG)?;

        Ok(Self {
            inner: Arc::new(Shared {
                config,
                remote,
                durable,
                session,
                session_secret: SessionSecret::generate(),
                ops: tokio::sync::Mutex::new(()),
                state: RwLock::new(VaultState {
                    phase: VaultPhase::Locked,
                    mek: None,
                    identity: None,
                    epoch: 0,
                }),
                memo: Mutex::new(DecryptionMemo::new(capacity)),
            }),
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.inner.config
    }

    pub fn status(&self) -> VaultStatus {
        let state = self.inner.state.read();
        VaultStatus {
            phase: state.phase,
            unlocked: state.phase == VaultPhase::Unlocked,
            has_key: state.mek.is_some(),
            has_identity: state.identity.is_some(),
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.inner.state.read().phase == VaultPhase::Unlocked
    }

    /// Whether the session tier records an unlock in this execution context.
    pub fn unlocked_this_session(&self) -> bool {
        match self.inner.session.get(VAULT_UNLOCKED_FLAG) {
            Ok(flag) => flag.as_deref() == Some("true"),
            Err(e) => {
                warn!(error = %e, "failed to read session unlock flag");
                false
            }
        }
    }

    // ── Password unlock ───────────────────────────────────────────────────────

    pub async fn unlock_with_password(&self, password: &str) -> Result<(), VaultError> {
        let entry = self.epoch();
        let _ops = self.inner.ops.lock().await;
        let epoch = self.begin_unlock(entry)?;
        match self.unwrap_with_password(password).await {
            Ok(mek) => {
                self.commit_unlock(epoch, mek)?;
                info!(user_id = %self.inner.config.user_id, factor = "password", "vault unlocked");
                Ok(())
            }
            Err(e) => {
                self.abort_unlock(epoch);
                debug!(user_id = %self.inner.config.user_id, error = %e, "password unlock failed");
                Err(e)
            }
        }
    }

    async fn unwrap_with_password(&self, password: &str) -> Result<SymmetricKey, VaultError> {
        let user_id = &self.inner.config.user_id;
        let record = self
            .inner
            .remote
            .get_master_key_record(user_id)
            .await?
            .ok_or_else(|| {
                VaultError::RecordNotFound(format!("no password keychain entry for user {user_id}"))
            })?;

        let salt = decode_b64("master key salt", &record.salt)?;
        let password = Zeroizing::new(password.as_bytes().to_vec());
        let params = self.inner.config.kdf;
        let unwrap_key = run_blocking(move || derive_unwrap_key(&password, &salt, &params))
            .await?
            .map_err(|e| VaultError::UnlockFailed(e.to_string()))?;

        aead::unwrap_key(&unwrap_key, &record.wrapped_key).map_err(unwrap_error)
    }

    // ── Lock ──────────────────────────────────────────────────────────────────

    /// Drop all key material and return to `Locked`. Idempotent and
    /// infallible; teardown errors are logged.
    pub fn lock(&self) {
        let was = {
            let mut state = self.inner.state.write();
            let was = state.phase;
            state.epoch = state.epoch.wrapping_add(1);
            state.mek = None;
            state.identity = None;
            state.phase = VaultPhase::Locked;
            self.inner.memo.lock().clear();
            if let Err(e) = self.inner.session.remove(VAULT_UNLOCKED_FLAG) {
                warn!(error = %e, "failed to clear session unlock flag");
            }
            was
        };
        if was == VaultPhase::Locked {
            debug!(user_id = %self.inner.config.user_id, "lock on already locked vault");
        } else {
            info!(user_id = %self.inner.config.user_id, "vault locked");
        }
    }

    // ── Content ───────────────────────────────────────────────────────────────

    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let mek = self.current_key()?;
        Ok(aead::seal_string(&mek, plaintext, CONTENT_AAD)?)
    }

    /// Decrypt content sealed by [`Vault::encrypt`]. Repeat ciphertexts are
    /// served from the memo.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError> {
        let state = self.inner.state.read();
        let mek = unlocked_key(&state)?;

        if let Some(hit) = self.inner.memo.lock().get(ciphertext) {
            return Ok(hit);
        }

        let plaintext = aead::open_string(mek, ciphertext, CONTENT_AAD).map_err(decrypt_error)?;
        let out = plaintext.as_str().to_owned();
        // Still under the read lock: a lock() cannot interleave and leave this behind.
        self.inner.memo.lock().insert(ciphertext, plaintext);
        Ok(out)
    }

    /// Seal secret material (wrapped private keys). Same primitive as
    /// `encrypt`; kept separate so callers never route it through the memo.
    pub(crate) fn seal_secret(&self, plaintext: &str) -> Result<String, VaultError> {
        self.encrypt(plaintext)
    }

    pub(crate) fn open_secret(&self, ciphertext: &str) -> Result<Zeroizing<String>, VaultError> {
        let mek = self.current_key()?;
        aead::open_string(&mek, ciphertext, CONTENT_AAD).map_err(decrypt_error)
    }

    // ── Privileged key movement ───────────────────────────────────────────────

    /// Install a MEK received from a trusted sibling context. The caller is
    /// responsible for authorising the source.
    pub fn import_raw_key(&self, key_bytes: &[u8]) -> Result<(), VaultError> {
        let mek = SymmetricKey::from_bytes(key_bytes)?;
        let epoch = self.inner.state.read().epoch;
        self.commit_unlock(epoch, mek)?;
        info!(user_id = %self.inner.config.user_id, factor = "key_sync", "vault unlocked");
        Ok(())
    }

    /// Raw MEK copy for answering a key-sync request.
    pub(crate) fn export_for_sync(&self) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        Ok(self.current_key()?.export_for_sync())
    }

    // ── Identity handle ───────────────────────────────────────────────────────

    /// Public key of the cached identity, if `ensure_identity` has run since
    /// the last unlock.
    pub fn identity_public_key(&self) -> Option<PublicKeyBytes> {
        self.inner
            .state
            .read()
            .identity
            .as_ref()
            .map(|c| *c.keypair.public())
    }

    /// X25519 agreement between the cached identity and a peer.
    pub fn agree(&self, peer: &PublicKeyBytes) -> Result<Zeroizing<[u8; 32]>, VaultError> {
        let state = self.inner.state.read();
        unlocked_key(&state)?;
        let cached = state
            .identity
            .as_ref()
            .ok_or_else(|| VaultError::IdentityUnavailable("identity not loaded".into()))?;
        Ok(cached.keypair.diffie_hellman(peer))
    }

    // ── Transition helpers ────────────────────────────────────────────────────

    pub(crate) fn epoch(&self) -> u64 {
        self.inner.state.read().epoch
    }

    /// Enter `Unlocking` (only from `Locked`). `entry` is the epoch seen
    /// when the caller was invoked; a lock since then supersedes the attempt.
    pub(crate) fn begin_unlock(&self, entry: u64) -> Result<u64, VaultError> {
        let mut state = self.inner.state.write();
        if state.epoch != entry {
            debug!("unlock abandoned after lock while queued");
            return Err(VaultError::Superseded);
        }
        if state.phase == VaultPhase::Locked {
            state.phase = VaultPhase::Unlocking;
        }
        Ok(state.epoch)
    }

    pub(crate) fn abort_unlock(&self, epoch: u64) {
        let mut state = self.inner.state.write();
        if state.epoch == epoch && state.phase == VaultPhase::Unlocking {
            state.phase = VaultPhase::Locked;
        }
    }

    /// Install `mek` unless a lock has happened since `epoch` was captured.
    pub(crate) fn commit_unlock(&self, epoch: u64, mek: SymmetricKey) -> Result<(), VaultError> {
        let mut state = self.inner.state.write();
        if state.epoch != epoch {
            debug!("unlock result discarded after concurrent lock");
            return Err(VaultError::Superseded);
        }
        let rekey = state.mek.as_ref().is_some_and(|old| !old.ct_eq(&mek));
        if rekey {
            // Anything derived from the old key is stale.
            state.identity = None;
            self.inner.memo.lock().clear();
        }
        state.mek = Some(Arc::new(mek));
        state.phase = VaultPhase::Unlocked;
        if let Err(e) = self.inner.session.set(VAULT_UNLOCKED_FLAG, "true") {
            warn!(error = %e, "failed to set session unlock flag");
        }
        Ok(())
    }

    pub(crate) fn current_key(&self) -> Result<Arc<SymmetricKey>, VaultError> {
        let state = self.inner.state.read();
        unlocked_key(&state).map(Arc::clone)
    }
}

fn unlocked_key(state: &VaultState) -> Result<&Arc<SymmetricKey>, VaultError> {
    match (state.phase, state.mek.as_ref()) {
        (VaultPhase::Unlocked, Some(mek)) => Ok(mek),
        _ => Err(VaultError::VaultLocked),
    }
}

/// Errors unwrapping a key under a user-supplied secret: a failed tag means
/// the secret was wrong.
pub(crate) fn unwrap_error(e: CryptoError) -> VaultError {
    match e {
        CryptoError::AuthenticationFailed => VaultError::IncorrectSecret,
        CryptoError::MalformedCiphertext(m) | CryptoError::InvalidKey(m) => {
            VaultError::MalformedCiphertext(m)
        }
        other => VaultError::UnlockFailed(other.to_string()),
    }
}

/// Errors opening content under the trusted MEK: a failed tag means the data
/// is corrupt.
fn decrypt_error(e: CryptoError) -> VaultError {
    match e {
        CryptoError::AuthenticationFailed => VaultError::CorruptData,
        CryptoError::MalformedCiphertext(m) => VaultError::MalformedCiphertext(m),
        other => VaultError::Crypto(other),
    }
}

pub(crate) fn decode_b64(what: &str, value: &str) -> Result<Vec<u8>, VaultError> {
    B64.decode(value)
        .map_err(|e| VaultError::MalformedCiphertext(format!("{what}: {e}")))
}

/// Run a KDF stretch off the async executor.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, VaultError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::UnlockFailed(format!("key derivation task failed: {e}")))
}
