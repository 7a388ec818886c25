//! Key derivation functions
//!
//! All three derivations are PBKDF2-HMAC-SHA256 with independently tunable
//! iteration counts:
//!
//! `derive_unwrap_key`: master password → key that unwraps the MEK.
//! `derive_verifier_hash`: PIN → local comparison hash. Never used as a key.
//! `derive_session_key`: PIN || per-context session secret → session key.
//!   The session secret carries the entropy, so a low count is acceptable.

use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::{SessionSecret, SymmetricKey, KEY_LEN};

pub const SALT_LEN: usize = 16;
pub const MIN_SALT_LEN: usize = 16;
pub const VERIFIER_LEN: usize = 32;

pub const DEFAULT_UNWRAP_ITERATIONS: u32 = 600_000;
pub const DEFAULT_VERIFIER_ITERATIONS: u32 = 100_000;
pub const DEFAULT_SESSION_ITERATIONS: u32 = 10_000;

// ── Parameters ────────────────────────────────────────────────────────────────

/// Iteration counts. Defense parameters, not protocol constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KdfParams {
    pub unwrap_iterations: u32,
    pub verifier_iterations: u32,
    pub session_iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            unwrap_iterations: DEFAULT_UNWRAP_ITERATIONS,
            verifier_iterations: DEFAULT_VERIFIER_ITERATIONS,
            session_iterations: DEFAULT_SESSION_ITERATIONS,
        }
    }
}

impl KdfParams {
    /// The verifier and session stretches must stay cheaper than the unwrap
    /// stretch; a zero count is never valid.
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.unwrap_iterations == 0
            || self.verifier_iterations == 0
            || self.session_iterations == 0
        {
            return Err(CryptoError::KeyDerivation(
                "iteration counts must be non-zero".into(),
            ));
        }
        if self.verifier_iterations >= self.unwrap_iterations
            || self.session_iterations >= self.unwrap_iterations
        {
            return Err(CryptoError::KeyDerivation(
                "verifier and session iterations must be below unwrap iterations".into(),
            ));
        }
        Ok(())
    }
}

// ── Derivations ───────────────────────────────────────────────────────────────

fn stretch(secret: &[u8], salt: &[u8], iterations: u32, out: &mut [u8]) -> Result<(), CryptoError> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::KeyDerivation(format!(
            "salt must be at least {MIN_SALT_LEN} bytes, got {}",
            salt.len()
        )));
    }
    if iterations == 0 {
        return Err(CryptoError::KeyDerivation("iteration count is zero".into()));
    }
    pbkdf2_hmac::<Sha256>(secret, salt, iterations, out);
    Ok(())
}

/// Derive the key that wraps / unwraps the MEK from a master password.
pub fn derive_unwrap_key(
    secret: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<SymmetricKey, CryptoError> {
    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    stretch(secret, salt, params.unwrap_iterations, out.as_mut())?;
    Ok(SymmetricKey::from_array(*out))
}

/// Comparison hash for local PIN validation.
pub fn derive_verifier_hash(
    secret: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<[u8; VERIFIER_LEN], CryptoError> {
    let mut out = [0u8; VERIFIER_LEN];
    stretch(secret, salt, params.verifier_iterations, &mut out)?;
    Ok(out)
}

/// Session key from a short secret mixed with the context's session secret.
pub fn derive_session_key(
    secret: &[u8],
    session_secret: &SessionSecret,
    salt: &[u8],
    params: &KdfParams,
) -> Result<SymmetricKey, CryptoError> {
    let session = session_secret.as_bytes();
    let mut material = Zeroizing::new(Vec::with_capacity(secret.len() + session.len()));
    material.extend_from_slice(secret);
    material.extend_from_slice(session);

    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    stretch(&material, salt, params.session_iterations, out.as_mut())?;
    Ok(SymmetricKey::from_array(*out))
}

/// Fresh random 16-byte salt. Not secret; stored beside the wrapped blob.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}
