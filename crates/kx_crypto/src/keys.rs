//! Opaque key handles.
//!
//! `SymmetricKey` is the in-memory form of every 256-bit key the vault
//! touches: the MEK, password-derived unwrap keys and PIN session keys.
//! `SessionSecret` is the per-context random value mixed into PIN session
//! keys; it is generated once and never persisted.

use std::fmt;

use rand::{rngs::OsRng, RngCore};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const SESSION_SECRET_LEN: usize = 32;

/// 32-byte symmetric key. Zeroized on drop, never printed.
#[derive(ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Import raw key bytes (key sync, provisioning).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "symmetric key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub(crate) fn from_array(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Privileged: raw copy for pushing the key to a trusted sibling context.
    /// Nothing else may call this.
    pub fn export_for_sync(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.0.to_vec())
    }

    /// Same key material, compared in constant time.
    pub fn ct_eq(&self, other: &SymmetricKey) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

#[inline(never)]
fn constant_time_ne(a: &[u8], b: &[u8]) -> u8 {
    a.iter().zip(b).fold(0, |acc, (x, y)| acc | (x ^ y))
}

/// Compares byte strings in constant time (for equal lengths).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && constant_time_ne(a, b) == 0
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Per-context secret mixed into PIN-derived session keys.
#[derive(ZeroizeOnDrop)]
pub struct SessionSecret([u8; SESSION_SECRET_LEN]);

impl SessionSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; SESSION_SECRET_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionSecret(<redacted>)")
    }
}
