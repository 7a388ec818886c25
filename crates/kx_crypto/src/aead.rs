//! Authenticated Encryption with Associated Data
//!
//! Uses XChaCha20-Poly1305 (192-bit nonce).
//! Key size: 32 bytes.  Nonce: 24 bytes (random per call).  Tag: 16 bytes.
//!
//! Envelope wire format (then base64 for storage / transport):
//!   [ version (1 byte) | nonce (24 bytes) | ciphertext + tag ]
//!
//! The version byte selects the nonce size and cipher, so the layout is
//! parsed explicitly instead of sliced at fixed offsets.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::SymmetricKey;

pub const ENVELOPE_V1: u8 = 1;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// Associated data for conversation content and identity key blobs.
pub const CONTENT_AAD: &[u8] = b"kx-content-v1";
/// Associated data for MEK wrapping (password and PIN session paths).
pub const KEY_WRAP_AAD: &[u8] = b"kx-key-wrap-v1";

// ── Envelope ──────────────────────────────────────────────────────────────────

/// Borrowed view over a parsed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub version: u8,
    pub nonce: &'a [u8; NONCE_LEN],
    pub ciphertext: &'a [u8],
}

impl<'a> Envelope<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, CryptoError> {
        let (&version, rest) = data
            .split_first()
            .ok_or_else(|| CryptoError::MalformedCiphertext("empty envelope".into()))?;
        if version != ENVELOPE_V1 {
            return Err(CryptoError::MalformedCiphertext(format!(
                "unsupported envelope version {version}"
            )));
        }
        if rest.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::MalformedCiphertext(format!(
                "envelope truncated: {} bytes after version",
                rest.len()
            )));
        }
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        let nonce: &[u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| CryptoError::MalformedCiphertext("nonce length".into()))?;
        Ok(Self {
            version,
            nonce,
            ciphertext,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + NONCE_LEN + self.ciphertext.len());
        out.push(self.version);
        out.extend_from_slice(self.nonce);
        out.extend_from_slice(self.ciphertext);
        out
    }
}

// ── Binary API ────────────────────────────────────────────────────────────────

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::AeadEncrypt)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let nonce: &[u8; NONCE_LEN] = nonce
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::AeadEncrypt)?;
    Ok(Envelope {
        version: ENVELOPE_V1,
        nonce,
        ciphertext: &ciphertext,
    }
    .to_bytes())
}

/// Decrypt an envelope. Structural problems and tag failures are reported
/// separately; only the latter implies a wrong key.
pub fn open(key: &SymmetricKey, data: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let envelope = Envelope::parse(data)?;
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::InvalidKey("AEAD key length".into()))?;
    let plaintext = cipher
        .decrypt(
            XNonce::from_slice(envelope.nonce),
            Payload {
                msg: envelope.ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    Ok(Zeroizing::new(plaintext))
}

// ── String API ────────────────────────────────────────────────────────────────

/// Encrypt a UTF-8 string into a single opaque base64 string.
pub fn seal_string(key: &SymmetricKey, plaintext: &str, aad: &[u8]) -> Result<String, CryptoError> {
    Ok(STANDARD.encode(seal(key, plaintext.as_bytes(), aad)?))
}

pub fn open_string(
    key: &SymmetricKey,
    encoded: &str,
    aad: &[u8],
) -> Result<Zeroizing<String>, CryptoError> {
    let data = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::MalformedCiphertext(format!("base64: {e}")))?;
    let plaintext = open(key, &data, aad)?;
    let text = std::str::from_utf8(&plaintext)
        .map_err(|_| CryptoError::MalformedCiphertext("plaintext is not valid UTF-8".into()))?;
    Ok(Zeroizing::new(text.to_owned()))
}

// ── Key wrapping ──────────────────────────────────────────────────────────────

/// Encrypt a 32-byte key with another key (key transport / storage).
pub fn wrap_key(wrapping: &SymmetricKey, key: &SymmetricKey) -> Result<String, CryptoError> {
    Ok(STANDARD.encode(seal(wrapping, key.as_bytes(), KEY_WRAP_AAD)?))
}

/// Decrypt a wrapped key.
pub fn unwrap_key(wrapping: &SymmetricKey, wrapped: &str) -> Result<SymmetricKey, CryptoError> {
    let data = STANDARD
        .decode(wrapped.trim())
        .map_err(|e| CryptoError::MalformedCiphertext(format!("base64: {e}")))?;
    let plaintext = open(wrapping, &data, KEY_WRAP_AAD)?;
    SymmetricKey::from_bytes(&plaintext)
}
