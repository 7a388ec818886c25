//! End-to-end identity keys
//!
//! Each user has one long-term X25519 key-agreement keypair per identity
//! type. The public half is published raw (32 bytes, base64). The private
//! half is exported as PKCS#8 DER (RFC 8410) so other clients of the same
//! account can import it, and is only ever stored sealed under the MEK.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const PRIVATE_KEY_LEN: usize = 32;

/// `OneAsymmetricKey { version 0, algorithm id-X25519, privateKey OCTET STRING }`
/// with a 32-byte key is a fixed 16-byte header followed by the key.
const PKCS8_X25519_PREFIX: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x04, 0x22, 0x04, 0x20,
];

// ── Public key ────────────────────────────────────────────────────────────────

/// Raw X25519 public key, base64 on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyBytes(pub [u8; PUBLIC_KEY_LEN]);

impl PublicKeyBytes {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    pub fn to_b64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("public key base64: {e}")))?;
        let arr: [u8; PUBLIC_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "Public key must be {PUBLIC_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Human-readable fingerprint: BLAKE3 of the public key, truncated to
    /// 20 bytes, hex-encoded in groups of 4 for display.
    ///
    /// Example: "a1b2 c3d4 e5f6 7890 abcd ef01 2345 6789 0abc def0"
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        let hex = hex::encode(&hash.as_bytes()[..20]);
        hex.as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ── Keypair ───────────────────────────────────────────────────────────────────

/// Long-term key-agreement keypair. The secret zeroizes on drop.
pub struct IdentityKeyPair {
    public: PublicKeyBytes,
    secret: StaticSecret,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self::from_secret(secret)
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKeyBytes(PublicKey::from(&secret).to_bytes());
        Self { public, secret }
    }

    pub fn public(&self) -> &PublicKeyBytes {
        &self.public
    }

    /// Portable PKCS#8 DER export of the private key.
    pub fn to_pkcs8(&self) -> Zeroizing<Vec<u8>> {
        let mut der = Zeroizing::new(Vec::with_capacity(PKCS8_X25519_PREFIX.len() + PRIVATE_KEY_LEN));
        der.extend_from_slice(&PKCS8_X25519_PREFIX);
        der.extend_from_slice(self.secret.as_bytes());
        der
    }

    pub fn from_pkcs8(der: &[u8]) -> Result<Self, CryptoError> {
        let key = der
            .strip_prefix(PKCS8_X25519_PREFIX.as_slice())
            .ok_or_else(|| CryptoError::InvalidKey("not an X25519 PKCS#8 private key".into()))?;
        let arr: [u8; PRIVATE_KEY_LEN] = key.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "X25519 private key must be {PRIVATE_KEY_LEN} bytes, got {}",
                key.len()
            ))
        })?;
        let arr = Zeroizing::new(arr);
        Ok(Self::from_secret(StaticSecret::from(*arr)))
    }

    /// X25519 shared secret with a peer's public key.
    pub fn diffie_hellman(&self, peer: &PublicKeyBytes) -> Zeroizing<[u8; 32]> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer.0));
        Zeroizing::new(shared.to_bytes())
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public.to_b64())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkcs8_roundtrip_preserves_public_key() {
        let pair = IdentityKeyPair::generate();
        let der = pair.to_pkcs8();
        assert_eq!(der.len(), 48);
        let restored = IdentityKeyPair::from_pkcs8(&der).unwrap();
        assert_eq!(restored.public(), pair.public());
    }

    #[test]
    fn pkcs8_rejects_foreign_der() {
        let mut der = IdentityKeyPair::generate().to_pkcs8();
        der[9] = 0x70; // id-Ed25519 OID arc
        assert!(IdentityKeyPair::from_pkcs8(&der).is_err());
        assert!(IdentityKeyPair::from_pkcs8(&PKCS8_X25519_PREFIX).is_err());
    }

    #[test]
    fn key_agreement_is_symmetric() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        assert_eq!(
            *alice.diffie_hellman(bob.public()),
            *bob.diffie_hellman(alice.public())
        );
    }

    #[test]
    fn public_key_b64_is_length_checked() {
        let pair = IdentityKeyPair::generate();
        let b64 = pair.public().to_b64();
        assert_eq!(PublicKeyBytes::from_b64(&b64).unwrap(), *pair.public());
        assert!(PublicKeyBytes::from_b64(&STANDARD.encode([1u8; 31])).is_err());
    }

    #[test]
    fn fingerprint_format() {
        let fp = PublicKeyBytes([0u8; 32]).fingerprint();
        assert_eq!(fp.split(' ').count(), 10);
        assert!(fp.split(' ').all(|g| g.len() == 4));
    }
}
