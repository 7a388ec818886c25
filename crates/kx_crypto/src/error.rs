use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    /// The envelope could not be split into version / nonce / ciphertext.
    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Tag mismatch: wrong key or tampered ciphertext.
    #[error("AEAD authentication failed (tag mismatch)")]
    AuthenticationFailed,
}
