use thiserror::Error;

use kx_crypto::CryptoError;
use kx_store::StoreError;

#[derive(Debug, Error)]
pub enum VaultError {
    /// No keychain row; the caller should start the setup flow.
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Wrong password or PIN. Re-prompt.
    #[error("Incorrect password or PIN")]
    IncorrectSecret,

    /// PIN verifier or ephemeral session record missing; use the password.
    #[error("PIN unlock unavailable in this session")]
    PinUnavailable,

    #[error("Unlock factor unavailable: {0}")]
    FactorUnavailable(String),

    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Authentication failed under the trusted MEK.
    #[error("Ciphertext failed authentication under the vault key (corrupt or tampered data)")]
    CorruptData,

    #[error("Vault is locked; unlock first")]
    VaultLocked,

    #[error("E2E identity unavailable: {0}")]
    IdentityUnavailable(String),

    #[error("Unlock failed: {0}")]
    UnlockFailed(String),

    /// A lock landed while this operation was in flight; its result was discarded.
    #[error("Operation superseded by a concurrent lock")]
    Superseded,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Configuration error: {0}")]
    Config(String),
}
