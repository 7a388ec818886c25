//! kx_store - Key Storage Adapter for the Kylrix vault
//!
//! # Tiers
//! - Remote row store: the `keychain` and `identities` tables, reached
//!   through [`RemoteKeyStore`]. Rows only ever hold salts, public keys and
//!   ciphertext; unwrap keys are never persisted.
//! - Durable local store: survives restarts (PIN verifier).
//! - Session local store: dies with the execution context (ephemeral
//!   PIN-wrapped MEK, unlocked-this-session flag).

pub mod error;
pub mod fsutil;
pub mod local;
pub mod models;
pub mod remote;

pub use error::StoreError;
pub use local::{FileLocalStore, LocalStore, MemoryLocalStore};
pub use models::{
    EphemeralSessionRecord, IdentityRecord, KeychainEntry, KeychainEntryKind, MasterKeyRecord,
    PinVerifier, RecordId,
};
pub use remote::{JsonFileRemoteStore, MemoryRemoteStore, RemoteKeyStore};
