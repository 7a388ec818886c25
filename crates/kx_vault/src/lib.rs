//! kx_vault - local encryption vault and key-lifecycle manager
//!
//! The vault holds the user's master encryption key (MEK) in memory only.
//! It is unlocked by the master password or, within one session, by a
//! numeric PIN; it seals and opens conversation content, owns the user's
//! X25519 E2E identity, and follows lock / key-sync directives from sibling
//! contexts through the directive bridge.
//!
//! # Module layout
//! - `vault`: state machine, encrypt / decrypt, lock
//! - `pin`: PIN provisioning and quick unlock
//! - `identity`: ensure-identity (load or create the E2E keypair)
//! - `passkey`: device passkey hook (not wired yet)
//! - `memo`: bounded decryption memo
//! - `mesh`: directive wire types and the in-process bus
//! - `bridge`: directive bus ↔ vault actor
//! - `provision`: master key setup
//! - `config`: `VaultConfig`
//! - `error`: `VaultError`

pub mod bridge;
pub mod config;
pub mod error;
pub mod identity;
pub mod memo;
pub mod mesh;
pub mod passkey;
pub mod pin;
pub mod provision;
pub mod vault;

pub use bridge::DirectiveBridge;
pub use config::VaultConfig;
pub use error::VaultError;
pub use identity::{DEFAULT_IDENTITY_LABEL, DEFAULT_IDENTITY_TYPE};
pub use mesh::{Directive, DirectiveAction, DirectiveBus, DirectiveKind, LocalMesh};
pub use vault::{Vault, VaultPhase, VaultStatus};
