//! kx_crypto - Kylrix vault cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Key handles are opaque newtypes; raw bytes never leave this crate
//!   except through the explicitly privileged sync export.
//!
//! # Module layout
//! - `kdf`: PBKDF2-HMAC-SHA256 unwrap / verifier / session derivations
//! - `aead`: versioned XChaCha20-Poly1305 envelope, key wrapping
//! - `keys`: `SymmetricKey` and per-context `SessionSecret` handles
//! - `identity`: X25519 key-agreement identity, PKCS#8 export, fingerprints
//! - `error`: unified error type

pub mod aead;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod keys;

pub use error::CryptoError;
pub use identity::{IdentityKeyPair, PublicKeyBytes};
pub use kdf::KdfParams;
pub use keys::{SessionSecret, SymmetricKey};
