//! Row and artifact shapes. Binary fields are standard base64 strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RecordId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeychainEntryKind {
    Password,
    Passkey,
}

/// One unlock factor in the `keychain` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeychainEntry {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: KeychainEntryKind,
    pub salt: String,
    pub wrapped_key: String,
    pub created_at: DateTime<Utc>,
}

/// The `password` keychain row: MEK wrapped under the master password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterKeyRecord {
    pub user_id: String,
    pub salt: String,
    pub wrapped_key: String,
}

impl From<&KeychainEntry> for MasterKeyRecord {
    fn from(entry: &KeychainEntry) -> Self {
        Self {
            user_id: entry.user_id.clone(),
            salt: entry.salt.clone(),
            wrapped_key: entry.wrapped_key.clone(),
        }
    }
}

/// Row in the `identities` table. At most one per `(user_id, identity_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub user_id: String,
    pub identity_type: String,
    pub label: String,
    pub public_key: String,
    /// PKCS#8 private key (base64) sealed under the MEK.
    pub wrapped_private_key: String,
    pub created_at: DateTime<Utc>,
}

/// Durable-tier PIN check value. Never used to derive the MEK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinVerifier {
    pub salt: String,
    pub hash: String,
}

/// Session-tier MEK copy wrapped under `(PIN, session secret, session_salt)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralSessionRecord {
    pub session_salt: String,
    pub wrapped_mek: String,
}
