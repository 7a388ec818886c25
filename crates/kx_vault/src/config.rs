//! Vault configuration.
//!
//! Loaded from a camelCase JSON document; every field has a default so a
//! partial file (or none) is valid.

use std::collections::BTreeSet;
use std::path::Path;

use kx_crypto::KdfParams;
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

pub const DEFAULT_NODE_ID: &str = "connect";
pub const DEFAULT_IDENTITY_NODE: &str = "id";
pub const DEFAULT_MEMO_CAPACITY: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VaultConfig {
    /// Account whose keychain / identity rows this vault reads.
    pub user_id: String,
    /// Scopes the durable PIN verifier to this device.
    pub device_id: String,
    /// This execution context's name on the directive bus.
    pub node_id: String,
    /// The authoritative context that may push key material.
    pub identity_node: String,
    /// Nodes allowed to push raw keys to us, or to request ours.
    pub trusted_nodes: BTreeSet<String>,
    /// Answer `REQUEST_KEY_SYNC` when this node is the identity node.
    pub serve_key_sync: bool,
    pub memo_capacity: usize,
    pub kdf: KdfParams,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            device_id: "default".to_string(),
            node_id: DEFAULT_NODE_ID.to_string(),
            identity_node: DEFAULT_IDENTITY_NODE.to_string(),
            trusted_nodes: BTreeSet::from([DEFAULT_IDENTITY_NODE.to_string()]),
            serve_key_sync: false,
            memo_capacity: DEFAULT_MEMO_CAPACITY,
            kdf: KdfParams::default(),
        }
    }
}

impl VaultConfig {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, VaultError> {
        let raw = std::fs::read(path)
            .map_err(|e| VaultError::Config(format!("read {}: {e}", path.display())))?;
        serde_json::from_slice(&raw)
            .map_err(|e| VaultError::Config(format!("parse {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), VaultError> {
        if self.user_id.trim().is_empty() {
            return Err(VaultError::Config("userId must be set".into()));
        }
        if self.device_id.trim().is_empty() || self.node_id.trim().is_empty() {
            return Err(VaultError::Config("deviceId and nodeId must be set".into()));
        }
        if self.identity_node.trim().is_empty() {
            return Err(VaultError::Config("identityNode must be set".into()));
        }
        if self.memo_capacity == 0 {
            return Err(VaultError::Config("memoCapacity must be at least 1".into()));
        }
        self.kdf
            .validate()
            .map_err(|e| VaultError::Config(e.to_string()))
    }

    pub fn is_identity_node(&self) -> bool {
        self.node_id == self.identity_node
    }

    pub fn trusts(&self, node: &str) -> bool {
        node != self.node_id && self.trusted_nodes.contains(node)
    }
}
