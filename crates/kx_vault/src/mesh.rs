//! Directive wire types and the in-process bus.
//!
//! Directives are plain JSON messages exchanged between execution contexts:
//!
//! ```json
//! { "kind": "COMMAND", "sourceNode": "id", "targetNode": "connect",
//!   "payload": { "action": "SYNC_MASTERPASS_KEY", "keyBytes": "<base64>" } }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

pub const DEFAULT_BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectiveKind {
    Command,
    RpcRequest,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectiveAction {
    LockSystem,
    SyncMasterpassKey {
        /// Raw MEK, standard base64.
        #[serde(rename = "keyBytes")]
        key_bytes: String,
    },
    RequestKeySync,
}

impl fmt::Debug for DirectiveAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LockSystem => f.write_str("LockSystem"),
            Self::SyncMasterpassKey { .. } => f.write_str("SyncMasterpassKey(<redacted>)"),
            Self::RequestKeySync => f.write_str("RequestKeySync"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directive {
    pub kind: DirectiveKind,
    pub source_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node: Option<String>,
    pub payload: DirectiveAction,
}

impl Directive {
    /// Broadcast `LOCK_SYSTEM` to every context.
    pub fn lock_system(source: &str) -> Self {
        Self {
            kind: DirectiveKind::Command,
            source_node: source.to_string(),
            target_node: None,
            payload: DirectiveAction::LockSystem,
        }
    }

    pub fn sync_key(source: &str, target: &str, key_bytes: String) -> Self {
        Self {
            kind: DirectiveKind::Command,
            source_node: source.to_string(),
            target_node: Some(target.to_string()),
            payload: DirectiveAction::SyncMasterpassKey { key_bytes },
        }
    }

    pub fn request_key_sync(source: &str, target: &str) -> Self {
        Self {
            kind: DirectiveKind::RpcRequest,
            source_node: source.to_string(),
            target_node: Some(target.to_string()),
            payload: DirectiveAction::RequestKeySync,
        }
    }

    /// Untargeted directives are for everyone.
    pub fn is_for(&self, node: &str) -> bool {
        self.target_node.as_deref().map_or(true, |t| t == node)
    }
}

/// Message channel between execution contexts.
pub trait DirectiveBus: Send + Sync {
    fn publish(&self, directive: Directive);
    fn subscribe(&self) -> broadcast::Receiver<Directive>;
}

/// In-process bus: every subscriber sees every directive, including its own.
#[derive(Debug, Clone)]
pub struct LocalMesh {
    tx: broadcast::Sender<Directive>,
}

impl LocalMesh {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for LocalMesh {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl DirectiveBus for LocalMesh {
    fn publish(&self, directive: Directive) {
        // No subscribers is not an error: nobody else is listening yet.
        if self.tx.send(directive).is_err() {
            trace!("directive published with no subscribers");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Directive> {
        self.tx.subscribe()
    }
}
