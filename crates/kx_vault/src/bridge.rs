//! Directive bus ↔ vault actor.
//!
//! The bridge owns one subscription and processes directives in order on a
//! spawned task. It is the only path by which a MEK enters this context
//! without local user interaction, so raw-key imports are honored only from
//! the configured trusted nodes.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

use crate::error::VaultError;
use crate::mesh::{Directive, DirectiveAction, DirectiveBus};
use crate::vault::{Vault, VaultPhase};

pub struct DirectiveBridge {
    vault: Vault,
    bus: Arc<dyn DirectiveBus>,
    task: JoinHandle<()>,
}

impl DirectiveBridge {
    /// Subscribe, start the handler task and, on a non-authoritative node
    /// that starts locked, ask the identity node for the key.
    ///
    /// Must be called inside a tokio runtime.
    pub fn init(vault: Vault, bus: Arc<dyn DirectiveBus>) -> Self {
        let rx = bus.subscribe();
        let handler = Handler {
            vault: vault.clone(),
            bus: bus.clone(),
        };
        let task = tokio::spawn(handler.run(rx));

        let config = vault.config();
        info!(node = %config.node_id, identity_node = %config.identity_node, "directive bridge started");
        if !config.is_identity_node() && vault.status().phase == VaultPhase::Locked {
            debug!(node = %config.node_id, "requesting key sync from identity node");
            bus.publish(Directive::request_key_sync(
                &config.node_id,
                &config.identity_node,
            ));
        }

        Self { vault, bus, task }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// Lock here and tell every other context to lock.
    pub fn lock_all(&self) {
        self.vault.lock();
        self.bus
            .publish(Directive::lock_system(&self.vault.config().node_id));
    }
}

impl Drop for DirectiveBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Handler {
    vault: Vault,
    bus: Arc<dyn DirectiveBus>,
}

impl Handler {
    async fn run(self, mut rx: broadcast::Receiver<Directive>) {
        loop {
            match rx.recv().await {
                Ok(directive) => self.handle(directive),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // A dropped directive may have been LOCK_SYSTEM; fail closed.
                    warn!(missed = n, "directive bridge lagged; locking vault");
                    self.vault.lock();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("directive bus closed, bridge exiting");
                    return;
                }
            }
        }
    }

    fn handle(&self, directive: Directive) {
        let config = self.vault.config();
        let node = config.node_id.as_str();
        if directive.source_node == node || !directive.is_for(node) {
            trace!(source = %directive.source_node, "directive not for this node");
            return;
        }
        let source = directive.source_node.as_str();

        match &directive.payload {
            DirectiveAction::LockSystem => {
                info!(node, source, "LOCK_SYSTEM received");
                self.vault.lock();
            }
            DirectiveAction::SyncMasterpassKey { key_bytes } => {
                if !config.trusts(source) {
                    warn!(node, source, "rejected key sync from untrusted node");
                    return;
                }
                let raw = match B64.decode(key_bytes) {
                    Ok(raw) => Zeroizing::new(raw),
                    Err(e) => {
                        warn!(node, source, error = %e, "dropped key sync with malformed key bytes");
                        return;
                    }
                };
                match self.vault.import_raw_key(&raw) {
                    Ok(()) => info!(node, source, "vault key synced"),
                    Err(e) => warn!(node, source, error = %e, "key sync import failed"),
                }
            }
            DirectiveAction::RequestKeySync => self.serve_key_sync(source),
        }
    }

    fn serve_key_sync(&self, requester: &str) {
        let config = self.vault.config();
        if !config.is_identity_node() || !config.serve_key_sync {
            trace!(requester, "not serving key sync on this node");
            return;
        }
        if !config.trusts(requester) {
            warn!(requester, "refused key sync request from untrusted node");
            return;
        }
        match self.vault.export_for_sync() {
            Ok(raw) => {
                self.bus.publish(Directive::sync_key(
                    &config.node_id,
                    requester,
                    B64.encode(raw.as_slice()),
                ));
                info!(requester, "answered key sync request");
            }
            Err(VaultError::VaultLocked) => {
                debug!(requester, "key sync requested while locked");
            }
            Err(e) => warn!(requester, error = %e, "key sync export failed"),
        }
    }
}
