//! Vault unlock / lock lifecycle.
//!
//! Tests cover:
//!  1. Password unlock over a known MEK and content round-trip
//!  2. Wrong password, missing record, malformed record, bad salt
//!  3. Lock drops everything; operations afterwards are `VaultLocked`
//!  4. PIN setup and quick unlock, including the unavailable cases
//!  5. Passkey hook and presence probe
//!  6. A lock issued mid-unlock wins, including over a queued unlock
//!  7. Provisioning refuses to overwrite a master key

mod common;

use std::sync::Arc;

use chrono::Utc;
use common::*;
use kx_store::local::{pin_verifier_key, EPHEMERAL_SESSION_KEY};
use kx_store::{
    KeychainEntry, KeychainEntryKind, LocalStore, MemoryRemoteStore, RemoteKeyStore, StoreError,
};
use kx_vault::provision::provision_master_key;
use kx_vault::{VaultError, VaultPhase, DEFAULT_IDENTITY_TYPE};

// ── Password ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn password_unlock_round_trips_content() {
    let remote = Arc::new(provisioned_remote().await);
    let ctx = context(config("connect"), remote.clone());

    ctx.vault.unlock_with_password(PASSWORD).await.unwrap();
    let status = ctx.vault.status();
    assert_eq!(status.phase, VaultPhase::Unlocked);
    assert!(status.unlocked && status.has_key && !status.has_identity);
    assert!(ctx.vault.unlocked_this_session());

    let ct = ctx.vault.encrypt("hello").unwrap();
    assert_ne!(ct, "hello");
    assert_eq!(ctx.vault.decrypt(&ct).unwrap(), "hello");
    // memo hit
    assert_eq!(ctx.vault.decrypt(&ct).unwrap(), "hello");

    // The record really wraps 32 zero bytes.
    let other = context(config("other"), remote);
    other.vault.import_raw_key(&[0u8; 32]).unwrap();
    assert_eq!(other.vault.decrypt(&ct).unwrap(), "hello");

    let long = "x".repeat(10_000);
    for m in ["", "ünïcødé 🔐", long.as_str()] {
        let ct = ctx.vault.encrypt(m).unwrap();
        assert_eq!(ctx.vault.decrypt(&ct).unwrap(), m);
    }
}

#[tokio::test]
async fn wrong_password_is_incorrect_secret_and_stays_locked() {
    let remote = Arc::new(provisioned_remote().await);
    let ctx = context(config("connect"), remote);

    let err = ctx.vault.unlock_with_password("wrong").await.unwrap_err();
    assert!(matches!(err, VaultError::IncorrectSecret), "got {err:?}");
    let status = ctx.vault.status();
    assert_eq!(status.phase, VaultPhase::Locked);
    assert!(!status.has_key);
    assert!(!ctx.vault.unlocked_this_session());

    ctx.vault.unlock_with_password(PASSWORD).await.unwrap();
    assert!(ctx.vault.is_unlocked());
}

#[tokio::test]
async fn missing_record_is_record_not_found() {
    let ctx = context(config("connect"), Arc::new(MemoryRemoteStore::new()));
    let err = ctx.vault.unlock_with_password(PASSWORD).await.unwrap_err();
    assert!(matches!(err, VaultError::RecordNotFound(_)), "got {err:?}");
    assert_eq!(ctx.vault.status().phase, VaultPhase::Locked);
}

async fn remote_with_row(salt: &str, wrapped_key: &str) -> Arc<MemoryRemoteStore> {
    let remote = MemoryRemoteStore::new();
    remote
        .put_keychain_entry(KeychainEntry {
            user_id: USER.to_string(),
            kind: KeychainEntryKind::Password,
            salt: salt.to_string(),
            wrapped_key: wrapped_key.to_string(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    Arc::new(remote)
}

#[tokio::test]
async fn malformed_wrapped_key_is_malformed_ciphertext() {
    let remote = remote_with_row("a3lscml4LXNhbHQtMDAwMQ==", "definitely not base64!").await;
    let ctx = context(config("connect"), remote);
    let err = ctx.vault.unlock_with_password(PASSWORD).await.unwrap_err();
    assert!(matches!(err, VaultError::MalformedCiphertext(_)), "got {err:?}");
    assert_eq!(ctx.vault.status().phase, VaultPhase::Locked);
}

#[tokio::test]
async fn short_salt_fails_unlock_without_fallback() {
    // "AAAA" decodes to 3 bytes, below the KDF minimum.
    let remote = remote_with_row("AAAA", "AQ==").await;
    let ctx = context(config("connect"), remote);
    let err = ctx.vault.unlock_with_password(PASSWORD).await.unwrap_err();
    assert!(matches!(err, VaultError::UnlockFailed(_)), "got {err:?}");
    assert!(!ctx.vault.status().has_key);
}

// ── Lock ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn lock_makes_every_operation_vault_locked() {
    let remote = Arc::new(provisioned_remote().await);
    let ctx = context(config("connect"), remote);
    ctx.vault.unlock_with_password(PASSWORD).await.unwrap();
    ctx.vault.ensure_identity(USER, DEFAULT_IDENTITY_TYPE).await.unwrap();
    let ct = ctx.vault.encrypt("hello").unwrap();
    ctx.vault.decrypt(&ct).unwrap();

    ctx.vault.lock();
    ctx.vault.lock();

    let status = ctx.vault.status();
    assert_eq!(status.phase, VaultPhase::Locked);
    assert!(!status.has_key && !status.has_identity);
    assert!(!ctx.vault.unlocked_this_session());
    assert!(ctx.vault.identity_public_key().is_none());

    assert!(matches!(ctx.vault.encrypt("x"), Err(VaultError::VaultLocked)));
    // Not served from the memo either.
    assert!(matches!(ctx.vault.decrypt(&ct), Err(VaultError::VaultLocked)));
    assert!(matches!(
        ctx.vault.ensure_identity(USER, DEFAULT_IDENTITY_TYPE).await,
        Err(VaultError::VaultLocked)
    ));
}

// ── PIN ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pin_quick_unlock_within_session() {
    let remote = Arc::new(provisioned_remote().await);
    let ctx = context(config("connect"), remote);
    assert!(!ctx.vault.is_pin_set());

    ctx.vault.unlock_with_password(PASSWORD).await.unwrap();
    ctx.vault.setup_pin("4821").await.unwrap();
    assert!(ctx.vault.is_pin_set());
    let ct = ctx.vault.encrypt("hello").unwrap();

    ctx.vault.lock();
    let err = ctx.vault.unlock_with_pin("0000").await.unwrap_err();
    assert!(matches!(err, VaultError::IncorrectSecret), "got {err:?}");
    assert_eq!(ctx.vault.status().phase, VaultPhase::Locked);
    // A wrong PIN leaves the session artifact in place.
    assert!(ctx.session.get(EPHEMERAL_SESSION_KEY).unwrap().is_some());

    ctx.vault.unlock_with_pin("4821").await.unwrap();
    assert!(ctx.vault.is_unlocked());
    assert_eq!(ctx.vault.decrypt(&ct).unwrap(), "hello");
}

#[tokio::test]
async fn pin_unavailable_without_verifier() {
    let remote = Arc::new(provisioned_remote().await);
    let ctx = context(config("connect"), remote);
    ctx.vault.unlock_with_password(PASSWORD).await.unwrap();
    ctx.vault.setup_pin("4821").await.unwrap();
    ctx.vault.lock();

    ctx.durable
        .remove(&pin_verifier_key("default", USER))
        .unwrap();
    assert!(!ctx.vault.is_pin_set());
    for pin in ["4821", "0000", "not-a-pin"] {
        let err = ctx.vault.unlock_with_pin(pin).await.unwrap_err();
        assert!(matches!(err, VaultError::PinUnavailable), "got {err:?}");
    }
}

#[tokio::test]
async fn pin_unavailable_in_a_new_session() {
    let remote = Arc::new(provisioned_remote().await);
    let first = context(config("connect"), remote.clone());
    first.vault.unlock_with_password(PASSWORD).await.unwrap();
    first.vault.setup_pin("4821").await.unwrap();

    // Same device storage, fresh session tier.
    let second = context_with(config("connect"), remote, first.durable.clone());
    assert!(second.vault.is_pin_set());
    for pin in ["4821", "1111"] {
        let err = second.vault.unlock_with_pin(pin).await.unwrap_err();
        assert!(matches!(err, VaultError::PinUnavailable), "got {err:?}");
    }
}

#[tokio::test]
async fn copied_session_record_is_useless_without_session_secret() {
    let remote = Arc::new(provisioned_remote().await);
    let first = context(config("connect"), remote.clone());
    first.vault.unlock_with_password(PASSWORD).await.unwrap();
    first.vault.setup_pin("4821").await.unwrap();

    let second = context_with(config("connect"), remote, first.durable.clone());
    let stolen = first.session.get(EPHEMERAL_SESSION_KEY).unwrap().unwrap();
    second.session.set(EPHEMERAL_SESSION_KEY, &stolen).unwrap();

    let err = second.vault.unlock_with_pin("4821").await.unwrap_err();
    assert!(matches!(err, VaultError::IncorrectSecret), "got {err:?}");
    assert!(!second.vault.status().has_key);
}

#[tokio::test]
async fn pin_setup_requires_unlock_and_valid_pin() {
    let remote = Arc::new(provisioned_remote().await);
    let ctx = context(config("connect"), remote);
    assert!(matches!(
        ctx.vault.setup_pin("4821").await,
        Err(VaultError::VaultLocked)
    ));

    ctx.vault.unlock_with_password(PASSWORD).await.unwrap();
    for bad in ["12", "123456789", "12ab"] {
        assert!(matches!(
            ctx.vault.setup_pin(bad).await,
            Err(VaultError::InvalidPin(_))
        ));
    }
    assert!(!ctx.vault.is_pin_set());
}

#[tokio::test]
async fn remove_pin_clears_both_artifacts() {
    let remote = Arc::new(provisioned_remote().await);
    let ctx = context(config("connect"), remote);
    ctx.vault.unlock_with_password(PASSWORD).await.unwrap();
    ctx.vault.setup_pin("123456").await.unwrap();

    ctx.vault.remove_pin().unwrap();
    assert!(!ctx.vault.is_pin_set());
    assert!(ctx.session.get(EPHEMERAL_SESSION_KEY).unwrap().is_none());
    ctx.vault.lock();
    assert!(matches!(
        ctx.vault.unlock_with_pin("123456").await,
        Err(VaultError::PinUnavailable)
    ));
}

// ── Passkey ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn passkey_is_probed_but_not_unlockable() {
    let remote = Arc::new(provisioned_remote().await);
    let ctx = context(config("connect"), remote.clone());
    assert!(!ctx.vault.has_passkey().await.unwrap());

    remote
        .put_keychain_entry(KeychainEntry {
            user_id: USER.to_string(),
            kind: KeychainEntryKind::Passkey,
            salt: String::new(),
            wrapped_key: String::new(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    assert!(ctx.vault.has_passkey().await.unwrap());

    let err = ctx.vault.unlock_with_passkey().await.unwrap_err();
    assert!(matches!(err, VaultError::FactorUnavailable(_)), "got {err:?}");
    assert_eq!(ctx.vault.status().phase, VaultPhase::Locked);
}

// ── Lock vs in-flight unlock ─────────────────────────────────────────────────

#[tokio::test]
async fn lock_during_unlock_wins() {
    let gated = Arc::new(GatedRemote::new(provisioned_remote().await));
    let ctx = context(config("connect"), gated.clone());

    let vault = ctx.vault.clone();
    let unlock = tokio::spawn(async move { vault.unlock_with_password(PASSWORD).await });

    gated.entered.notified().await;
    assert_eq!(ctx.vault.status().phase, VaultPhase::Unlocking);
    ctx.vault.lock();
    gated.release.notify_one();

    let result = unlock.await.unwrap();
    assert!(matches!(result, Err(VaultError::Superseded)), "got {result:?}");
    let status = ctx.vault.status();
    assert_eq!(status.phase, VaultPhase::Locked);
    assert!(!status.has_key);
    assert!(!ctx.vault.unlocked_this_session());
    assert!(matches!(ctx.vault.encrypt("x"), Err(VaultError::VaultLocked)));
}

#[tokio::test]
async fn lock_wins_over_unlock_queued_behind_another() {
    let gated = Arc::new(GatedRemote::new(provisioned_remote().await));
    let ctx = context(config("connect"), gated.clone());

    let vault = ctx.vault.clone();
    let first = tokio::spawn(async move { vault.unlock_with_password(PASSWORD).await });
    gated.entered.notified().await;

    let vault = ctx.vault.clone();
    let queued = tokio::spawn(async move { vault.unlock_with_password(PASSWORD).await });
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }

    ctx.vault.lock();
    gated.release.notify_one();
    let r1 = first.await.unwrap();
    // Only needed if the queued attempt reaches the remote.
    gated.release.notify_one();
    let r2 = queued.await.unwrap();

    assert!(matches!(r1, Err(VaultError::Superseded)), "got {r1:?}");
    assert!(matches!(r2, Err(VaultError::Superseded)), "got {r2:?}");
    let status = ctx.vault.status();
    assert_eq!(status.phase, VaultPhase::Locked);
    assert!(!status.has_key);
    assert!(!ctx.vault.unlocked_this_session());
}

// ── Provisioning ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn provisioning_is_one_shot() {
    let remote = MemoryRemoteStore::new();
    provision_master_key(&remote, USER, PASSWORD, &fast_kdf())
        .await
        .unwrap();
    let err = provision_master_key(&remote, USER, "other", &fast_kdf())
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Storage(StoreError::Conflict(_))), "got {err:?}");

    let ctx = context(config("connect"), Arc::new(remote));
    ctx.vault.unlock_with_password(PASSWORD).await.unwrap();
    assert!(ctx.vault.is_unlocked());
}
