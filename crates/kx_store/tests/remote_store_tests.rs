//! Row store behaviour shared by the in-memory and JSON-file backends.
//!
//! Tests cover:
//!  1. Master key record resolves to the `password` keychain row
//!  2. A second password row for the same user is a conflict
//!  3. Identity create is compare-and-swap per (user, identity type)
//!  4. The JSON-file backend persists rows across reopen

use chrono::Utc;
use kx_store::{
    IdentityRecord, JsonFileRemoteStore, KeychainEntry, KeychainEntryKind, MemoryRemoteStore,
    RemoteKeyStore, StoreError,
};
use tempfile::tempdir;

fn entry(user: &str, kind: KeychainEntryKind) -> KeychainEntry {
    KeychainEntry {
        user_id: user.to_string(),
        kind,
        salt: "AAAAAAAAAAAAAAAAAAAAAA==".to_string(),
        wrapped_key: "wrapped".to_string(),
        created_at: Utc::now(),
    }
}

fn identity(user: &str, identity_type: &str, public_key: &str) -> IdentityRecord {
    IdentityRecord {
        user_id: user.to_string(),
        identity_type: identity_type.to_string(),
        label: "Connect E2E Identity".to_string(),
        public_key: public_key.to_string(),
        wrapped_private_key: "sealed".to_string(),
        created_at: Utc::now(),
    }
}

async fn exercise_backend(store: &dyn RemoteKeyStore) {
    assert!(store.get_master_key_record("u1").await.unwrap().is_none());

    store
        .put_keychain_entry(entry("u1", KeychainEntryKind::Passkey))
        .await
        .unwrap();
    assert!(store.get_master_key_record("u1").await.unwrap().is_none());

    store
        .put_keychain_entry(entry("u1", KeychainEntryKind::Password))
        .await
        .unwrap();
    let record = store.get_master_key_record("u1").await.unwrap().unwrap();
    assert_eq!(record.user_id, "u1");
    assert_eq!(record.wrapped_key, "wrapped");

    let dup = store
        .put_keychain_entry(entry("u1", KeychainEntryKind::Password))
        .await;
    assert!(matches!(dup, Err(StoreError::Conflict(_))));
    assert_eq!(store.list_keychain_entries("u1").await.unwrap().len(), 2);
    assert!(store.list_keychain_entries("u2").await.unwrap().is_empty());

    let first = store
        .put_identity_record(identity("u1", "e2e_connect", "pk-1"))
        .await
        .unwrap();
    assert!(!first.is_empty());
    let racing = store
        .put_identity_record(identity("u1", "e2e_connect", "pk-2"))
        .await;
    assert!(matches!(racing, Err(StoreError::Conflict(_))));

    let stored = store
        .get_identity_record("u1", "e2e_connect")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.public_key, "pk-1");

    store
        .put_identity_record(identity("u1", "signing", "pk-3"))
        .await
        .unwrap();
    assert!(store
        .get_identity_record("u2", "e2e_connect")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn memory_backend_semantics() {
    let store = MemoryRemoteStore::new();
    exercise_backend(&store).await;
    assert_eq!(store.identity_count("u1"), 2);
}

#[tokio::test]
async fn json_file_backend_semantics() {
    let dir = tempdir().unwrap();
    let store = JsonFileRemoteStore::open(dir.path().join("remote.json"));
    exercise_backend(&store).await;
}

#[tokio::test]
async fn json_file_backend_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("remote.json");
    {
        let store = JsonFileRemoteStore::open(&path);
        store
            .put_keychain_entry(entry("u1", KeychainEntryKind::Password))
            .await
            .unwrap();
        store
            .put_identity_record(identity("u1", "e2e_connect", "pk-1"))
            .await
            .unwrap();
    }
    let reopened = JsonFileRemoteStore::open(&path);
    assert!(reopened.get_master_key_record("u1").await.unwrap().is_some());
    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw["identities"][0]["identityType"], "e2e_connect");
    assert!(raw["identities"][0]["id"].is_string());
}
