// Integration tests for the encrypted file store and token import/export

use chrono::Utc;
use gauth::secrets::file_store::{test_params, FileStore};
use gauth::secrets::{self, SecretStore, StoreError, Token};
use tempfile::TempDir;

fn open(dir: &TempDir, password: &str) -> FileStore {
    FileStore::open_with_params(dir.path(), password, test_params()).unwrap()
}

fn token(email: &str) -> Token {
    Token {
        email: email.to_string(),
        services: vec!["calendar".to_string(), "gmail".to_string()],
        scopes: vec![
            "https://mail.google.com/".to_string(),
            "https://www.googleapis.com/auth/calendar".to_string(),
        ],
        refresh_token: "1//refresh".to_string(),
        created_at: Some(Utc::now()),
    }
}

#[test]
fn test_tokens_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir, "hunter2");
        store.set_token("a@example.com", token("a@example.com")).unwrap();
        store.set_token("b@example.com", token("b@example.com")).unwrap();
    }

    let store = open(&dir, "hunter2");
    let tokens = store.list_tokens().unwrap();
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0].email, "a@example.com");
    assert_eq!(tokens[0].refresh_token, "1//refresh");
    assert_eq!(tokens[1].email, "b@example.com");
}

#[test]
fn test_lookup_is_case_insensitive_but_record_preserves_email() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, "hunter2");

    store.set_token("Alice@Example.COM", token("Alice@Example.COM")).unwrap();

    let fetched = store.get_token("alice@example.com").unwrap();
    assert_eq!(fetched.email, "Alice@Example.COM");

    // Same slot, not a second record.
    store.set_token("ALICE@EXAMPLE.COM", token("ALICE@EXAMPLE.COM")).unwrap();
    assert_eq!(store.list_tokens().unwrap().len(), 1);
}

#[test]
fn test_keys_differing_only_in_extension_coexist() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, "hunter2");

    // The second write stages and renames; it must not touch the sibling
    // whose key matches the staging name's stem.
    store.set_token("a@b.tmp", token("a@b.tmp")).unwrap();
    store.set_token("a@b.com", token("a@b.com")).unwrap();

    assert_eq!(store.get_token("a@b.tmp").unwrap().email, "a@b.tmp");
    assert_eq!(store.get_token("a@b.com").unwrap().email, "a@b.com");
    assert_eq!(store.list_tokens().unwrap().len(), 2);
}

#[test]
fn test_interrupted_write_leftover_is_not_a_record() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, "hunter2");
    store.set_token("a@example.com", token("a@example.com")).unwrap();

    // A staging file left behind by a crash between write and rename.
    let leftover = dir
        .path()
        .join(format!("{}!tmp", urlencoding::encode("token:ghost@example.com")));
    std::fs::write(&leftover, b"partial").unwrap();

    let tokens = store.list_tokens().unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].email, "a@example.com");
}

#[test]
fn test_delete_absent_token_is_not_found() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, "hunter2");

    assert!(matches!(
        store.delete_token("ghost@example.com"),
        Err(StoreError::NotFound(_))
    ));

    store.set_token("a@example.com", token("a@example.com")).unwrap();
    store.delete_token("a@example.com").unwrap();
    assert!(matches!(
        store.get_token("a@example.com"),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn test_wrong_password_cannot_read_records() {
    let dir = TempDir::new().unwrap();
    open(&dir, "hunter2")
        .set_token("a@example.com", token("a@example.com"))
        .unwrap();

    let store = open(&dir, "wrong-password");
    assert!(matches!(
        store.get_token("a@example.com"),
        Err(StoreError::Crypto(_))
    ));
}

#[test]
fn test_default_account_requires_stored_token() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, "hunter2");

    assert!(matches!(
        store.set_default_account("a@example.com"),
        Err(StoreError::NotFound(_))
    ));

    store.set_token("a@example.com", token("a@example.com")).unwrap();
    store.set_default_account("a@example.com").unwrap();

    // Survives reopen.
    let store = open(&dir, "hunter2");
    assert_eq!(
        store.default_account().unwrap().as_deref(),
        Some("a@example.com")
    );
}

#[test]
fn test_export_then_import_preserves_record() {
    let store_dir = TempDir::new().unwrap();
    let out_dir = TempDir::new().unwrap();
    let out = out_dir.path().join("a.json");

    let source = open(&store_dir, "hunter2");
    source.set_token("a@example.com", token("a@example.com")).unwrap();
    secrets::export_token(&source, "a@example.com", &out, false).unwrap();

    let dest_dir = TempDir::new().unwrap();
    let dest = open(&dest_dir, "other-password");
    let data = std::fs::read(&out).unwrap();
    let imported = secrets::import_token(&dest, &data).unwrap();

    assert_eq!(imported.email, "a@example.com");
    let fetched = dest.get_token("a@example.com").unwrap();
    assert_eq!(fetched.refresh_token, "1//refresh");
    assert_eq!(fetched.services, vec!["calendar", "gmail"]);
    assert_eq!(fetched.scopes.len(), 2);
}

#[test]
fn test_export_refuses_to_overwrite_by_default() {
    let store_dir = TempDir::new().unwrap();
    let out_dir = TempDir::new().unwrap();
    let out = out_dir.path().join("a.json");

    let store = open(&store_dir, "hunter2");
    store.set_token("a@example.com", token("a@example.com")).unwrap();

    secrets::export_token(&store, "a@example.com", &out, false).unwrap();
    assert!(secrets::export_token(&store, "a@example.com", &out, false).is_err());
    secrets::export_token(&store, "a@example.com", &out, true).unwrap();
}

#[test]
fn test_import_rejects_incomplete_records() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, "hunter2");

    let missing_refresh = br#"{"email":"a@example.com","refresh_token":""}"#;
    assert!(matches!(
        secrets::import_token(&store, missing_refresh),
        Err(StoreError::Invalid(_))
    ));
    assert!(store.list_tokens().unwrap().is_empty());
}
