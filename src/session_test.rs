use super::*;

fn sample_user() -> User {
    User { id: 7, email: "ann@example.com".into(), name: "Ann".into(), avatar: None }
}

fn temp_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("kanban-sync-{tag}-{}.json", uuid::Uuid::new_v4()))
}

// =============================================================================
// migrate_legacy_keys
// =============================================================================

#[test]
fn migration_moves_legacy_token_when_new_key_absent() {
    let store = MemoryStore::with_entries([(LEGACY_TOKEN_KEY, "abc")]);

    let report = migrate_legacy_keys(&store).expect("migration");

    assert!(report.migrated_token);
    assert!(!report.cleared_orphan_token);
    let entries = store.snapshot();
    assert_eq!(entries.get(TOKEN_KEY).map(String::as_str), Some("abc"));
    assert!(!entries.contains_key(LEGACY_TOKEN_KEY));
    assert_eq!(entries.len(), 1);
}

#[test]
fn migration_removes_preexisting_orphan_token() {
    let store = MemoryStore::with_entries([(TOKEN_KEY, "abc")]);

    let report = migrate_legacy_keys(&store).expect("migration");

    assert!(report.cleared_orphan_token);
    assert!(store.snapshot().is_empty());
}

#[test]
fn migration_removes_preexisting_orphan_user() {
    let store = MemoryStore::with_entries([(USER_KEY, r#"{"id":1}"#)]);

    let report = migrate_legacy_keys(&store).expect("migration");

    assert!(report.cleared_orphan_user);
    assert!(store.snapshot().is_empty());
}

#[test]
fn migration_keeps_new_keys_over_legacy_values() {
    let store = MemoryStore::with_entries([
        (LEGACY_TOKEN_KEY, "old"),
        (TOKEN_KEY, "new"),
        (USER_KEY, r#"{"id":1}"#),
    ]);

    let report = migrate_legacy_keys(&store).expect("migration");

    assert!(!report.changed());
    assert_eq!(store.get(TOKEN_KEY).as_deref(), Some("new"));
    assert_eq!(store.get(LEGACY_TOKEN_KEY).as_deref(), Some("old"));
}

#[test]
fn migration_moves_full_legacy_session() {
    let store = MemoryStore::with_entries([(LEGACY_TOKEN_KEY, "abc"), (LEGACY_USER_KEY, r#"{"id":7}"#)]);

    let report = migrate_legacy_keys(&store).expect("migration");

    assert!(report.migrated_token && report.migrated_user);
    let session = Session::load(&store).expect("load").expect("session present");
    assert_eq!(session.token, "abc");
    assert_eq!(session.user_id(), 7);
}

#[test]
fn clear_auth_data_removes_every_session_key() {
    let store = MemoryStore::with_entries([
        (TOKEN_KEY, "a"),
        (USER_KEY, "{}"),
        (LEGACY_TOKEN_KEY, "b"),
        (LEGACY_USER_KEY, "{}"),
        ("theme", "dark"),
    ]);

    clear_auth_data(&store).expect("clear");

    let entries = store.snapshot();
    assert_eq!(entries.len(), 1);
    assert!(entries.contains_key("theme"));
}

// =============================================================================
// Session
// =============================================================================

#[test]
fn session_persist_then_load() {
    let store = MemoryStore::new();
    let session = Session::new("tok", sample_user());

    session.persist(&store).expect("persist");

    assert_eq!(store.get(TOKEN_KEY).as_deref(), Some("tok"));
    assert_eq!(Session::load(&store).expect("load"), Some(session));
}

#[test]
fn session_load_unquotes_json_token() {
    let store = MemoryStore::with_entries([(TOKEN_KEY, "\"tok\""), (USER_KEY, r#"{"id":"7","name":"Ann"}"#)]);

    let session = Session::load(&store).expect("load").expect("session present");

    assert_eq!(session.token, "tok");
    assert_eq!(session.user.name, "Ann");
}

#[test]
fn session_load_requires_both_halves() {
    let store = MemoryStore::with_entries([(TOKEN_KEY, "tok")]);
    assert_eq!(Session::load(&store).expect("load"), None);
}

#[test]
fn session_load_rejects_corrupt_user() {
    let store = MemoryStore::with_entries([(TOKEN_KEY, "tok"), (USER_KEY, "not json")]);
    assert!(matches!(Session::load(&store), Err(StorageError::Json(_))));
}

#[test]
fn session_debug_redacts_token() {
    let session = Session::new("super-secret", sample_user());
    let rendered = format!("{session:?}");
    assert!(!rendered.contains("super-secret"));
    assert!(rendered.contains("<redacted>"));
}

// =============================================================================
// FileStore
// =============================================================================

#[test]
fn file_store_missing_file_is_empty() {
    let path = temp_path("missing");
    let store = FileStore::open(&path).expect("open");
    assert_eq!(store.get(TOKEN_KEY), None);
    assert!(!path.exists());
}

#[test]
fn file_store_persists_across_reopen() {
    let path = temp_path("reopen");
    {
        let store = FileStore::open(&path).expect("open");
        store.set(TOKEN_KEY, "abc").expect("set");
        store.set(USER_KEY, "{}").expect("set");
        store.remove(USER_KEY).expect("remove");
    }

    let reopened = FileStore::open(&path).expect("reopen");
    assert_eq!(reopened.get(TOKEN_KEY).as_deref(), Some("abc"));
    assert_eq!(reopened.get(USER_KEY), None);

    std::fs::remove_file(&path).expect("cleanup");
}

#[test]
fn file_store_writes_through_temp_file_and_leaves_none_behind() {
    let path = temp_path("atomic");
    let store = FileStore::open(&path).expect("open");
    store.set(TOKEN_KEY, "abc").expect("set");

    assert!(!store.temp_path().exists());
    assert_eq!(store.temp_path().parent(), path.parent());

    std::fs::remove_file(&path).expect("cleanup");
}

#[test]
fn interrupted_write_leaves_previous_store_readable() {
    let path = temp_path("interrupted");
    let store = FileStore::open(&path).expect("open");
    store.set(TOKEN_KEY, "abc").expect("set");

    // A half-written temp file from a crashed write.
    std::fs::write(store.temp_path(), b"{\"kanban-tok").expect("partial write");

    let reopened = FileStore::open(&path).expect("reopen");
    assert_eq!(reopened.get(TOKEN_KEY).as_deref(), Some("abc"));

    reopened.set(USER_KEY, "{}").expect("set over stale temp");
    assert_eq!(FileStore::open(&path).expect("reopen").get(USER_KEY).as_deref(), Some("{}"));
    assert!(!reopened.temp_path().exists());

    std::fs::remove_file(&path).expect("cleanup");
}

#[test]
fn file_store_rejects_corrupt_file() {
    let path = temp_path("corrupt");
    std::fs::write(&path, b"[1,2").expect("write");

    assert!(matches!(FileStore::open(&path), Err(StorageError::Json(_))));

    std::fs::remove_file(&path).expect("cleanup");
}
