//! Session credential persistence and legacy key migration.
//!
//! DESIGN
//! ======
//! Credentials live in a flat string key-value store, the same shape a
//! browser's local storage has. `FileStore` backs it with one JSON object on
//! disk; `MemoryStore` is used by tests and short-lived tools.
//!
//! The bearer token is stored raw under `kanban-token` and the user profile
//! as JSON under `kanban-user`. Older builds wrote `token` / `user`;
//! [`migrate_legacy_keys`] renames those once and discards half-written
//! sessions.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use frames::UserId;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const TOKEN_KEY: &str = "kanban-token";
pub const USER_KEY: &str = "kanban-user";
pub const LEGACY_TOKEN_KEY: &str = "token";
pub const LEGACY_USER_KEY: &str = "user";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage json invalid: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// STORES
// =============================================================================

/// Flat string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Self { entries: Mutex::new(map) }
    }

    /// Copy of every entry currently held.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// JSON-object file store. Every mutation rewrites the whole file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file each write goes through before it replaces the store.
    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Write the full map to a temp file, then rename it over the store, so
    /// a crash mid-write leaves the previous file intact.
    fn write(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let body = serde_json::to_vec_pretty(entries)?;
        let temp = self.temp_path();
        let written = std::fs::File::create(&temp).and_then(|mut file| {
            file.write_all(&body)?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| std::fs::rename(&temp, &self.path)) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_owned());
        self.write(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.write(&entries)
    }
}

// =============================================================================
// MIGRATION
// =============================================================================

/// What [`migrate_legacy_keys`] changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated_token: bool,
    pub migrated_user: bool,
    pub cleared_orphan_token: bool,
    pub cleared_orphan_user: bool,
}

impl MigrationReport {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.migrated_token || self.migrated_user || self.cleared_orphan_token || self.cleared_orphan_user
    }
}

/// Rename legacy `token` / `user` keys and drop orphaned session halves.
///
/// A legacy key moves to its new name only when the new key is absent; the
/// legacy key is then removed. Afterwards a `kanban-token` without a
/// `kanban-user` (or the reverse) that was already present before this call
/// is removed. Values moved by this call are kept.
///
/// # Errors
///
/// Returns the first storage write failure.
pub fn migrate_legacy_keys(store: &dyn KeyValueStore) -> Result<MigrationReport, StorageError> {
    let mut report = MigrationReport::default();

    report.migrated_token = rename_if_absent(store, LEGACY_TOKEN_KEY, TOKEN_KEY)?;
    if report.migrated_token {
        info!("storage: migrated token to {TOKEN_KEY}");
    }
    report.migrated_user = rename_if_absent(store, LEGACY_USER_KEY, USER_KEY)?;
    if report.migrated_user {
        info!("storage: migrated user to {USER_KEY}");
    }

    let token = present(store, TOKEN_KEY);
    let user = present(store, USER_KEY);

    if token && !user && !report.migrated_token {
        store.remove(TOKEN_KEY)?;
        report.cleared_orphan_token = true;
        info!("storage: cleared orphaned token");
    }
    if user && !token && !report.migrated_user {
        store.remove(USER_KEY)?;
        report.cleared_orphan_user = true;
        info!("storage: cleared orphaned user");
    }

    Ok(report)
}

/// Remove every session key, current and legacy.
///
/// # Errors
///
/// Returns the first storage write failure.
pub fn clear_auth_data(store: &dyn KeyValueStore) -> Result<(), StorageError> {
    for key in [TOKEN_KEY, USER_KEY, LEGACY_TOKEN_KEY, LEGACY_USER_KEY] {
        store.remove(key)?;
    }
    info!("storage: cleared auth data");
    Ok(())
}

fn present(store: &dyn KeyValueStore, key: &str) -> bool {
    store.get(key).is_some_and(|v| !v.is_empty())
}

fn rename_if_absent(store: &dyn KeyValueStore, from: &str, to: &str) -> Result<bool, StorageError> {
    let Some(value) = store.get(from).filter(|v| !v.is_empty()) else {
        return Ok(false);
    };
    if present(store, to) {
        return Ok(false);
    }
    store.set(to, &value)?;
    store.remove(from)?;
    Ok(true)
}

// =============================================================================
// SESSION
// =============================================================================

/// Authenticated user profile as returned by the auth endpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "frames::flex_id::deserialize")]
    pub id: UserId,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Active user plus bearer credential.
#[derive(Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub user: User,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

impl Session {
    #[must_use]
    pub fn new(token: impl Into<String>, user: User) -> Self {
        Self { token: token.into(), user }
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    /// Load the persisted session. Returns `None` unless both halves exist.
    ///
    /// A token written as a JSON string (`"\"abc\""`) is unquoted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Json`] if the stored user is not valid JSON.
    pub fn load(store: &dyn KeyValueStore) -> Result<Option<Self>, StorageError> {
        let (Some(token), Some(user)) = (store.get(TOKEN_KEY), store.get(USER_KEY)) else {
            return Ok(None);
        };
        let token = serde_json::from_str::<String>(&token).unwrap_or(token);
        if token.is_empty() {
            return Ok(None);
        }
        let user: User = serde_json::from_str(&user)?;
        Ok(Some(Self { token, user }))
    }

    /// Write both halves of the session.
    ///
    /// # Errors
    ///
    /// Returns the first storage write failure.
    pub fn persist(&self, store: &dyn KeyValueStore) -> Result<(), StorageError> {
        store.set(TOKEN_KEY, &self.token)?;
        store.set(USER_KEY, &serde_json::to_string(&self.user)?)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
