//! Key-value persistence used for tokens, calendar selections and the notes
//! mapping.
//!
//! The engine only needs `get`/`set`/`delete` on string values. Encryption at
//! rest is the store implementation's concern; [`FileStore`] restricts file
//! permissions to the owner and writes atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::BoxFuture;

/// Async string key-value store.
pub trait SecureStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ProviderResult<Option<String>>>;

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, ProviderResult<()>>;

    /// Removes a key. Deleting a missing key is not an error.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ProviderResult<()>>;
}

/// Process-local store, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl SecureStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ProviderResult<Option<String>>> {
        let value = self.entries.lock().unwrap().get(key).cloned();
        Box::pin(async move { Ok(value) })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, ProviderResult<()>> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Box::pin(async { Ok(()) })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        self.entries.lock().unwrap().remove(key);
        Box::pin(async { Ok(()) })
    }
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Maps a key such as `oauth_tokens:google` to a safe file name.
    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }

    async fn write_atomic(&self, path: &Path, value: &str) -> ProviderResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_error("failed to create store directory", e))?;

        let temp_path = path.with_extension("json.tmp");
        // A leftover temp file would keep whatever mode it was created with.
        match tokio::fs::remove_file(&temp_path).await {
            Ok(()) => debug!(path = %temp_path.display(), "removed stale temp file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(storage_error("failed to remove stale store file", e)),
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        // Owner-only from creation, so the token is never readable by others.
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options
            .open(&temp_path)
            .await
            .map_err(|e| storage_error("failed to create store file", e))?;
        file.write_all(value.as_bytes())
            .await
            .map_err(|e| storage_error("failed to write store file", e))?;
        file.sync_all()
            .await
            .map_err(|e| storage_error("failed to flush store file", e))?;
        drop(file);

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| storage_error("failed to rename store file", e))?;
        debug!(path = %path.display(), "saved store entry");
        Ok(())
    }
}

fn storage_error(context: &str, err: std::io::Error) -> ProviderError {
    ProviderError::storage(format!("{context}: {err}")).with_source(err)
}

impl SecureStore for FileStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ProviderResult<Option<String>>> {
        Box::pin(async move {
            let path = self.path_for(key);
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => Ok(Some(content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(storage_error("failed to read store file", e)),
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let path = self.path_for(key);
            self.write_atomic(&path, &value).await
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let path = self.path_for(key);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(storage_error("failed to delete store file", e)),
            }
        })
    }
}

/// Reads and deserializes a JSON value.
pub async fn get_json<T>(store: &dyn SecureStore, key: &str) -> ProviderResult<Option<T>>
where
    T: serde::de::DeserializeOwned,
{
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
            ProviderError::storage(format!("corrupt store entry {key}: {e}")).with_source(e)
        }),
        None => Ok(None),
    }
}

/// Serializes and stores a JSON value.
pub async fn set_json<T>(store: &dyn SecureStore, key: &str, value: &T) -> ProviderResult<()>
where
    T: serde::Serialize + ?Sized,
{
    let raw = serde_json::to_string(value).map_err(|e| {
        ProviderError::internal(format!("failed to serialize {key}: {e}")).with_source(e)
    })?;
    store.set(key, raw).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v".into()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.set("oauth_tokens:google", "{}".into()).await.unwrap();

        let reopened = FileStore::new(dir.path());
        assert_eq!(
            reopened.get("oauth_tokens:google").await.unwrap().as_deref(),
            Some("{}")
        );
        assert!(dir.path().join("oauth_tokens_google.json").exists());
        assert!(!dir.path().join("oauth_tokens_google.json.tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_store_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        store.set("secret", "x".into()).await.unwrap();

        let meta = std::fs::metadata(dir.path().join("nested/secret.json")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_store_replaces_world_readable_temp_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let stale = dir.path().join("token.json.tmp");
        std::fs::write(&stale, "old").unwrap();
        std::fs::set_permissions(&stale, std::fs::Permissions::from_mode(0o644)).unwrap();

        store.set("token", "secret".into()).await.unwrap();

        assert!(!stale.exists());
        let path = dir.path().join("token.json");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "secret");
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn file_store_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.delete("nothing").await.unwrap();
    }

    #[tokio::test]
    async fn json_helpers_report_corruption() {
        let store = MemoryStore::new();
        set_json(&store, "list", &vec!["a", "b"]).await.unwrap();
        let list: Option<Vec<String>> = get_json(&store, "list").await.unwrap();
        assert_eq!(list, Some(vec!["a".to_string(), "b".to_string()]));

        store.set("bad", "{not json".into()).await.unwrap();
        let err = get_json::<Vec<String>>(&store, "bad").await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::StorageError);
    }
}
