//! Persistent copy of the session, shared between processes.
//!
//! A store is the source of truth at start-up. Writes made through a store are never echoed
//! back on its own change channel; only changes made elsewhere (another process, another
//! window, a hand edit of the file) are broadcast.

use crate::{Error, Result};
use async_trait::async_trait;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 16;

/// What is persisted: the bearer token and the identity returned at login.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

impl StoredSession {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            user: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.user.is_none()
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<StoredSession>;

    /// Persist `session`. An empty session clears the store.
    async fn save(&self, session: &StoredSession) -> Result<()>;

    /// Changes made outside this store instance.
    fn subscribe(&self) -> broadcast::Receiver<StoredSession>;
}

/// Process-local store. `write_external` stands in for another window writing the session.
pub struct MemoryTokenStore {
    session: Mutex<StoredSession>,
    changes: broadcast::Sender<StoredSession>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::with_session(StoredSession::default())
    }

    pub fn with_session(session: StoredSession) -> Self {
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            session: Mutex::new(session),
            changes,
        }
    }

    pub fn current(&self) -> StoredSession {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn write_external(&self, session: StoredSession) {
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = session.clone();
        let _ = self.changes.send(session);
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<StoredSession> {
        Ok(self.current())
    }

    async fn save(&self, session: &StoredSession) -> Result<()> {
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = session.clone();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoredSession> {
        self.changes.subscribe()
    }
}

/// JSON file on disk, watched for edits by other processes.
pub struct FileTokenStore {
    path: PathBuf,
    // Last content this instance wrote or reported; used to suppress echoes.
    last_seen: Arc<Mutex<StoredSession>>,
    changes: broadcast::Sender<StoredSession>,
    _watcher: Mutex<RecommendedWatcher>,
}

impl FileTokenStore {
    /// Open the store at `path` and start watching it. The file need not exist yet, but its
    /// parent directory must.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| Error::storage(format!("invalid token file path: {}", path.display())))?;

        let initial = read_session(&path).unwrap_or_default();
        let last_seen = Arc::new(Mutex::new(initial));
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);

        let tx = changes.clone();
        let seen = Arc::clone(&last_seen);
        let watched = path.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()));
                    if !relevant || event.kind.is_access() {
                        return;
                    }
                    let session = match read_session(&watched) {
                        Ok(s) => s,
                        Err(e) => {
                            // Usually a write caught half way; the next event carries the result.
                            debug!(path = %watched.display(), error = %e, "token file not readable yet");
                            return;
                        }
                    };
                    let mut last = seen.lock().unwrap_or_else(|e| e.into_inner());
                    if *last == session {
                        return;
                    }
                    *last = session.clone();
                    drop(last);
                    info!(path = %watched.display(), "token file changed externally");
                    let _ = tx.send(session);
                }
                Err(e) => warn!(error = ?e, "token file watch error"),
            },
            Config::default(),
        )
        .map_err(|e| Error::storage(format!("failed to watch token file: {}", e)))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::storage(format!("failed to watch {}: {}", dir.display(), e)))?;
        debug!(path = %path.display(), "token file watcher started");

        Ok(Self {
            path,
            last_seen,
            changes,
            _watcher: Mutex::new(watcher),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Missing file means no session.
fn read_session(path: &Path) -> Result<StoredSession> {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw)
            .map_err(|e| Error::storage(format!("invalid token file {}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredSession::default()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<StoredSession> {
        let session = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                Error::storage(format!("invalid token file {}: {}", self.path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredSession::default(),
            Err(e) => return Err(e.into()),
        };
        *self.last_seen.lock().unwrap_or_else(|e| e.into_inner()) = session.clone();
        Ok(session)
    }

    async fn save(&self, session: &StoredSession) -> Result<()> {
        *self.last_seen.lock().unwrap_or_else(|e| e.into_inner()) = session.clone();
        if session.is_empty() {
            return match tokio::fs::remove_file(&self.path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }
        let raw = serde_json::to_vec_pretty(session)
            .map_err(|e| Error::storage(format!("failed to encode session: {}", e)))?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoredSession> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn memory_store_broadcasts_only_external_writes() {
        let store = MemoryTokenStore::new();
        let mut rx = store.subscribe();

        store.save(&StoredSession::with_token("own")).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(store.load().await.unwrap().token.as_deref(), Some("own"));

        store.write_external(StoredSession::with_token("other-tab"));
        assert_eq!(rx.recv().await.unwrap().token.as_deref(), Some("other-tab"));
        assert_eq!(store.current().token.as_deref(), Some("other-tab"));
    }

    #[tokio::test]
    async fn file_store_persists_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = FileTokenStore::open(&path).unwrap();
        assert!(store.load().await.unwrap().is_empty());

        let session = StoredSession {
            token: Some("abc".into()),
            user: Some(json!({"id": 7, "email": "ops@example.com"})),
        };
        store.save(&session).await.unwrap();
        assert_eq!(store.load().await.unwrap(), session);

        // A second handle on the same file sees the persisted copy at start-up.
        let reopened = FileTokenStore::open(&path).unwrap();
        assert_eq!(reopened.load().await.unwrap(), session);

        store.save(&StoredSession::default()).await.unwrap();
        assert!(!path.exists());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_reports_writes_from_another_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let watcher = FileTokenStore::open(&path).unwrap();
        let writer = FileTokenStore::open(&path).unwrap();
        let mut rx = watcher.subscribe();

        writer.save(&StoredSession::with_token("from-elsewhere")).await.unwrap();

        let change = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("watcher should report the external write")
            .unwrap();
        assert_eq!(change.token.as_deref(), Some("from-elsewhere"));
    }

    #[test]
    fn corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();
        let err = read_session(&path).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Storage);
    }
}
