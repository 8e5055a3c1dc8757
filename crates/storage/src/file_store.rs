//! Filesystem backend: last-resort fallback when both network stores are
//! unreachable.
//!
//! One directory per session holding the metadata document (`session.json`)
//! and credential blobs. Every write goes to a temp file in the same
//! directory and is renamed over the target, so a crash mid-write never
//! leaves a partial file behind.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use sessionvault_core::{
    SessionRecord, SessionUpdate, FS_REMOVE_RETRIES, FS_REMOVE_RETRY_DELAY_MS,
};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::traits::{sanitize_key, Result, SessionBackend};

pub const METADATA_FILE: &str = "session.json";
pub const DEFAULT_CREDS_FILE: &str = "creds.bin";

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create the store, making sure the root directory exists.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(sanitize_key(session_id))
    }

    /// Write-to-temp-then-rename. The temp file lives in the target's
    /// directory so the rename stays on one filesystem, and carries a
    /// per-write unique suffix so concurrent writers to the same target
    /// never share a temp file.
    async fn write_atomic(&self, target: &Path, data: &[u8]) -> Result<()> {
        static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut tmp = target.as_os_str().to_owned();
        tmp.push(format!(".{}.{seq}.tmp", std::process::id()));
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, target).await?;
        Ok(())
    }

    async fn read_record(&self, dir: &Path) -> Option<SessionRecord> {
        let path = dir.join(METADATA_FILE);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable session metadata, skipping");
                return None;
            },
        };
        match serde_json::from_slice(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt session metadata, treating as absent");
                None
            },
        }
    }

    /// Remove a session directory, retrying a few times: on some platforms
    /// a concurrent reader can briefly hold the directory open.
    pub async fn remove_session_dir(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id);
        let mut last_err: Option<std::io::Error> = None;
        for attempt in 0..FS_REMOVE_RETRIES {
            match fs::remove_dir_all(&dir).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => {
                    debug!(session_id, attempt, error = %e, "session dir removal failed, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(FS_REMOVE_RETRY_DELAY_MS)).await;
                },
            }
        }
        Err(StorageError::Io(last_err.unwrap_or_else(|| {
            std::io::Error::other("session dir removal failed")
        })))
    }

    /// Session ids whose directories are older than `grace`, by mtime.
    /// Used by the orphan reconciler.
    pub async fn sessions_older_than(&self, grace: Duration) -> Result<Vec<String>> {
        let now = SystemTime::now();
        let mut out = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(m) => m,
                Err(_) => continue,
            };
            if now.duration_since(modified).unwrap_or_default() >= grace {
                out.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl SessionBackend for FileStore {
    async fn save(&self, record: &SessionRecord) -> Result<()> {
        let dir = self.session_dir(&record.session_id);
        fs::create_dir_all(&dir).await?;
        let doc = serde_json::to_vec_pretty(record)?;
        self.write_atomic(&dir.join(METADATA_FILE), &doc).await
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.read_record(&self.session_dir(session_id)).await)
    }

    async fn update(&self, session_id: &str, update: &SessionUpdate) -> Result<()> {
        let dir = self.session_dir(session_id);
        let Some(mut record) = self.read_record(&dir).await else {
            return Err(StorageError::NotFound(session_id.to_owned()));
        };
        update.apply(&mut record);
        let doc = serde_json::to_vec_pretty(&record)?;
        self.write_atomic(&dir.join(METADATA_FILE), &doc).await
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.remove_session_dir(session_id).await
    }

    async fn get_all(&self) -> Result<Vec<SessionRecord>> {
        // O(n) directory scan; this path only activates when the network
        // backends are unavailable.
        let mut out = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Some(record) = self.read_record(&entry.path()).await {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn save_credentials(
        &self,
        session_id: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<()> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir).await?;
        self.write_atomic(&dir.join(sanitize_key(filename)), data).await
    }

    async fn get_credentials(
        &self,
        session_id: &str,
        filename: &str,
    ) -> Result<Option<Vec<u8>>> {
        let path = self.session_dir(session_id).join(sanitize_key(filename));
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_credentials(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy() != METADATA_FILE {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => {},
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    async fn has_credentials(&self, session_id: &str) -> Result<bool> {
        let dir = self.session_dir(session_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            // Leftover temp files from an interrupted write are not credentials.
            if name == METADATA_FILE || name.ends_with(".tmp") {
                continue;
            }
            if entry.metadata().await.map(|m| m.len() > 0).unwrap_or(false) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionvault_core::{ConnectionStatus, SessionSource};
    use tempfile::TempDir;

    async fn store() -> (FileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let (store, _dir) = store().await;
        let mut record = SessionRecord::new("s1", 7, SessionSource::Telegram);
        record.phone_number = Some("555".to_string());
        store.save(&record).await.unwrap();

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn no_temp_file_left_after_save() {
        let (store, dir) = store().await;
        let record = SessionRecord::new("s1", 7, SessionSource::Web);
        store.save(&record).await.unwrap();

        let session_dir = dir.path().join("s1");
        let names: Vec<String> = std::fs::read_dir(&session_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![METADATA_FILE.to_string()]);
    }

    #[tokio::test]
    async fn concurrent_writes_to_one_target_leave_one_complete_file() {
        let (store, dir) = store().await;
        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .save_credentials("s1", DEFAULT_CREDS_FILE, format!("blob-{i}").as_bytes())
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let data = store.get_credentials("s1", DEFAULT_CREDS_FILE).await.unwrap().unwrap();
        assert!(data.starts_with(b"blob-"));

        let leftovers: Vec<String> = std::fs::read_dir(dir.path().join("s1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[tokio::test]
    async fn update_applies_partial_fields() {
        let (store, _dir) = store().await;
        store.save(&SessionRecord::new("s1", 7, SessionSource::Web)).await.unwrap();

        store
            .update(
                "s1",
                &SessionUpdate {
                    is_connected: Some(true),
                    connection_status: Some(ConnectionStatus::Connected),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert!(loaded.is_connected);
        assert_eq!(loaded.connection_status, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn update_missing_session_is_not_found() {
        let (store, _dir) = store().await;
        let err = store.update("ghost", &SessionUpdate::default()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn corrupt_metadata_reads_as_absent() {
        let (store, dir) = store().await;
        let session_dir = dir.path().join("bad");
        std::fs::create_dir_all(&session_dir).unwrap();
        std::fs::write(session_dir.join(METADATA_FILE), b"{ not json").unwrap();

        assert!(store.get("bad").await.unwrap().is_none());
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn credentials_round_trip_and_sanitize() {
        let (store, dir) = store().await;
        store.save_credentials("s1", "pre/key 1.json", b"secret").await.unwrap();

        let data = store.get_credentials("s1", "pre/key 1.json").await.unwrap().unwrap();
        assert_eq!(data, b"secret");
        assert!(dir.path().join("s1").join("pre_key_1.json").exists());
    }

    #[tokio::test]
    async fn has_credentials_ignores_metadata_and_empty_files() {
        let (store, _dir) = store().await;
        store.save(&SessionRecord::new("s1", 7, SessionSource::Web)).await.unwrap();
        assert!(!store.has_credentials("s1").await.unwrap());

        store.save_credentials("s1", DEFAULT_CREDS_FILE, b"").await.unwrap();
        assert!(!store.has_credentials("s1").await.unwrap());

        store.save_credentials("s1", DEFAULT_CREDS_FILE, b"blob").await.unwrap();
        assert!(store.has_credentials("s1").await.unwrap());
    }

    #[tokio::test]
    async fn delete_credentials_keeps_metadata() {
        let (store, _dir) = store().await;
        let record = SessionRecord::new("s1", 7, SessionSource::Web);
        store.save(&record).await.unwrap();
        store.save_credentials("s1", DEFAULT_CREDS_FILE, b"blob").await.unwrap();

        store.delete_credentials("s1").await.unwrap();
        assert!(!store.has_credentials("s1").await.unwrap());
        assert!(store.get("s1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (store, _dir) = store().await;
        store.delete("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn get_all_scans_directories() {
        let (store, _dir) = store().await;
        for id in ["a", "b", "c"] {
            store.save(&SessionRecord::new(id, 7, SessionSource::Telegram)).await.unwrap();
        }
        let mut ids: Vec<String> =
            store.get_all().await.unwrap().into_iter().map(|r| r.session_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
