//! File-backed LocalStore using tokio::fs.
//!
//! Layout: `<base>/<store name>/<key>.json`, one directory per keyspace
//! (`notes`, `notes-meta`, `notes-prefs`).

use async_trait::async_trait;
use note_sync::store::{LocalStore, Result, StoreError, StoreKind, Updater};
use note_sync::NoteId;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

const RECORD_EXTENSION: &str = "json";

/// Native note store for the CLI
pub struct FileStore {
    base_path: PathBuf,
    /// Serializes read-modify-write cycles
    update_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            update_lock: Mutex::new(()),
        }
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn dir(&self, kind: StoreKind) -> PathBuf {
        self.base_path.join(kind.name())
    }

    fn record_path(&self, kind: StoreKind, key: &str) -> Result<PathBuf> {
        // Keys become file names, so they must be valid note ids
        key.parse::<NoteId>()
            .map_err(|e| StoreError::InvalidKey(format!("{}: {}", key, e)))?;
        Ok(self.dir(kind).join(format!("{}.{}", key, RECORD_EXTENSION)))
    }

    async fn read_records(&self, kind: StoreKind) -> Result<Vec<(String, PathBuf)>> {
        let dir = self.dir(kind);
        let mut dir = match fs::read_dir(&dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };

        let mut records = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(key) = path.file_stem().and_then(|s| s.to_str()) {
                records.push((key.to_string(), path.clone()));
            }
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    async fn read_value(path: &PathBuf) -> Result<Option<Value>> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Serialization(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    async fn write_value(path: &PathBuf, value: &Value) -> Result<()> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let bytes =
            serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        fs::write(path, bytes)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))
    }
}

#[async_trait]
impl LocalStore for FileStore {
    async fn get(&self, kind: StoreKind, key: &str) -> Result<Option<Value>> {
        let path = self.record_path(kind, key)?;
        Self::read_value(&path).await
    }

    async fn set(&self, kind: StoreKind, key: &str, value: Value) -> Result<()> {
        let path = self.record_path(kind, key)?;
        Self::write_value(&path, &value).await
    }

    async fn update(&self, kind: StoreKind, key: &str, updater: Updater) -> Result<()> {
        let path = self.record_path(kind, key)?;
        let _guard = self.update_lock.lock().await;
        let current = Self::read_value(&path).await?;
        Self::write_value(&path, &updater(current)).await
    }

    async fn del(&self, kind: StoreKind, key: &str) -> Result<()> {
        let path = self.record_path(kind, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    async fn keys(&self, kind: StoreKind) -> Result<Vec<String>> {
        Ok(self
            .read_records(kind)
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    async fn values(&self, kind: StoreKind) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        for (_, path) in self.read_records(kind).await? {
            if let Some(value) = Self::read_value(&path).await? {
                values.push(value);
            }
        }
        Ok(values)
    }
}
