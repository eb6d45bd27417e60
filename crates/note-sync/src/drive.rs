//! RemoteDrive trait for the cloud file store holding synced notes.
//!
//! Implementations:
//! - `InMemoryDrive` - For testing (controllable clock, failure injection)
//! - `GoogleDrive` (in notemapp-cli) - Drive v3 REST API via reqwest
//! - `JsRemoteDrive` (in notemapp-wasm) - fetch-based JS callbacks
//!
//! Authentication is the caller's business: implementations are handed an
//! already-authorized client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// MIME type of every file the app writes.
pub const JSON_MIME_TYPE: &str = "application/json";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Authorization failed: {0}")]
    Unauthorized(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Drive error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, DriveError>;

/// String-valued application properties attached to a file.
pub type Properties = HashMap<String, String>;

/// A file as returned by listings and writes.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveFile {
    /// Server-assigned id
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub app_properties: Properties,
}

/// Full metadata of a file.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveFileMeta {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub created_on: DateTime<Utc>,
    /// Server-maintained; compared against the note's `modifiedOn`
    pub modified_on: DateTime<Utc>,
    pub app_properties: Properties,
}

/// Cloud file store scoped to the application's private folder.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg(not(target_arch = "wasm32"))]
pub trait RemoteDrive: Send + Sync {
    /// List every file in the app folder
    async fn list_files(&self) -> Result<Vec<DriveFile>>;

    /// First file with exactly this name, if any
    async fn get_file_by_name(&self, name: &str) -> Result<Option<DriveFile>> {
        Ok(self
            .list_files()
            .await?
            .into_iter()
            .find(|file| file.name == name))
    }

    /// Download file content as text
    async fn get_file_content_by_id(&self, id: &str) -> Result<String>;

    /// Fetch file metadata including server timestamps
    async fn get_file_meta_by_id(&self, id: &str) -> Result<DriveFileMeta>;

    /// Create a file in the app folder
    async fn create_file(&self, name: &str, content: &str, properties: &Properties)
        -> Result<DriveFile>;

    /// Overwrite content of an existing file, keeping its id
    async fn update_file_by_id(
        &self,
        id: &str,
        name: &str,
        content: &str,
        mime_type: &str,
    ) -> Result<DriveFile>;

    /// Replace application properties of an existing file
    async fn update_file_properties(&self, id: &str, properties: &Properties)
        -> Result<DriveFile>;

    /// Permanently delete a file
    async fn delete_file_by_id(&self, id: &str) -> Result<()>;
}

/// Cloud file store (WASM version without Send + Sync).
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg(target_arch = "wasm32")]
pub trait RemoteDrive {
    /// List every file in the app folder
    async fn list_files(&self) -> Result<Vec<DriveFile>>;

    /// First file with exactly this name, if any
    async fn get_file_by_name(&self, name: &str) -> Result<Option<DriveFile>> {
        Ok(self
            .list_files()
            .await?
            .into_iter()
            .find(|file| file.name == name))
    }

    /// Download file content as text
    async fn get_file_content_by_id(&self, id: &str) -> Result<String>;

    /// Fetch file metadata including server timestamps
    async fn get_file_meta_by_id(&self, id: &str) -> Result<DriveFileMeta>;

    /// Create a file in the app folder
    async fn create_file(&self, name: &str, content: &str, properties: &Properties)
        -> Result<DriveFile>;

    /// Overwrite content of an existing file, keeping its id
    async fn update_file_by_id(
        &self,
        id: &str,
        name: &str,
        content: &str,
        mime_type: &str,
    ) -> Result<DriveFile>;

    /// Replace application properties of an existing file
    async fn update_file_properties(&self, id: &str, properties: &Properties)
        -> Result<DriveFile>;

    /// Permanently delete a file
    async fn delete_file_by_id(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredFile {
    id: String,
    name: String,
    mime_type: String,
    content: String,
    created_on: DateTime<Utc>,
    modified_on: DateTime<Utc>,
    app_properties: Properties,
}

impl StoredFile {
    fn to_file(&self) -> DriveFile {
        DriveFile {
            id: self.id.clone(),
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            app_properties: self.app_properties.clone(),
        }
    }

    fn to_meta(&self) -> DriveFileMeta {
        DriveFileMeta {
            id: self.id.clone(),
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            created_on: self.created_on,
            modified_on: self.modified_on,
            app_properties: self.app_properties.clone(),
        }
    }
}

/// In-memory drive for testing.
///
/// Content writes stamp `modified_on` with the drive clock, which follows
/// wall time unless pinned with [`InMemoryDrive::set_now`].
pub struct InMemoryDrive {
    files: RwLock<Vec<StoredFile>>,
    next_id: RwLock<u64>,
    now: RwLock<Option<DateTime<Utc>>>,
    /// File names whose lookups fail, for exercising error paths
    failing_names: RwLock<Vec<String>>,
    fail_listing: RwLock<bool>,
    /// Number of content writes (creates and updates)
    writes: RwLock<usize>,
}

impl InMemoryDrive {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(Vec::new()),
            next_id: RwLock::new(1),
            now: RwLock::new(None),
            failing_names: RwLock::new(Vec::new()),
            fail_listing: RwLock::new(false),
            writes: RwLock::new(0),
        }
    }

    /// Pin the drive clock used for `modified_on` stamps.
    pub fn set_now(&self, at: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }

    /// Make lookups of `name` fail with a network error.
    pub fn fail_name(&self, name: &str) {
        self.failing_names
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(name.to_string());
    }

    /// Make `list_files` fail with a network error.
    pub fn fail_listing(&self) {
        *self.fail_listing.write().unwrap_or_else(|e| e.into_inner()) = true;
    }

    /// Seed a file with explicit timestamps, bypassing the clock.
    pub fn insert_file(
        &self,
        name: &str,
        content: &str,
        created_on: DateTime<Utc>,
        modified_on: DateTime<Utc>,
        app_properties: Properties,
    ) -> String {
        let id = self.allocate_id();
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(StoredFile {
                id: id.clone(),
                name: name.to_string(),
                mime_type: JSON_MIME_TYPE.to_string(),
                content: content.to_string(),
                created_on,
                modified_on,
                app_properties,
            });
        id
    }

    /// Content of the first file named `name`.
    pub fn content_of(&self, name: &str) -> Option<String> {
        self.find(|f| f.name == name).map(|f| f.content)
    }

    /// Metadata of the first file named `name`.
    pub fn meta_of(&self, name: &str) -> Option<DriveFileMeta> {
        self.find(|f| f.name == name).map(|f| f.to_meta())
    }

    pub fn file_count(&self) -> usize {
        self.files.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn now(&self) -> DateTime<Utc> {
        self.now
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .unwrap_or_else(crate::time::now_utc)
    }

    fn allocate_id(&self) -> String {
        let mut next = self.next_id.write().unwrap_or_else(|e| e.into_inner());
        let id = format!("file-{}", *next);
        *next += 1;
        id
    }

    fn record_write(&self) {
        *self.writes.write().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    fn find(&self, pred: impl Fn(&StoredFile) -> bool) -> Option<StoredFile> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|f| pred(f))
            .cloned()
    }

    fn check_name(&self, name: &str) -> Result<()> {
        let failing = self.failing_names.read().unwrap_or_else(|e| e.into_inner());
        if failing.iter().any(|n| n == name) {
            return Err(DriveError::Network(format!("injected failure for {}", name)));
        }
        Ok(())
    }

    fn check_id(&self, id: &str) -> Result<StoredFile> {
        let file = self
            .find(|f| f.id == id)
            .ok_or_else(|| DriveError::NotFound(id.to_string()))?;
        self.check_name(&file.name)?;
        Ok(file)
    }

    fn modify(&self, id: &str, change: impl FnOnce(&mut StoredFile)) -> Result<DriveFile> {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        let file = files
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| DriveError::NotFound(id.to_string()))?;
        change(file);
        Ok(file.to_file())
    }
}

impl Default for InMemoryDrive {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl RemoteDrive for InMemoryDrive {
    async fn list_files(&self) -> Result<Vec<DriveFile>> {
        if *self.fail_listing.read().unwrap_or_else(|e| e.into_inner()) {
            return Err(DriveError::Network("injected listing failure".to_string()));
        }
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        Ok(files.iter().map(StoredFile::to_file).collect())
    }

    async fn get_file_by_name(&self, name: &str) -> Result<Option<DriveFile>> {
        self.check_name(name)?;
        Ok(self.find(|f| f.name == name).map(|f| f.to_file()))
    }

    async fn get_file_content_by_id(&self, id: &str) -> Result<String> {
        Ok(self.check_id(id)?.content)
    }

    async fn get_file_meta_by_id(&self, id: &str) -> Result<DriveFileMeta> {
        Ok(self.check_id(id)?.to_meta())
    }

    async fn create_file(
        &self,
        name: &str,
        content: &str,
        properties: &Properties,
    ) -> Result<DriveFile> {
        self.check_name(name)?;
        let now = self.now();
        let file = StoredFile {
            id: self.allocate_id(),
            name: name.to_string(),
            mime_type: JSON_MIME_TYPE.to_string(),
            content: content.to_string(),
            created_on: now,
            modified_on: now,
            app_properties: properties.clone(),
        };
        let created = file.to_file();
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(file);
        self.record_write();
        Ok(created)
    }

    async fn update_file_by_id(
        &self,
        id: &str,
        name: &str,
        content: &str,
        mime_type: &str,
    ) -> Result<DriveFile> {
        self.check_id(id)?;
        let now = self.now();
        let updated = self.modify(id, |file| {
            file.name = name.to_string();
            file.mime_type = mime_type.to_string();
            file.content = content.to_string();
            file.modified_on = now;
        })?;
        self.record_write();
        Ok(updated)
    }

    async fn update_file_properties(
        &self,
        id: &str,
        properties: &Properties,
    ) -> Result<DriveFile> {
        self.check_id(id)?;
        self.modify(id, |file| {
            file.app_properties.extend(properties.clone());
        })
    }

    async fn delete_file_by_id(&self, id: &str) -> Result<()> {
        self.check_id(id)?;
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|f| f.id != id);
        Ok(())
    }
}

// Implement RemoteDrive for Arc<T> where T: RemoteDrive
// This lets tests inspect the drive after handing it to the engine
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg(not(target_arch = "wasm32"))]
impl<T: RemoteDrive + Send + Sync> RemoteDrive for std::sync::Arc<T> {
    async fn list_files(&self) -> Result<Vec<DriveFile>> {
        (**self).list_files().await
    }

    async fn get_file_by_name(&self, name: &str) -> Result<Option<DriveFile>> {
        (**self).get_file_by_name(name).await
    }

    async fn get_file_content_by_id(&self, id: &str) -> Result<String> {
        (**self).get_file_content_by_id(id).await
    }

    async fn get_file_meta_by_id(&self, id: &str) -> Result<DriveFileMeta> {
        (**self).get_file_meta_by_id(id).await
    }

    async fn create_file(
        &self,
        name: &str,
        content: &str,
        properties: &Properties,
    ) -> Result<DriveFile> {
        (**self).create_file(name, content, properties).await
    }

    async fn update_file_by_id(
        &self,
        id: &str,
        name: &str,
        content: &str,
        mime_type: &str,
    ) -> Result<DriveFile> {
        (**self).update_file_by_id(id, name, content, mime_type).await
    }

    async fn update_file_properties(
        &self,
        id: &str,
        properties: &Properties,
    ) -> Result<DriveFile> {
        (**self).update_file_properties(id, properties).await
    }

    async fn delete_file_by_id(&self, id: &str) -> Result<()> {
        (**self).delete_file_by_id(id).await
    }
}
