//! LocalStore trait abstraction for the three per-note keyspaces.
//!
//! Implementations:
//! - `InMemoryStore` - For testing
//! - `JsLocalStore` (in notemapp-wasm) - idb-keyval stores via JS bridge
//! - `FileStore` (in notemapp-cli) - JSON files via tokio::fs
//!
//! Uses `target_arch = "wasm32"` for conditional compilation instead of feature flags
//! to avoid Cargo's feature unification issues when building the workspace.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Read-modify-write callback for [`LocalStore::update`].
///
/// Receives the current value (`None` when absent) and returns the value to store.
pub type Updater = Box<dyn FnOnce(Option<Value>) -> Value + Send>;

/// One of the three independent keyspaces a note is spread across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreKind {
    /// Serialized feature collection
    Content,
    /// `Note` records
    Meta,
    /// `NotePrefs` records
    Prefs,
}

impl StoreKind {
    pub const ALL: [StoreKind; 3] = [StoreKind::Content, StoreKind::Meta, StoreKind::Prefs];

    /// Name of the backing database/directory for this keyspace.
    pub fn name(&self) -> &'static str {
        match self {
            StoreKind::Content => "notes",
            StoreKind::Meta => "notes-meta",
            StoreKind::Prefs => "notes-prefs",
        }
    }
}

/// Namespaced key-value persistence used by the sync engine.
///
/// On native platforms, implementations must be `Send + Sync` for use across threads.
/// On WASM (wasm32), these bounds are relaxed since WASM is single-threaded.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg(not(target_arch = "wasm32"))]
pub trait LocalStore: Send + Sync {
    /// Read a value (None if absent)
    async fn get(&self, kind: StoreKind, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one
    async fn set(&self, kind: StoreKind, key: &str, value: Value) -> Result<()>;

    /// Read-modify-write a value
    async fn update(&self, kind: StoreKind, key: &str, updater: Updater) -> Result<()> {
        let current = self.get(kind, key).await?;
        self.set(kind, key, updater(current)).await
    }

    /// Delete a value (no-op if absent)
    async fn del(&self, kind: StoreKind, key: &str) -> Result<()>;

    /// List keys of a keyspace
    async fn keys(&self, kind: StoreKind) -> Result<Vec<String>>;

    /// List values of a keyspace
    async fn values(&self, kind: StoreKind) -> Result<Vec<Value>>;
}

/// Namespaced key-value persistence (WASM version without Send + Sync).
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg(target_arch = "wasm32")]
pub trait LocalStore {
    /// Read a value (None if absent)
    async fn get(&self, kind: StoreKind, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one
    async fn set(&self, kind: StoreKind, key: &str, value: Value) -> Result<()>;

    /// Read-modify-write a value
    async fn update(&self, kind: StoreKind, key: &str, updater: Updater) -> Result<()> {
        let current = self.get(kind, key).await?;
        self.set(kind, key, updater(current)).await
    }

    /// Delete a value (no-op if absent)
    async fn del(&self, kind: StoreKind, key: &str) -> Result<()>;

    /// List keys of a keyspace
    async fn keys(&self, kind: StoreKind) -> Result<Vec<String>>;

    /// List values of a keyspace
    async fn values(&self, kind: StoreKind) -> Result<Vec<Value>>;
}

/// In-memory store for testing.
///
/// Keys are kept ordered, like IndexedDB cursors return them.
pub struct InMemoryStore {
    spaces: RwLock<HashMap<StoreKind, BTreeMap<String, Value>>>,
    /// Keys whose reads and writes fail, for exercising error paths
    failing: RwLock<Vec<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let spaces = StoreKind::ALL
            .iter()
            .map(|kind| (*kind, BTreeMap::new()))
            .collect();
        Self {
            spaces: RwLock::new(spaces),
            failing: RwLock::new(Vec::new()),
        }
    }

    /// Make every operation on `key` fail with a backend error.
    pub fn fail_key(&self, key: &str) {
        self.failing
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.to_string());
    }

    /// Number of records in a keyspace.
    pub fn len(&self, kind: StoreKind) -> usize {
        self.spaces
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .map_or(0, BTreeMap::len)
    }

    pub fn contains(&self, kind: StoreKind, key: &str) -> bool {
        self.spaces
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .is_some_and(|space| space.contains_key(key))
    }

    fn check(&self, key: &str) -> Result<()> {
        let failing = self.failing.read().unwrap_or_else(|e| e.into_inner());
        if failing.iter().any(|k| k == key) {
            return Err(StoreError::Backend(format!("injected failure for {}", key)));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl LocalStore for InMemoryStore {
    async fn get(&self, kind: StoreKind, key: &str) -> Result<Option<Value>> {
        self.check(key)?;
        let spaces = self.spaces.read().unwrap_or_else(|e| e.into_inner());
        Ok(spaces.get(&kind).and_then(|space| space.get(key)).cloned())
    }

    async fn set(&self, kind: StoreKind, key: &str, value: Value) -> Result<()> {
        self.check(key)?;
        let mut spaces = self.spaces.write().unwrap_or_else(|e| e.into_inner());
        spaces.entry(kind).or_default().insert(key.to_string(), value);
        Ok(())
    }

    async fn update(&self, kind: StoreKind, key: &str, updater: Updater) -> Result<()> {
        self.check(key)?;
        // Single write lock so the read-modify-write is atomic
        let mut spaces = self.spaces.write().unwrap_or_else(|e| e.into_inner());
        let space = spaces.entry(kind).or_default();
        let next = updater(space.remove(key));
        space.insert(key.to_string(), next);
        Ok(())
    }

    async fn del(&self, kind: StoreKind, key: &str) -> Result<()> {
        self.check(key)?;
        let mut spaces = self.spaces.write().unwrap_or_else(|e| e.into_inner());
        if let Some(space) = spaces.get_mut(&kind) {
            space.remove(key);
        }
        Ok(())
    }

    async fn keys(&self, kind: StoreKind) -> Result<Vec<String>> {
        let spaces = self.spaces.read().unwrap_or_else(|e| e.into_inner());
        Ok(spaces
            .get(&kind)
            .map(|space| space.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn values(&self, kind: StoreKind) -> Result<Vec<Value>> {
        let spaces = self.spaces.read().unwrap_or_else(|e| e.into_inner());
        Ok(spaces
            .get(&kind)
            .map(|space| space.values().cloned().collect())
            .unwrap_or_default())
    }
}

// Implement LocalStore for Arc<T> where T: LocalStore
// This lets tests keep a handle on the store they hand to the engine
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg(not(target_arch = "wasm32"))]
impl<T: LocalStore + Send + Sync> LocalStore for std::sync::Arc<T> {
    async fn get(&self, kind: StoreKind, key: &str) -> Result<Option<Value>> {
        (**self).get(kind, key).await
    }

    async fn set(&self, kind: StoreKind, key: &str, value: Value) -> Result<()> {
        (**self).set(kind, key, value).await
    }

    async fn update(&self, kind: StoreKind, key: &str, updater: Updater) -> Result<()> {
        (**self).update(kind, key, updater).await
    }

    async fn del(&self, kind: StoreKind, key: &str) -> Result<()> {
        (**self).del(kind, key).await
    }

    async fn keys(&self, kind: StoreKind) -> Result<Vec<String>> {
        (**self).keys(kind).await
    }

    async fn values(&self, kind: StoreKind) -> Result<Vec<Value>> {
        (**self).values(kind).await
    }
}
