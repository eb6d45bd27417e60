//! NoteRepository: local-first note operations performed by the UI.
//!
//! Every mutation lands in the local stores immediately; the drive only
//! learns about it on the next [`SyncEngine`](crate::SyncEngine) run.
//! Content mutations bump `modifiedOn`, which is what makes the next sync
//! push them.

use crate::content::{ContentError, FeatureCollection};
use crate::note::{Note, NotePrefs, NoteProps, TileLayer, normalize_title};
use crate::note_id::NoteId;
use crate::store::{LocalStore, StoreError, StoreKind};
use crate::time::now_iso;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Note not found: {0}")]
    NotFound(NoteId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Note CRUD over a [`LocalStore`].
pub struct NoteRepository<S: LocalStore> {
    store: S,
}

impl<S: LocalStore> NoteRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a note with a fresh id, empty content and default prefs.
    pub async fn create_note(&self, title: &str) -> Result<Note> {
        let note = Note::new(NoteId::generate(), title);
        let key = note.id.as_str();

        self.store
            .set(StoreKind::Meta, key, serde_json::to_value(&note)?)
            .await?;
        self.store
            .set(StoreKind::Content, key, FeatureCollection::default().to_value())
            .await?;
        self.store
            .set(StoreKind::Prefs, key, serde_json::to_value(NotePrefs::default())?)
            .await?;

        info!(note_id = %note.id, title = %note.title, "note created");
        Ok(note)
    }

    /// All notes, most recently modified first.
    pub async fn list_notes(&self) -> Result<Vec<Note>> {
        let mut notes: Vec<Note> = self
            .store
            .values(StoreKind::Meta)
            .await?
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<Note>(value) {
                Ok(note) => Some(note),
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable note record");
                    None
                }
            })
            .collect();
        // ISO-8601 strings in one shape sort chronologically
        notes.sort_by(|a, b| b.modified_on.cmp(&a.modified_on));
        Ok(notes)
    }

    pub async fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        match self.store.get(StoreKind::Meta, id.as_str()).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Rename a note. Blank titles fall back to the default title.
    pub async fn rename_note(&self, id: &NoteId, title: &str) -> Result<Note> {
        let mut note = self.require_note(id).await?;
        note.title = normalize_title(title);
        self.write_meta(&note).await?;
        debug!(note_id = %id, title = %note.title, "note renamed");
        Ok(note)
    }

    /// Replace a note's features and bump `modifiedOn`.
    pub async fn save_features(&self, id: &NoteId, features: &FeatureCollection) -> Result<Note> {
        let mut note = self.require_note(id).await?;
        self.store
            .set(StoreKind::Content, id.as_str(), features.to_value())
            .await?;
        note.modified_on = now_iso();
        self.write_meta(&note).await?;
        debug!(note_id = %id, features = features.len(), "features saved");
        Ok(note)
    }

    /// A note's features; an absent record reads as an empty collection.
    pub async fn load_features(&self, id: &NoteId) -> Result<FeatureCollection> {
        match self.store.get(StoreKind::Content, id.as_str()).await? {
            Some(Value::String(text)) => Ok(FeatureCollection::parse(&text)?),
            Some(value) => Ok(FeatureCollection::from_value(value)?),
            None => Ok(FeatureCollection::default()),
        }
    }

    /// A note's view prefs; defaults when none are stored.
    pub async fn get_prefs(&self, id: &NoteId) -> Result<NotePrefs> {
        match self.store.get(StoreKind::Prefs, id.as_str()).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(NotePrefs::default()),
        }
    }

    pub async fn save_prefs(&self, id: &NoteId, prefs: &NotePrefs) -> Result<()> {
        self.store
            .set(StoreKind::Prefs, id.as_str(), serde_json::to_value(prefs)?)
            .await?;
        Ok(())
    }

    /// Remember the tile layer last shown for a note.
    pub async fn set_last_used_layer(&self, id: &NoteId, layer: TileLayer) -> Result<NotePrefs> {
        let mut prefs = self.get_prefs(id).await?;
        prefs.layer = layer;
        self.save_prefs(id, &prefs).await?;
        Ok(prefs)
    }

    /// Remove all three records of a note (local only).
    pub async fn delete_note(&self, id: &NoteId) -> Result<()> {
        for kind in StoreKind::ALL {
            self.store.del(kind, id.as_str()).await?;
        }
        info!(note_id = %id, "note deleted");
        Ok(())
    }

    /// Append the features of a GeoJSON document to a note.
    ///
    /// Invalid GeoJSON leaves the note untouched.
    pub async fn import_features(&self, id: &NoteId, geojson: &str) -> Result<Note> {
        let imported = FeatureCollection::parse(geojson)?;
        let mut features = self.load_features(id).await?;
        let count = imported.len();
        features.extend(imported);
        let note = self.save_features(id, &features).await?;
        info!(note_id = %id, count, "features imported");
        Ok(note)
    }

    /// A note's features as pretty-printed GeoJSON.
    pub async fn export_features(&self, id: &NoteId) -> Result<String> {
        self.require_note(id).await?;
        Ok(self.load_features(id).await?.to_json_pretty()?)
    }

    /// Metadata and prefs side by side, as mirrored in `{id}.props`.
    pub async fn note_props(&self, id: &NoteId) -> Result<NoteProps> {
        let note = self.require_note(id).await?;
        let prefs = self.get_prefs(id).await?;
        Ok(NoteProps::from_parts(&note, &prefs))
    }

    async fn require_note(&self, id: &NoteId) -> Result<Note> {
        self.get_note(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))
    }

    async fn write_meta(&self, note: &Note) -> Result<()> {
        self.store
            .set(StoreKind::Meta, note.id.as_str(), serde_json::to_value(note)?)
            .await?;
        Ok(())
    }
}
