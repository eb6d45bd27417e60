//! Note records as they live in the metadata and preferences stores.

use crate::note_id::NoteId;
use serde::{Deserialize, Serialize};

/// Title given to notes created or discovered without one.
pub const DEFAULT_TITLE: &str = "Untitled note";

/// Progress value reported when a note starts syncing.
pub const PROGRESS_STARTED: i32 = 0;
/// Progress value reported when a note finished syncing.
pub const PROGRESS_DONE: i32 = 100;
/// Progress value reported when a note failed to sync.
pub const PROGRESS_FAILED: i32 = -1;

/// Metadata record of a note (the meta store's value type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    #[serde(default = "default_title")]
    pub title: String,
    pub created_on: String,
    /// Authoritative field for choosing the sync direction.
    pub modified_on: String,
    /// `None` never synced, `0..=100` in progress or done, `-1` failed.
    #[serde(default)]
    pub sync_progress: Option<i32>,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

impl Note {
    /// A fresh note stamped with the current time.
    pub fn new(id: NoteId, title: &str) -> Self {
        let now = crate::time::now_iso();
        Self {
            id,
            title: normalize_title(title),
            created_on: now.clone(),
            modified_on: now,
            sync_progress: None,
        }
    }

    pub fn sync_status(&self) -> SyncStatus {
        SyncStatus::from_progress(self.sync_progress)
    }
}

/// Blank titles fall back to [`DEFAULT_TITLE`].
pub fn normalize_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Per-note sync indicator derived from `syncProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    NeverSynced,
    Syncing,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn from_progress(progress: Option<i32>) -> Self {
        match progress {
            None => SyncStatus::NeverSynced,
            Some(p) if p < 0 => SyncStatus::Failed,
            Some(p) if p >= PROGRESS_DONE => SyncStatus::Synced,
            Some(_) => SyncStatus::Syncing,
        }
    }
}

/// Base map layer shown under a note's features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TileLayer {
    #[default]
    Paper,
    Street,
    Satellite,
}

impl From<TileLayer> for u8 {
    fn from(layer: TileLayer) -> u8 {
        match layer {
            TileLayer::Paper => 0,
            TileLayer::Street => 1,
            TileLayer::Satellite => 2,
        }
    }
}

impl TryFrom<u8> for TileLayer {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TileLayer::Paper),
            1 => Ok(TileLayer::Street),
            2 => Ok(TileLayer::Satellite),
            other => Err(format!("unknown tile layer {}", other)),
        }
    }
}

impl std::str::FromStr for TileLayer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "paper" => Ok(TileLayer::Paper),
            "street" => Ok(TileLayer::Street),
            "satellite" => Ok(TileLayer::Satellite),
            other => Err(format!("unknown tile layer {}", other)),
        }
    }
}

/// View state of a note (the prefs store's value type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotePrefs {
    pub layer: TileLayer,
    /// Map center in the projected coordinates of the map view.
    pub center: [f64; 2],
    pub zoom: f64,
    pub rotation: f64,
}

impl Default for NotePrefs {
    fn default() -> Self {
        Self {
            layer: TileLayer::Paper,
            center: [-11_000_000.0, 4_600_000.0],
            zoom: 4.0,
            rotation: 0.0,
        }
    }
}

/// Payload of the remote `{id}.props` file: metadata and prefs side by side.
///
/// Every field is optional on read because props files written by older
/// clients carry whatever the note record held at the time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NoteId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<TileLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoom: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
}

impl NoteProps {
    pub fn from_parts(note: &Note, prefs: &NotePrefs) -> Self {
        Self {
            id: Some(note.id.clone()),
            title: Some(note.title.clone()),
            created_on: Some(note.created_on.clone()),
            modified_on: Some(note.modified_on.clone()),
            layer: Some(prefs.layer),
            center: Some(prefs.center),
            zoom: Some(prefs.zoom),
            rotation: Some(prefs.rotation),
        }
    }

    /// Overlay the view fields present in these props onto `prefs`.
    pub fn apply_to_prefs(&self, prefs: &mut NotePrefs) {
        if let Some(layer) = self.layer {
            prefs.layer = layer;
        }
        if let Some(center) = self.center {
            prefs.center = center;
        }
        if let Some(zoom) = self.zoom {
            prefs.zoom = zoom;
        }
        if let Some(rotation) = self.rotation {
            prefs.rotation = rotation;
        }
    }
}
