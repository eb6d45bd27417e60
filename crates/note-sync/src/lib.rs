//! note-sync: Shared Rust library for local-first map notes synced to a cloud drive.
//!
//! This crate provides the core functionality for:
//! - The note data model (metadata, view prefs, GeoJSON content)
//! - Last-write-wins reconciliation between local stores and the drive
//! - Local-first note operations (create, rename, import/export, delete)
//! - LocalStore and RemoteDrive trait abstractions

pub mod config;
pub mod content;
pub mod drive;
pub mod engine;
pub mod events;
pub mod note;
pub mod note_id;
pub mod repository;
pub mod store;
pub mod time;

/// Remote file name suffix of note content (`{id}.json`).
pub const CONTENT_SUFFIX: &str = ".json";
/// Remote file name suffix of note metadata and prefs (`{id}.props`).
pub const PROPS_SUFFIX: &str = ".props";
/// Content written to a remote file to mark the note deleted.
pub const DELETED_SENTINEL: &str = "[deleted]";

pub use config::{DeleteMode, SyncConfig};
pub use content::{ContentError, Feature, FeatureCollection};
pub use drive::{DriveError, DriveFile, DriveFileMeta, InMemoryDrive, Properties, RemoteDrive};
pub use engine::{DiscoveryReport, SyncEngine, SyncError, SyncOutcome, SyncReport, SyncSummary};
pub use events::{EventBus, SharedEventBus, Subscription, SyncEvent};
pub use note::{Note, NotePrefs, NoteProps, SyncStatus, TileLayer};
pub use note_id::{NoteId, NoteIdError};
pub use repository::{NoteRepository, RepositoryError};
pub use store::{InMemoryStore, LocalStore, StoreError, StoreKind};
