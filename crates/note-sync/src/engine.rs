//! SyncEngine: last-write-wins reconciliation between the local stores and the drive.
//!
//! The protocol works per note:
//!
//! 1. Look up `{id}.json` on the drive. Missing means the note was never
//!    synced, so it is uploaded (plus `{id}.props` when props files are on).
//! 2. Otherwise compare the drive's modified time with the note's `modifiedOn`.
//!    A strictly newer remote is pulled; a `[deleted]` tombstone deletes the
//!    note locally. Anything else (including equal timestamps) is pushed.
//! 3. Progress goes out as `0`, then exactly one of `100` or `-1`.
//!
//! Discovery then walks the drive listing and adopts notes that only exist
//! remotely. There is no retry, no rollback and no concurrency: every call
//! is awaited in order, and one failing note never stops the others.

use crate::config::{DeleteMode, SyncConfig};
use crate::content::{ContentError, FeatureCollection};
use crate::drive::{DriveError, DriveFile, DriveFileMeta, JSON_MIME_TYPE, Properties, RemoteDrive};
use crate::events::{EventBus, SharedEventBus, Subscription, SyncEvent};
use crate::note::{Note, NotePrefs, NoteProps, PROGRESS_DONE, PROGRESS_FAILED, PROGRESS_STARTED};
use crate::note_id::NoteId;
use crate::store::{LocalStore, StoreError, StoreKind};
use crate::time::{TimestampError, datetime_to_iso, iso_to_millis};
use crate::{CONTENT_SUFFIX, DELETED_SENTINEL, PROPS_SUFFIX};

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// App property holding the note title on content files.
pub const TITLE_PROPERTY: &str = "title";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Drive error: {0}")]
    Drive(#[from] DriveError),

    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    #[error("Timestamp error: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// What a single-note reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No remote file existed; the note was uploaded.
    Created,
    /// Local copy was newer or equal; the remote file was overwritten.
    Pushed,
    /// Remote copy was newer; local content and metadata were replaced.
    Pulled,
    /// Remote held the deletion tombstone; the note was removed locally.
    DeletedLocally,
    /// An error occurred; progress was reported as -1.
    Failed,
}

/// Outcomes of a note-set reconciliation, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSummary {
    pub outcomes: Vec<(NoteId, SyncOutcome)>,
}

impl SyncSummary {
    pub fn count(&self, outcome: SyncOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }

    /// Ids of notes that failed to sync.
    pub fn failed(&self) -> impl Iterator<Item = &NoteId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == SyncOutcome::Failed)
            .map(|(id, _)| id)
    }
}

/// Result of a discovery pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryReport {
    /// Notes adopted from the drive.
    pub added: Vec<NoteId>,
    /// Remote file names that were ignored.
    pub skipped: Vec<String>,
    /// Local notes removed because their remote file disappeared.
    pub removed: Vec<NoteId>,
    /// Set when the pass stopped early.
    pub aborted: Option<String>,
}

/// Combined result of [`SyncEngine::sync_all`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub local: SyncSummary,
    pub remote: DiscoveryReport,
}

/// Reconciles notes in a [`LocalStore`] with files on a [`RemoteDrive`].
pub struct SyncEngine<S: LocalStore, D: RemoteDrive> {
    store: S,
    drive: D,
    config: SyncConfig,
    events: SharedEventBus,
}

impl<S: LocalStore, D: RemoteDrive> SyncEngine<S, D> {
    pub fn new(store: S, drive: D) -> Self {
        Self::with_config(store, drive, SyncConfig::default())
    }

    pub fn with_config(store: S, drive: D, config: SyncConfig) -> Self {
        Self {
            store,
            drive,
            config,
            events: SharedEventBus::new(EventBus::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn drive(&self) -> &D {
        &self.drive
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    /// Subscribe to sync events. Drop the returned handle to unsubscribe.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn subscribe(&self, callback: impl Fn(SyncEvent) + Send + Sync + 'static) -> Subscription {
        self.events.subscribe(callback)
    }

    /// Subscribe to sync events. Drop the returned handle to unsubscribe.
    #[cfg(target_arch = "wasm32")]
    pub fn subscribe(&self, callback: impl Fn(SyncEvent) + 'static) -> Subscription {
        self.events.subscribe(callback)
    }

    /// All readable note records in the meta store.
    ///
    /// Records that no longer deserialize are logged and left out.
    pub async fn local_notes(&self) -> Result<Vec<Note>> {
        let values = self.store.values(StoreKind::Meta).await?;
        Ok(values
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<Note>(value) {
                Ok(note) => Some(note),
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable note record");
                    None
                }
            })
            .collect())
    }

    /// Reconcile one note with its remote counterpart.
    ///
    /// Never fails: errors are logged, reported as progress `-1` and
    /// returned as [`SyncOutcome::Failed`].
    pub async fn sync_local_note(
        &self,
        note: &Note,
        on_progress: &dyn Fn(&str, i32),
    ) -> SyncOutcome {
        let id = note.id.as_str();
        self.report(on_progress, id, PROGRESS_STARTED);

        match self.reconcile(note).await {
            Ok(outcome) => {
                debug!(note_id = %id, ?outcome, "note synced");
                self.report(on_progress, id, PROGRESS_DONE);
                outcome
            }
            Err(e) => {
                error!(note_id = %id, error = %e, "failed to sync note");
                self.report(on_progress, id, PROGRESS_FAILED);
                SyncOutcome::Failed
            }
        }
    }

    /// Reconcile notes one after another, in the given order.
    pub async fn sync_local_notes(
        &self,
        notes: &[Note],
        on_progress: &dyn Fn(&str, i32),
    ) -> SyncSummary {
        let mut summary = SyncSummary::default();
        for note in notes {
            let outcome = self.sync_local_note(note, on_progress).await;
            summary.outcomes.push((note.id.clone(), outcome));
        }
        info!(
            total = notes.len(),
            failed = summary.count(SyncOutcome::Failed),
            "local notes synced"
        );
        summary
    }

    /// Adopt notes that exist only on the drive.
    ///
    /// Unreadable remote files are skipped. Any other error stops the pass
    /// and is recorded in [`DiscoveryReport::aborted`].
    pub async fn sync_remote_notes(&self, on_add_note: &dyn Fn(&Note)) -> DiscoveryReport {
        self.discover_guarded(on_add_note, &HashSet::new()).await
    }

    /// Sync every given note, then run discovery.
    ///
    /// Notes that failed to sync in this run are never removed by remote cleanup.
    pub async fn sync_all(
        &self,
        notes: &[Note],
        on_progress: &dyn Fn(&str, i32),
        on_add_note: &dyn Fn(&Note),
    ) -> SyncReport {
        let local = self.sync_local_notes(notes, on_progress).await;
        let protected: HashSet<String> = local.failed().map(|id| id.to_string()).collect();
        let remote = self.discover_guarded(on_add_note, &protected).await;
        SyncReport { local, remote }
    }

    /// Delete a note locally and propagate the deletion to the drive.
    ///
    /// In soft mode the content file is overwritten with the tombstone so
    /// other devices pick the deletion up; in hard mode both remote files
    /// are removed.
    pub async fn delete_note(&self, id: &NoteId) -> Result<()> {
        self.delete_local(id).await?;
        self.events.emit(SyncEvent::deleted(id.as_str(), "user"));

        let name = id.content_file_name();
        if let Some(file) = self.drive.get_file_by_name(&name).await? {
            match self.config.delete_mode {
                DeleteMode::Soft => {
                    self.drive
                        .update_file_by_id(&file.id, &name, DELETED_SENTINEL, JSON_MIME_TYPE)
                        .await?;
                }
                DeleteMode::Hard => {
                    self.drive.delete_file_by_id(&file.id).await?;
                }
            }
        }

        if self.config.delete_mode == DeleteMode::Hard {
            if let Some(props) = self.drive.get_file_by_name(&id.props_file_name()).await? {
                self.drive.delete_file_by_id(&props.id).await?;
            }
        }

        info!(note_id = %id, mode = ?self.config.delete_mode, "note deleted");
        Ok(())
    }

    fn report(&self, on_progress: &dyn Fn(&str, i32), id: &str, progress: i32) {
        on_progress(id, progress);
        self.events.emit(SyncEvent::progress(id, progress));
    }

    async fn reconcile(&self, note: &Note) -> Result<SyncOutcome> {
        let name = note.id.content_file_name();
        let Some(file) = self.drive.get_file_by_name(&name).await? else {
            self.upload_new(note).await?;
            return Ok(SyncOutcome::Created);
        };

        let meta = self.drive.get_file_meta_by_id(&file.id).await?;
        let remote_modified = meta.modified_on.timestamp_millis();
        let local_modified = iso_to_millis(&note.modified_on)?;

        if remote_modified > local_modified {
            self.pull(note, &file, &meta).await
        } else {
            self.push(note, &file).await?;
            Ok(SyncOutcome::Pushed)
        }
    }

    async fn upload_new(&self, note: &Note) -> Result<()> {
        let content = self.local_content(&note.id).await?;
        let file = self
            .drive
            .create_file(&note.id.content_file_name(), &content, &title_properties(&note.title))
            .await?;
        self.record_remote_time(note, &file.id).await?;

        if self.config.props_files {
            let props = self.local_props(note).await?;
            self.drive
                .create_file(&note.id.props_file_name(), &props, &Properties::new())
                .await?;
        }

        info!(note_id = %note.id, "uploaded new note");
        Ok(())
    }

    async fn push(&self, note: &Note, file: &DriveFile) -> Result<()> {
        let content = self.local_content(&note.id).await?;
        self.drive
            .update_file_by_id(&file.id, &file.name, &content, JSON_MIME_TYPE)
            .await?;

        if file.app_properties.get(TITLE_PROPERTY) != Some(&note.title) {
            self.drive
                .update_file_properties(&file.id, &title_properties(&note.title))
                .await?;
        }
        self.record_remote_time(note, &file.id).await?;

        if self.config.props_files {
            let props = self.local_props(note).await?;
            let props_name = note.id.props_file_name();
            match self.drive.get_file_by_name(&props_name).await? {
                Some(existing) => {
                    self.drive
                        .update_file_by_id(&existing.id, &props_name, &props, JSON_MIME_TYPE)
                        .await?;
                }
                None => {
                    self.drive
                        .create_file(&props_name, &props, &Properties::new())
                        .await?;
                }
            }
        }

        debug!(note_id = %note.id, "pushed note");
        Ok(())
    }

    /// Stamp the local note with the drive's modified time of its content
    /// file, so an unchanged note compares equal on the next run.
    async fn record_remote_time(&self, note: &Note, file_id: &str) -> Result<()> {
        let meta = self.drive.get_file_meta_by_id(file_id).await?;
        let mut fields = Map::new();
        fields.insert("modifiedOn".into(), Value::String(datetime_to_iso(&meta.modified_on)));
        let fallback = serde_json::to_value(note)?;
        self.store
            .update(
                StoreKind::Meta,
                note.id.as_str(),
                Box::new(move |current| merge_fields(current, fallback, fields)),
            )
            .await?;
        Ok(())
    }

    async fn pull(
        &self,
        note: &Note,
        file: &DriveFile,
        meta: &DriveFileMeta,
    ) -> Result<SyncOutcome> {
        let id = &note.id;
        let content = self.drive.get_file_content_by_id(&file.id).await?;

        if is_tombstone(&content) {
            self.delete_local(id).await?;
            self.events.emit(SyncEvent::deleted(id.as_str(), "tombstone"));
            info!(note_id = %id, "note deleted remotely");
            return Ok(SyncOutcome::DeletedLocally);
        }

        // Validate before touching anything local
        let remote_content = FeatureCollection::validate(&content)?;
        let props = if self.config.props_files {
            match self.drive.get_file_by_name(&id.props_file_name()).await? {
                Some(file) => self.read_props(id, &file).await?,
                None => None,
            }
        } else {
            None
        };

        self.store
            .set(StoreKind::Content, id.as_str(), remote_content)
            .await?;

        let mut fields = Map::new();
        fields.insert("modifiedOn".into(), Value::String(datetime_to_iso(&meta.modified_on)));
        if let Some(props) = &props {
            if let Some(title) = props.title.as_ref().filter(|t| !t.trim().is_empty()) {
                fields.insert("title".into(), Value::String(title.clone()));
            }
            if let Some(created_on) = &props.created_on {
                fields.insert("createdOn".into(), Value::String(created_on.clone()));
            }
        }
        let fallback = serde_json::to_value(note)?;
        self.store
            .update(
                StoreKind::Meta,
                id.as_str(),
                Box::new(move |current| merge_fields(current, fallback, fields)),
            )
            .await?;

        if let Some(props) = &props {
            let mut prefs = self.local_prefs(id).await?;
            props.apply_to_prefs(&mut prefs);
            self.store
                .set(StoreKind::Prefs, id.as_str(), serde_json::to_value(&prefs)?)
                .await?;
        }

        info!(note_id = %id, "pulled newer remote note");
        Ok(SyncOutcome::Pulled)
    }

    async fn discover_guarded(
        &self,
        on_add_note: &dyn Fn(&Note),
        protected: &HashSet<String>,
    ) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        if let Err(e) = self.discover(on_add_note, protected, &mut report).await {
            error!(error = %e, "remote discovery aborted");
            report.aborted = Some(e.to_string());
        }
        report
    }

    async fn discover(
        &self,
        on_add_note: &dyn Fn(&Note),
        protected: &HashSet<String>,
        report: &mut DiscoveryReport,
    ) -> Result<()> {
        let files = self.drive.list_files().await?;
        let local_ids: HashSet<String> =
            self.store.keys(StoreKind::Meta).await?.into_iter().collect();

        let props_files: HashMap<&str, &DriveFile> = files
            .iter()
            .filter(|f| f.name.ends_with(PROPS_SUFFIX))
            .map(|f| (f.name.as_str(), f))
            .collect();

        let mut remote_ids = HashSet::new();
        for file in files.iter().filter(|f| f.name.ends_with(CONTENT_SUFFIX)) {
            let Some(id) = NoteId::from_content_file_name(&file.name) else {
                self.skip(report, &file.name, "not a note file name");
                continue;
            };
            // Names are unique per note; later duplicates are ignored
            if !remote_ids.insert(id.to_string()) || local_ids.contains(id.as_str()) {
                continue;
            }

            let content = self.drive.get_file_content_by_id(&file.id).await?;
            if is_tombstone(&content) {
                debug!(note_id = %id, "skipping deleted remote note");
                report.skipped.push(file.name.clone());
                continue;
            }
            let remote_content = match FeatureCollection::validate(&content) {
                Ok(value) => value,
                Err(e) => {
                    warn!(file = %file.name, error = %e, "skipping unreadable remote note");
                    self.skip(report, &file.name, &e.to_string());
                    continue;
                }
            };

            let meta = self.drive.get_file_meta_by_id(&file.id).await?;
            let props_file = props_files.get(id.props_file_name().as_str()).copied();
            let props = match props_file {
                Some(props_file) if self.config.props_files => {
                    self.read_props(&id, props_file).await?
                }
                _ => None,
            };

            let note = self.adopt(&id, file, &meta, remote_content, props.as_ref()).await?;
            on_add_note(&note);
            self.events.emit(SyncEvent::added(id.as_str(), &note.title));
            info!(note_id = %id, title = %note.title, "adopted remote note");
            report.added.push(id);
        }

        if self.config.remote_cleanup {
            for local_id in &local_ids {
                if remote_ids.contains(local_id) || protected.contains(local_id) {
                    continue;
                }
                let id: NoteId = match local_id.parse() {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(key = %local_id, error = %e, "ignoring malformed local key");
                        continue;
                    }
                };
                self.delete_local(&id).await?;
                self.events.emit(SyncEvent::deleted(id.as_str(), "cleanup"));
                info!(note_id = %id, "removed note missing from drive");
                report.removed.push(id);
            }
        }

        Ok(())
    }

    async fn adopt(
        &self,
        id: &NoteId,
        file: &DriveFile,
        meta: &DriveFileMeta,
        content: Value,
        props: Option<&NoteProps>,
    ) -> Result<Note> {
        let title = [
            file.app_properties.get(TITLE_PROPERTY),
            props.and_then(|p| p.title.as_ref()),
        ]
        .into_iter()
        .flatten()
        .map(|t| t.trim())
        .find(|t| !t.is_empty())
        .unwrap_or(self.config.default_title.as_str())
        .to_string();

        let note = Note {
            id: id.clone(),
            title,
            created_on: datetime_to_iso(&meta.created_on),
            modified_on: datetime_to_iso(&meta.modified_on),
            sync_progress: Some(PROGRESS_DONE),
        };

        let mut prefs = NotePrefs::default();
        if let Some(props) = props {
            props.apply_to_prefs(&mut prefs);
        }

        self.store
            .set(StoreKind::Meta, id.as_str(), serde_json::to_value(&note)?)
            .await?;
        self.store
            .set(StoreKind::Content, id.as_str(), content)
            .await?;
        self.store
            .set(StoreKind::Prefs, id.as_str(), serde_json::to_value(&prefs)?)
            .await?;
        Ok(note)
    }

    fn skip(&self, report: &mut DiscoveryReport, name: &str, reason: &str) {
        report.skipped.push(name.to_string());
        self.events.emit(SyncEvent::skipped(name, reason));
    }

    async fn delete_local(&self, id: &NoteId) -> Result<()> {
        for kind in StoreKind::ALL {
            self.store.del(kind, id.as_str()).await?;
        }
        Ok(())
    }

    /// Serialized local content; an absent record uploads an empty collection.
    async fn local_content(&self, id: &NoteId) -> Result<String> {
        match self.store.get(StoreKind::Content, id.as_str()).await? {
            Some(Value::String(text)) => Ok(text),
            Some(value) => Ok(serde_json::to_string(&value)?),
            None => Ok(FeatureCollection::default().to_json()?),
        }
    }

    async fn local_prefs(&self, id: &NoteId) -> Result<NotePrefs> {
        match self.store.get(StoreKind::Prefs, id.as_str()).await? {
            Some(value) => Ok(serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(note_id = %id, error = %e, "resetting unreadable prefs");
                NotePrefs::default()
            })),
            None => Ok(NotePrefs::default()),
        }
    }

    async fn local_props(&self, note: &Note) -> Result<String> {
        let prefs = self.local_prefs(&note.id).await?;
        Ok(serde_json::to_string(&NoteProps::from_parts(note, &prefs))?)
    }

    /// Decode a props file. Unreadable props mean "nothing to merge".
    async fn read_props(&self, id: &NoteId, file: &DriveFile) -> Result<Option<NoteProps>> {
        let text = self.drive.get_file_content_by_id(&file.id).await?;
        match serde_json::from_str::<NoteProps>(&text) {
            Ok(props) => Ok(Some(props)),
            Err(e) => {
                warn!(note_id = %id, error = %e, "ignoring unreadable props file");
                Ok(None)
            }
        }
    }
}

fn is_tombstone(content: &str) -> bool {
    content.trim() == DELETED_SENTINEL
}

fn title_properties(title: &str) -> Properties {
    let mut properties = Properties::new();
    properties.insert(TITLE_PROPERTY.to_string(), title.to_string());
    properties
}

/// Overlay `fields` onto the stored record, keeping fields it does not name.
fn merge_fields(current: Option<Value>, fallback: Value, fields: Map<String, Value>) -> Value {
    let mut record = match current {
        Some(Value::Object(map)) => map,
        _ => match fallback {
            Value::Object(map) => map,
            _ => Map::new(),
        },
    };
    record.extend(fields);
    Value::Object(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::InMemoryDrive;
    use crate::note::TileLayer;
    use crate::repository::NoteRepository;
    use crate::store::InMemoryStore;
    use crate::time::{millis_to_datetime, millis_to_iso};
    use serde_json::json;
    use std::cell::RefCell;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type TestEngine = SyncEngine<Arc<InMemoryStore>, Arc<InMemoryDrive>>;

    const LINE: &str = r#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":{"type":"LineString","coordinates":[[0,0],[1,1]]},"properties":null}]}"#;
    const MARKER: &str = r#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":{"type":"Point","coordinates":[5,5]},"properties":{"content":"camp"}}]}"#;

    fn setup() -> (Arc<InMemoryStore>, Arc<InMemoryDrive>, TestEngine) {
        setup_with(SyncConfig::default())
    }

    fn setup_with(config: SyncConfig) -> (Arc<InMemoryStore>, Arc<InMemoryDrive>, TestEngine) {
        let store = Arc::new(InMemoryStore::new());
        let drive = Arc::new(InMemoryDrive::new());
        let engine = SyncEngine::with_config(Arc::clone(&store), Arc::clone(&drive), config);
        (store, drive, engine)
    }

    async fn seed_local(
        store: &InMemoryStore,
        id: &str,
        title: &str,
        modified: i64,
        content: &str,
    ) -> Note {
        let note = Note {
            id: id.parse().unwrap(),
            title: title.to_string(),
            created_on: millis_to_iso(0),
            modified_on: millis_to_iso(modified),
            sync_progress: None,
        };
        store
            .set(StoreKind::Meta, id, serde_json::to_value(&note).unwrap())
            .await
            .unwrap();
        store
            .set(StoreKind::Content, id, serde_json::from_str(content).unwrap())
            .await
            .unwrap();
        store
            .set(StoreKind::Prefs, id, serde_json::to_value(NotePrefs::default()).unwrap())
            .await
            .unwrap();
        note
    }

    fn seed_remote(
        drive: &InMemoryDrive,
        name: &str,
        content: &str,
        modified: i64,
        title: Option<&str>,
    ) -> String {
        let props = title.map(title_properties).unwrap_or_default();
        drive.insert_file(name, content, millis_to_datetime(0), millis_to_datetime(modified), props)
    }

    async fn stored_note(store: &InMemoryStore, id: &str) -> Note {
        serde_json::from_value(store.get(StoreKind::Meta, id).await.unwrap().unwrap()).unwrap()
    }

    async fn stored_prefs(store: &InMemoryStore, id: &str) -> NotePrefs {
        serde_json::from_value(store.get(StoreKind::Prefs, id).await.unwrap().unwrap()).unwrap()
    }

    fn remote_props(drive: &InMemoryDrive, name: &str) -> NoteProps {
        serde_json::from_str(&drive.content_of(name).unwrap()).unwrap()
    }

    fn remote_json(drive: &InMemoryDrive, name: &str) -> Value {
        serde_json::from_str(&drive.content_of(name).unwrap()).unwrap()
    }

    /// Records every progress callback.
    struct Progress(RefCell<Vec<(String, i32)>>);

    impl Progress {
        fn new() -> Self {
            Self(RefCell::new(Vec::new()))
        }

        fn record(&self, id: &str, progress: i32) {
            self.0.borrow_mut().push((id.to_string(), progress));
        }

        fn of(&self, id: &str) -> Vec<i32> {
            self.0
                .borrow()
                .iter()
                .filter(|(n, _)| n == id)
                .map(|(_, p)| *p)
                .collect()
        }
    }

    #[tokio::test]
    async fn test_equal_timestamps_upload() {
        let (store, drive, engine) = setup();
        let note = seed_local(&store, "n1", "Trip", 1_000, MARKER).await;
        seed_remote(&drive, "n1.json", LINE, 1_000, Some("Trip"));

        let progress = Progress::new();
        let outcome = engine.sync_local_note(&note, &|id, p| progress.record(id, p)).await;

        assert_eq!(outcome, SyncOutcome::Pushed);
        assert_eq!(progress.of("n1"), vec![0, 100]);
        assert_eq!(remote_json(&drive, "n1.json"), serde_json::from_str::<Value>(MARKER).unwrap());
    }

    #[tokio::test]
    async fn test_older_remote_is_overwritten_and_title_refreshed() {
        let (store, drive, engine) = setup();
        let note = seed_local(&store, "n1", "Renamed", 2_000, MARKER).await;
        let file_id = seed_remote(&drive, "n1.json", LINE, 1_000, Some("Old"));

        let outcome = engine.sync_local_note(&note, &|_, _| {}).await;

        assert_eq!(outcome, SyncOutcome::Pushed);
        let meta = drive.get_file_meta_by_id(&file_id).await.unwrap();
        assert_eq!(meta.app_properties.get("title").map(String::as_str), Some("Renamed"));
        // Props file is created on first push when missing
        let props = remote_props(&drive, "n1.props");
        assert_eq!(props.title.as_deref(), Some("Renamed"));
    }

    #[tokio::test]
    async fn test_newer_remote_is_pulled() {
        let (store, drive, engine) = setup();
        let note = seed_local(&store, "n1", "Trip", 1_000, MARKER).await;
        seed_remote(&drive, "n1.json", LINE, 5_000, Some("Trip"));

        let progress = Progress::new();
        let outcome = engine.sync_local_note(&note, &|id, p| progress.record(id, p)).await;

        assert_eq!(outcome, SyncOutcome::Pulled);
        assert_eq!(progress.of("n1"), vec![0, 100]);
        assert_eq!(
            store.get(StoreKind::Content, "n1").await.unwrap().unwrap(),
            serde_json::from_str::<Value>(LINE).unwrap()
        );

        let stored = stored_note(&store, "n1").await;
        assert_eq!(stored.modified_on, millis_to_iso(5_000));
        assert_eq!(stored.title, "Trip");
        assert_eq!(stored.id, note.id);
    }

    #[tokio::test]
    async fn test_pull_keeps_unknown_meta_fields() {
        let (store, drive, engine) = setup();
        let note = seed_local(&store, "n1", "Trip", 1_000, MARKER).await;
        let mut meta = serde_json::to_value(&note).unwrap();
        meta["pinned"] = json!(true);
        store.set(StoreKind::Meta, "n1", meta).await.unwrap();
        seed_remote(&drive, "n1.json", LINE, 5_000, None);

        engine.sync_local_note(&note, &|_, _| {}).await;

        let stored = store.get(StoreKind::Meta, "n1").await.unwrap().unwrap();
        assert_eq!(stored["pinned"], json!(true));
        assert_eq!(stored["modifiedOn"], json!(millis_to_iso(5_000)));
    }

    #[tokio::test]
    async fn test_pull_merges_props_file() {
        let (store, drive, engine) = setup();
        let note = seed_local(&store, "n1", "Trip", 1_000, MARKER).await;
        seed_remote(&drive, "n1.json", LINE, 5_000, None);
        seed_remote(
            &drive,
            "n1.props",
            r#"{"title":"Trip (edited)","createdOn":"2019-05-01T00:00:00.000Z","layer":2,"zoom":11}"#,
            5_000,
            None,
        );

        assert_eq!(engine.sync_local_note(&note, &|_, _| {}).await, SyncOutcome::Pulled);

        let stored = stored_note(&store, "n1").await;
        assert_eq!(stored.title, "Trip (edited)");
        assert_eq!(stored.created_on, "2019-05-01T00:00:00.000Z");
        assert_eq!(stored.modified_on, millis_to_iso(5_000));

        let prefs = stored_prefs(&store, "n1").await;
        assert_eq!(prefs.layer, TileLayer::Satellite);
        assert_eq!(prefs.zoom, 11.0);
        assert_eq!(prefs.rotation, 0.0);
    }

    #[tokio::test]
    async fn test_remote_tombstone_deletes_locally() {
        let (store, drive, engine) = setup();
        let note = seed_local(&store, "n1", "Trip", 1_000, MARKER).await;
        seed_remote(&drive, "n1.json", DELETED_SENTINEL, 5_000, None);

        let progress = Progress::new();
        let outcome = engine.sync_local_note(&note, &|id, p| progress.record(id, p)).await;

        assert_eq!(outcome, SyncOutcome::DeletedLocally);
        assert_eq!(progress.of("n1"), vec![0, 100]);
        for kind in StoreKind::ALL {
            assert!(!store.contains(kind, "n1"), "{:?} record survived", kind);
        }

        // Running again with the stale note is harmless
        assert_eq!(engine.sync_local_note(&note, &|_, _| {}).await, SyncOutcome::DeletedLocally);
    }

    #[tokio::test]
    async fn test_missing_remote_is_created() {
        let (store, drive, engine) = setup();
        let note = seed_local(&store, "n1", "Trip", 1_000, MARKER).await;

        let progress = Progress::new();
        let outcome = engine.sync_local_note(&note, &|id, p| progress.record(id, p)).await;

        assert_eq!(outcome, SyncOutcome::Created);
        assert_eq!(progress.of("n1"), vec![0, 100]);
        assert_eq!(remote_json(&drive, "n1.json"), serde_json::from_str::<Value>(MARKER).unwrap());
        let file = drive.get_file_by_name("n1.json").await.unwrap().unwrap();
        assert_eq!(file.app_properties.get("title").map(String::as_str), Some("Trip"));

        let props = remote_props(&drive, "n1.props");
        assert_eq!(props.id, Some(note.id.clone()));
        assert_eq!(props.layer, Some(TileLayer::Paper));
    }

    #[tokio::test]
    async fn test_missing_local_content_uploads_empty_collection() {
        let (store, drive, engine) = setup_with(SyncConfig {
            props_files: false,
            ..SyncConfig::default()
        });
        let note = seed_local(&store, "n1", "Trip", 1_000, MARKER).await;
        store.del(StoreKind::Content, "n1").await.unwrap();

        assert_eq!(engine.sync_local_note(&note, &|_, _| {}).await, SyncOutcome::Created);
        assert_eq!(
            remote_json(&drive, "n1.json"),
            json!({"type": "FeatureCollection", "features": []})
        );
        assert!(drive.content_of("n1.props").is_none());
    }

    #[tokio::test]
    async fn test_invalid_remote_content_fails_pull_without_local_changes() {
        let (store, drive, engine) = setup();
        let note = seed_local(&store, "n1", "Trip", 1_000, MARKER).await;
        seed_remote(&drive, "n1.json", "{not json", 5_000, None);

        let progress = Progress::new();
        let outcome = engine.sync_local_note(&note, &|id, p| progress.record(id, p)).await;

        assert_eq!(outcome, SyncOutcome::Failed);
        assert_eq!(progress.of("n1"), vec![0, -1]);
        assert_eq!(
            store.get(StoreKind::Content, "n1").await.unwrap().unwrap(),
            serde_json::from_str::<Value>(MARKER).unwrap()
        );
    }

    #[tokio::test]
    async fn test_unparseable_local_timestamp_fails_note() {
        let (store, drive, engine) = setup();
        let mut note = seed_local(&store, "n1", "Trip", 1_000, MARKER).await;
        note.modified_on = "yesterday".into();
        seed_remote(&drive, "n1.json", LINE, 5_000, None);

        assert_eq!(engine.sync_local_note(&note, &|_, _| {}).await, SyncOutcome::Failed);
    }

    #[tokio::test]
    async fn test_two_runs_reach_same_state() {
        let (store, drive, engine) = setup();
        let note = seed_local(&store, "n1", "Trip", 1_000, MARKER).await;
        drive.set_now(millis_to_datetime(3_000));

        assert_eq!(engine.sync_local_note(&note, &|_, _| {}).await, SyncOutcome::Created);
        assert_eq!(drive.write_count(), 2);
        let local_after_first = store.get(StoreKind::Meta, "n1").await.unwrap();
        let remote_after_first = drive.content_of("n1.json");
        let note = stored_note(&store, "n1").await;
        assert_eq!(note.modified_on, millis_to_iso(3_000));

        assert_eq!(engine.sync_local_note(&note, &|_, _| {}).await, SyncOutcome::Pushed);
        assert_eq!(store.get(StoreKind::Meta, "n1").await.unwrap(), local_after_first);
        assert_eq!(drive.content_of("n1.json"), remote_after_first);
        assert_eq!(drive.file_count(), 2);
        // One content and one props rewrite per run, never a new file
        assert_eq!(drive.write_count(), 4);

        let second_meta = drive.meta_of("n1.json");
        let note = stored_note(&store, "n1").await;
        assert_eq!(engine.sync_local_note(&note, &|_, _| {}).await, SyncOutcome::Pushed);
        assert_eq!(drive.meta_of("n1.json"), second_meta);
        assert_eq!(drive.file_count(), 2);
        assert_eq!(drive.write_count(), 6);
    }

    #[tokio::test]
    async fn test_local_edits_after_upload_are_pushed() {
        let (store, drive, engine) = setup();
        let repo = NoteRepository::new(Arc::clone(&store));
        let note = repo.create_note("A").await.unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(engine.sync_local_note(&note, &|_, _| {}).await, SyncOutcome::Created);
        let uploaded = drive.meta_of(&note.id.content_file_name()).unwrap();
        let synced = repo.get_note(&note.id).await.unwrap().unwrap();
        assert_eq!(synced.modified_on, datetime_to_iso(&uploaded.modified_on));

        std::thread::sleep(Duration::from_millis(5));
        repo.rename_note(&note.id, "B").await.unwrap();
        repo.set_last_used_layer(&note.id, TileLayer::Satellite).await.unwrap();

        let note = repo.get_note(&note.id).await.unwrap().unwrap();
        assert_eq!(engine.sync_local_note(&note, &|_, _| {}).await, SyncOutcome::Pushed);

        let after = repo.get_note(&note.id).await.unwrap().unwrap();
        assert_eq!(after.title, "B");
        assert_eq!(repo.get_prefs(&note.id).await.unwrap().layer, TileLayer::Satellite);

        let file = drive.get_file_by_name(&note.id.content_file_name()).await.unwrap().unwrap();
        assert_eq!(file.app_properties.get("title").map(String::as_str), Some("B"));
        let props = remote_props(&drive, &note.id.props_file_name());
        assert_eq!(props.title.as_deref(), Some("B"));
        assert_eq!(props.layer, Some(TileLayer::Satellite));
    }

    #[tokio::test]
    async fn test_pull_stores_remote_content_as_received() {
        let (store, drive, engine) = setup();
        let note = seed_local(&store, "n1", "Trip", 1_000, MARKER).await;
        let remote = r#"{"type":"FeatureCollection","features":[{"type":"Feature","bbox":[0,0,1,1],"geometry":{"type":"Point","coordinates":[1,1]}}]}"#;
        seed_remote(&drive, "n1.json", remote, 5_000, None);

        assert_eq!(engine.sync_local_note(&note, &|_, _| {}).await, SyncOutcome::Pulled);
        assert_eq!(
            store.get(StoreKind::Content, "n1").await.unwrap().unwrap(),
            serde_json::from_str::<Value>(remote).unwrap()
        );
    }

    #[tokio::test]
    async fn test_store_failure_marks_only_that_note() {
        let (store, _drive, engine) = setup();
        let a = seed_local(&store, "a", "A", 1_000, MARKER).await;
        let bad = seed_local(&store, "bad", "Bad", 1_000, MARKER).await;
        let c = seed_local(&store, "c", "C", 1_000, MARKER).await;
        store.fail_key("bad");

        let progress = Progress::new();
        let summary = engine
            .sync_local_notes(&[a, bad, c], &|id, p| progress.record(id, p))
            .await;

        assert_eq!(progress.of("a"), vec![0, 100]);
        assert_eq!(progress.of("bad"), vec![0, -1]);
        assert_eq!(progress.of("c"), vec![0, 100]);
        assert_eq!(summary.failed().map(|id| id.as_str()).collect::<Vec<_>>(), vec!["bad"]);
    }

    #[tokio::test]
    async fn test_failing_note_does_not_stop_the_rest() {
        let (store, drive, engine) = setup();
        let a = seed_local(&store, "a", "A", 1_000, MARKER).await;
        let bad = seed_local(&store, "bad", "Bad", 1_000, MARKER).await;
        let c = seed_local(&store, "c", "C", 1_000, MARKER).await;
        drive.fail_name("bad.json");

        let progress = Progress::new();
        let summary = engine
            .sync_local_notes(&[a, bad, c], &|id, p| progress.record(id, p))
            .await;

        assert_eq!(progress.of("a"), vec![0, 100]);
        assert_eq!(progress.of("bad"), vec![0, -1]);
        assert_eq!(progress.of("c"), vec![0, 100]);
        assert_eq!(summary.count(SyncOutcome::Created), 2);
        assert_eq!(summary.failed().map(|id| id.as_str()).collect::<Vec<_>>(), vec!["bad"]);
        // Order of processing matches input order
        let order: Vec<String> = progress.0.borrow().iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(order, vec!["a", "a", "bad", "bad", "c", "c"]);
    }

    #[tokio::test]
    async fn test_discovery_adopts_remote_only_notes() {
        let (store, drive, engine) = setup();
        seed_local(&store, "local1", "Mine", 1_000, MARKER).await;
        seed_remote(&drive, "local1.json", MARKER, 1_000, Some("Mine"));
        seed_remote(&drive, "r1.json", LINE, 7_000, Some("From phone"));
        seed_remote(&drive, "r1.props", r#"{"layer":1,"center":[1.0,2.0]}"#, 7_000, None);

        let added = RefCell::new(Vec::new());
        let report = engine
            .sync_remote_notes(&|note| added.borrow_mut().push(note.clone()))
            .await;

        assert!(report.aborted.is_none());
        assert_eq!(report.added, vec!["r1".parse::<NoteId>().unwrap()]);
        let added = added.into_inner();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].title, "From phone");
        assert_eq!(added[0].modified_on, millis_to_iso(7_000));
        assert_eq!(added[0].sync_progress, Some(100));

        assert_eq!(
            store.get(StoreKind::Content, "r1").await.unwrap().unwrap(),
            serde_json::from_str::<Value>(LINE).unwrap()
        );
        let prefs = stored_prefs(&store, "r1").await;
        assert_eq!(prefs.layer, TileLayer::Street);
        assert_eq!(prefs.center, [1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_discovery_title_falls_back() {
        let (store, drive, engine) = setup();
        seed_remote(&drive, "p1.json", LINE, 1_000, None);
        seed_remote(&drive, "p1.props", r#"{"title":"From props"}"#, 1_000, None);
        seed_remote(&drive, "u1.json", LINE, 1_000, None);

        let report = engine.sync_remote_notes(&|_| {}).await;
        assert_eq!(report.added.len(), 2);

        let p1 = stored_note(&store, "p1").await;
        let u1 = stored_note(&store, "u1").await;
        assert_eq!(p1.title, "From props");
        assert_eq!(u1.title, crate::note::DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn test_discovery_skips_invalid_json() {
        let (store, drive, engine) = setup();
        seed_remote(&drive, "broken.json", "{oops", 1_000, None);
        seed_remote(&drive, "gone.json", DELETED_SENTINEL, 1_000, None);
        seed_remote(&drive, "ok.json", LINE, 1_000, None);

        let added = RefCell::new(Vec::new());
        let report = engine
            .sync_remote_notes(&|note| added.borrow_mut().push(note.id.to_string()))
            .await;

        assert!(report.aborted.is_none());
        assert_eq!(added.into_inner(), vec!["ok"]);
        assert_eq!(report.skipped, vec!["broken.json", "gone.json"]);
        for kind in StoreKind::ALL {
            assert!(!store.contains(kind, "broken"));
            assert!(!store.contains(kind, "gone"));
        }
    }

    #[tokio::test]
    async fn test_discovery_aborts_on_listing_failure() {
        let (store, drive, engine) = setup();
        seed_local(&store, "n1", "Trip", 1_000, MARKER).await;
        drive.fail_listing();

        let report = engine.sync_remote_notes(&|_| {}).await;
        assert!(report.aborted.is_some());
        assert!(report.added.is_empty());
        assert!(store.contains(StoreKind::Meta, "n1"));
    }

    #[tokio::test]
    async fn test_discovery_aborts_on_store_failure() {
        let (store, drive, engine) = setup();
        seed_remote(&drive, "r1.json", LINE, 1_000, None);
        seed_remote(&drive, "r2.json", LINE, 1_000, None);
        store.fail_key("r1");

        let report = engine.sync_remote_notes(&|_| {}).await;

        assert!(report.aborted.is_some());
        assert!(report.added.is_empty());
        assert!(!store.contains(StoreKind::Meta, "r2"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_vanished_notes_only_when_enabled() {
        let (store, drive, engine) = setup();
        seed_local(&store, "kept", "Kept", 1_000, MARKER).await;
        seed_local(&store, "vanished", "Gone", 1_000, MARKER).await;
        seed_remote(&drive, "kept.json", MARKER, 1_000, None);

        let report = engine.sync_remote_notes(&|_| {}).await;
        assert!(report.removed.is_empty());
        assert!(store.contains(StoreKind::Meta, "vanished"));

        let engine = SyncEngine::with_config(
            Arc::clone(&store),
            Arc::clone(&drive),
            SyncConfig {
                remote_cleanup: true,
                ..SyncConfig::default()
            },
        );
        let report = engine.sync_remote_notes(&|_| {}).await;
        assert_eq!(report.removed, vec!["vanished".parse::<NoteId>().unwrap()]);
        for kind in StoreKind::ALL {
            assert!(!store.contains(kind, "vanished"));
        }
        assert!(store.contains(StoreKind::Meta, "kept"));
    }

    #[tokio::test]
    async fn test_sync_all_protects_failed_notes_from_cleanup() {
        let (store, drive, engine) = setup_with(SyncConfig {
            remote_cleanup: true,
            ..SyncConfig::default()
        });
        let ok = seed_local(&store, "ok", "Ok", 1_000, MARKER).await;
        let bad = seed_local(&store, "bad", "Bad", 1_000, MARKER).await;
        drive.fail_name("bad.json");
        seed_remote(&drive, "r1.json", LINE, 1_000, None);

        let report = engine.sync_all(&[ok, bad], &|_, _| {}, &|_| {}).await;

        assert_eq!(report.local.count(SyncOutcome::Created), 1);
        assert_eq!(report.remote.added, vec!["r1".parse::<NoteId>().unwrap()]);
        assert!(report.remote.removed.is_empty());
        assert!(store.contains(StoreKind::Meta, "bad"));
    }

    #[tokio::test]
    async fn test_delete_note_soft_writes_tombstone() {
        let (store, drive, engine) = setup();
        let note = seed_local(&store, "n1", "Trip", 1_000, MARKER).await;
        engine.sync_local_note(&note, &|_, _| {}).await;

        engine.delete_note(&note.id).await.unwrap();

        assert!(!store.contains(StoreKind::Meta, "n1"));
        assert_eq!(drive.content_of("n1.json").as_deref(), Some(DELETED_SENTINEL));
        // Another device adopting the drive state ignores the tombstone
        let other = SyncEngine::new(InMemoryStore::new(), Arc::clone(&drive));
        let report = other.sync_remote_notes(&|_| {}).await;
        assert!(report.added.is_empty());
    }

    #[tokio::test]
    async fn test_delete_note_hard_removes_remote_files() {
        let (store, drive, engine) = setup_with(SyncConfig {
            delete_mode: DeleteMode::Hard,
            ..SyncConfig::default()
        });
        let note = seed_local(&store, "n1", "Trip", 1_000, MARKER).await;
        engine.sync_local_note(&note, &|_, _| {}).await;
        assert_eq!(drive.file_count(), 2);

        engine.delete_note(&note.id).await.unwrap();

        assert_eq!(drive.file_count(), 0);
        assert!(!store.contains(StoreKind::Content, "n1"));
    }

    #[tokio::test]
    async fn test_progress_is_mirrored_on_event_bus() {
        let (store, _drive, engine) = setup();
        let note = seed_local(&store, "n1", "Trip", 1_000, MARKER).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = engine.subscribe(move |event| {
            if let SyncEvent::NoteProgress { progress, .. } = event {
                seen_clone.lock().unwrap().push(progress);
            }
        });

        engine.sync_local_note(&note, &|_, _| {}).await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 100]);
    }

    #[tokio::test]
    async fn test_local_notes_skips_unreadable_records() {
        let (store, _drive, engine) = setup();
        seed_local(&store, "n1", "Trip", 1_000, MARKER).await;
        store.set(StoreKind::Meta, "junk", json!({"nope": 1})).await.unwrap();

        let notes = engine.local_notes().await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "Trip");
    }
}
