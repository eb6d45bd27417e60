//! WASM bindings for note-sync.
//!
//! Provides the bridge between the TypeScript web app and Rust (note-sync).
//!
//! # Architecture
//!
//! The web app creates a `JsLocalStore` over its idb-keyval stores and a
//! `JsRemoteDrive` over its fetch-based Drive client. Both implement the
//! note-sync traits, so the Rust `SyncEngine` can reconcile notes through
//! JavaScript.
//!
//! ```text
//! TypeScript                    WASM (Rust)
//! ──────────                    ───────────
//! idb-keyval ──callbacks──> JsLocalStore ──┐
//! Drive fetch ─callbacks──> JsRemoteDrive ─┤
//!                                          ▼
//!                               SyncEngine<JsLocalStore, JsRemoteDrive>
//!                                          │
//!                                          ▼
//!                               WasmNoteSync (exposed to JS)
//! ```
//!
//! **Note**: This crate only compiles for `wasm32` targets. When building for native
//! targets (e.g., during `cargo check --workspace`), this crate provides no exports.

#[cfg(target_arch = "wasm32")]
mod drive_bridge;
#[cfg(target_arch = "wasm32")]
mod js;
#[cfg(target_arch = "wasm32")]
mod store_bridge;

#[cfg(target_arch = "wasm32")]
pub use drive_bridge::JsRemoteDrive;
#[cfg(target_arch = "wasm32")]
pub use store_bridge::JsLocalStore;

// ============================================================================
// All WASM-specific code is gated behind target_arch = "wasm32"
// This allows `cargo check --workspace` to succeed on native targets.
// ============================================================================

#[cfg(target_arch = "wasm32")]
mod wasm_impl {
    use super::*;
    use note_sync::{
        DiscoveryReport, Note, NoteId, SyncConfig, SyncEngine, SyncOutcome, SyncSummary,
    };
    use serde::Serialize;
    use std::cell::RefCell;
    use tracing_subscriber::layer::SubscriberExt;
    use wasm_bindgen::prelude::*;

    // ========== Callback Logger Layer ==========

    /// Store the logger callback in thread-local storage (WASM is single-threaded)
    thread_local! {
        static LOGGER_CALLBACK: RefCell<Option<js_sys::Function>> = const { RefCell::new(None) };
    }

    /// A tracing layer that invokes a JavaScript callback for each log event.
    struct JsCallbackLayer;

    impl<S> tracing_subscriber::Layer<S> for JsCallbackLayer
    where
        S: tracing::Subscriber,
    {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            LOGGER_CALLBACK.with(|cb| {
                if let Some(callback) = cb.borrow().as_ref() {
                    let metadata = event.metadata();
                    let level = metadata.level().as_str();
                    let target = metadata.target();

                    let mut visitor = MessageVisitor::default();
                    event.record(&mut visitor);

                    let timestamp = note_sync::time::now_millis() as f64;

                    let js_event = js_sys::Object::new();
                    let _ = js_sys::Reflect::set(&js_event, &"level".into(), &level.into());
                    let _ = js_sys::Reflect::set(&js_event, &"target".into(), &target.into());
                    let message = visitor.finish();
                    let _ = js_sys::Reflect::set(&js_event, &"message".into(), &message.into());
                    let _ = js_sys::Reflect::set(&js_event, &"timestamp".into(), &timestamp.into());

                    let _ = callback.call1(&JsValue::NULL, &js_event);
                }
            });
        }
    }

    /// Visitor that renders the message followed by `key=value` fields
    #[derive(Default)]
    struct MessageVisitor {
        message: String,
        fields: Vec<String>,
    }

    impl MessageVisitor {
        fn finish(self) -> String {
            if self.fields.is_empty() {
                self.message
            } else if self.message.is_empty() {
                self.fields.join(" ")
            } else {
                format!("{} {}", self.message, self.fields.join(" "))
            }
        }
    }

    impl tracing::field::Visit for MessageVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.message = format!("{:?}", value);
            } else {
                self.fields.push(format!("{}={:?}", field.name(), value));
            }
        }

        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            if field.name() == "message" {
                self.message = value.to_string();
            } else {
                self.fields.push(format!("{}={}", field.name(), value));
            }
        }
    }

    /// Initialize the WASM module (sets up panic hook and tracing for better debugging).
    ///
    /// Accepts an optional configuration object:
    /// - `init()` - console-only logging (default)
    /// - `init({ logger: (event) => {...} })` - callback + console logging
    ///
    /// The logger callback receives events with: `{ level, target, message, timestamp }`
    #[wasm_bindgen]
    pub fn init(config: Option<js_sys::Object>) {
        console_error_panic_hook::set_once();

        let callback = config
            .as_ref()
            .and_then(|cfg| js_sys::Reflect::get(cfg, &"logger".into()).ok())
            .and_then(|v| v.dyn_into::<js_sys::Function>().ok());

        let console_config = tracing_wasm::WASMLayerConfigBuilder::new()
            .set_max_level(tracing::Level::DEBUG)
            .build();

        if let Some(cb) = callback {
            LOGGER_CALLBACK.with(|cell| {
                *cell.borrow_mut() = Some(cb);
            });

            // Use combined subscriber: callback layer + console layer
            let subscriber = tracing_subscriber::registry()
                .with(JsCallbackLayer)
                .with(tracing_wasm::WASMLayer::new(console_config));

            tracing::subscriber::set_global_default(subscriber).ok();
        } else {
            // Default: console-only logging
            tracing_wasm::set_as_global_default_with_config(console_config);
        }

        tracing::info!("notemapp-wasm initialized");
    }

    /// Get version string
    #[wasm_bindgen]
    pub fn version() -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    /// Generate a new random note ID (8 base-36 characters).
    #[wasm_bindgen(js_name = generateNoteId)]
    pub fn generate_note_id() -> String {
        NoteId::generate().to_string()
    }

    fn js_err(e: impl std::fmt::Display) -> JsError {
        JsError::new(&e.to_string())
    }

    /// Serialize as plain JS objects (no `Map`s) with `null` for `None`.
    fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsError> {
        value
            .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
            .map_err(js_err)
    }

    fn outcome_name(outcome: SyncOutcome) -> &'static str {
        match outcome {
            SyncOutcome::Created => "created",
            SyncOutcome::Pushed => "pushed",
            SyncOutcome::Pulled => "pulled",
            SyncOutcome::DeletedLocally => "deletedLocally",
            SyncOutcome::Failed => "failed",
        }
    }

    /// Per-note outcome for JS
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct NoteOutcomeJs {
        note_id: String,
        outcome: &'static str,
    }

    /// Discovery report for JS
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct DiscoveryReportJs {
        added: Vec<String>,
        skipped: Vec<String>,
        removed: Vec<String>,
        aborted: Option<String>,
    }

    impl From<&DiscoveryReport> for DiscoveryReportJs {
        fn from(report: &DiscoveryReport) -> Self {
            Self {
                added: report.added.iter().map(|id| id.to_string()).collect(),
                skipped: report.skipped.clone(),
                removed: report.removed.iter().map(|id| id.to_string()).collect(),
                aborted: report.aborted.clone(),
            }
        }
    }

    fn summary_js(summary: &SyncSummary) -> Vec<NoteOutcomeJs> {
        summary
            .outcomes
            .iter()
            .map(|(id, outcome)| NoteOutcomeJs {
                note_id: id.to_string(),
                outcome: outcome_name(*outcome),
            })
            .collect()
    }

    /// Combined report of `syncAll` for JS
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct SyncReportJs {
        local: Vec<NoteOutcomeJs>,
        remote: DiscoveryReportJs,
    }

    fn parse_notes(notes: JsValue) -> Result<Vec<Note>, JsError> {
        serde_wasm_bindgen::from_value(notes)
            .map_err(|e| JsError::new(&format!("Invalid notes: {}", e)))
    }

    /// Progress callback adapter: `(noteId, percent) => void`.
    fn progress_fn(callback: &js_sys::Function) -> impl Fn(&str, i32) + '_ {
        move |id, progress| {
            let _ = callback.call2(
                &JsValue::NULL,
                &JsValue::from_str(id),
                &JsValue::from(progress),
            );
        }
    }

    /// New-note callback adapter: `(note) => void`.
    fn add_note_fn(callback: &js_sys::Function) -> impl Fn(&Note) + '_ {
        move |note| match to_js(note) {
            Ok(js_note) => {
                let _ = callback.call1(&JsValue::NULL, &js_note);
            }
            Err(_) => tracing::warn!(note_id = %note.id, "failed to convert note for callback"),
        }
    }

    // ========== WASM Subscription Handle ==========

    /// Subscription handle exposed to JavaScript.
    ///
    /// Call `dispose()` to unsubscribe, or let the JS garbage collector
    /// collect it (the Rust Drop will run via FinalizationRegistry).
    #[wasm_bindgen]
    pub struct WasmSubscription {
        inner: RefCell<Option<note_sync::Subscription>>,
    }

    #[wasm_bindgen]
    impl WasmSubscription {
        /// Unsubscribe from events. Safe to call multiple times.
        pub fn dispose(&self) {
            self.inner.borrow_mut().take(); // Drop the inner Subscription
        }
    }

    /// Sync engine exposed to TypeScript.
    ///
    /// Wraps the core `SyncEngine` and provides async methods that work with JS Promises.
    #[wasm_bindgen]
    pub struct WasmNoteSync {
        inner: SyncEngine<JsLocalStore, JsRemoteDrive>,
    }

    #[wasm_bindgen]
    impl WasmNoteSync {
        /// Create an engine over the given bridges.
        ///
        /// `config` is an optional partial
        /// `{ propsFiles, remoteCleanup, deleteMode, defaultTitle }`.
        #[wasm_bindgen(constructor)]
        pub fn new(
            store: JsLocalStore,
            drive: JsRemoteDrive,
            config: JsValue,
        ) -> Result<WasmNoteSync, JsError> {
            let config: SyncConfig = if config.is_undefined() || config.is_null() {
                SyncConfig::default()
            } else {
                serde_wasm_bindgen::from_value(config)
                    .map_err(|e| JsError::new(&format!("Invalid sync config: {}", e)))?
            };
            Ok(WasmNoteSync {
                inner: SyncEngine::with_config(store, drive, config),
            })
        }

        /// Reconcile one note. Resolves to the outcome name
        /// (`created`, `pushed`, `pulled`, `deletedLocally` or `failed`).
        #[wasm_bindgen(js_name = syncLocalNote)]
        pub async fn sync_local_note(
            &self,
            note: JsValue,
            on_progress: js_sys::Function,
        ) -> Result<String, JsError> {
            let note: Note = serde_wasm_bindgen::from_value(note)
                .map_err(|e| JsError::new(&format!("Invalid note: {}", e)))?;
            let outcome = self.inner.sync_local_note(&note, &progress_fn(&on_progress)).await;
            Ok(outcome_name(outcome).to_string())
        }

        /// Reconcile notes sequentially. Resolves to `[{ noteId, outcome }]`.
        #[wasm_bindgen(js_name = syncLocalNotes)]
        pub async fn sync_local_notes(
            &self,
            notes: JsValue,
            on_progress: js_sys::Function,
        ) -> Result<JsValue, JsError> {
            let notes = parse_notes(notes)?;
            let summary = self.inner.sync_local_notes(&notes, &progress_fn(&on_progress)).await;
            to_js(&summary_js(&summary))
        }

        /// Adopt notes that exist only on the drive.
        ///
        /// Resolves to `{ added, skipped, removed, aborted }`.
        #[wasm_bindgen(js_name = syncRemoteNotes)]
        pub async fn sync_remote_notes(
            &self,
            on_add_note: js_sys::Function,
        ) -> Result<JsValue, JsError> {
            let report = self.inner.sync_remote_notes(&add_note_fn(&on_add_note)).await;
            to_js(&DiscoveryReportJs::from(&report))
        }

        /// Sync the given notes (or every stored note when `notes` is null), then discover.
        #[wasm_bindgen(js_name = syncAll)]
        pub async fn sync_all(
            &self,
            notes: JsValue,
            on_progress: js_sys::Function,
            on_add_note: js_sys::Function,
        ) -> Result<JsValue, JsError> {
            let notes = if notes.is_undefined() || notes.is_null() {
                self.inner.local_notes().await.map_err(js_err)?
            } else {
                parse_notes(notes)?
            };
            let report = self
                .inner
                .sync_all(&notes, &progress_fn(&on_progress), &add_note_fn(&on_add_note))
                .await;
            to_js(&SyncReportJs {
                local: summary_js(&report.local),
                remote: DiscoveryReportJs::from(&report.remote),
            })
        }

        /// Delete a note locally and on the drive (tombstone or hard delete per config).
        #[wasm_bindgen(js_name = deleteNote)]
        pub async fn delete_note(&self, id: String) -> Result<(), JsError> {
            let id: NoteId = id
                .parse()
                .map_err(|e| JsError::new(&format!("Invalid note ID: {}", e)))?;
            self.inner.delete_note(&id).await.map_err(js_err)
        }

        /// Subscribe to sync events: `noteProgress`, `noteAdded`, `noteDeleted`
        /// and `remoteFileSkipped`.
        ///
        /// Returns a `WasmSubscription` handle. Call `dispose()` on it to unsubscribe,
        /// or let it be garbage collected.
        #[wasm_bindgen(js_name = subscribeSyncEvents)]
        pub fn subscribe_sync_events(&self, callback: js_sys::Function) -> WasmSubscription {
            let rust_closure = move |event: note_sync::SyncEvent| {
                if let Ok(js_event) = serde_wasm_bindgen::to_value(&event) {
                    let _ = callback.call1(&wasm_bindgen::JsValue::NULL, &js_event);
                }
            };

            WasmSubscription {
                inner: RefCell::new(Some(self.inner.subscribe(rust_closure))),
            }
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm_impl::*;
