//! Event infrastructure for note sync monitoring.
//!
//! Provides `SyncEvent` for progress/debug reporting and `EventBus` for subscriptions.
//! Platform-specific implementations handle thread safety:
//! - Native: `Arc<EventBus>` with `RwLock` for multi-threaded Tokio runtime
//! - WASM: `Rc<EventBus>` with `RefCell` for single-threaded browser environment

use serde::Serialize;

/// Events emitted by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// Progress of a single note's reconciliation (mirrors the progress callback).
    NoteProgress {
        #[serde(rename = "noteId")]
        note_id: String,
        /// 0 when started, 100 when done, -1 on failure.
        progress: i32,
        /// Milliseconds since Unix epoch.
        timestamp: f64,
    },
    /// Note discovered on the drive and created locally.
    NoteAdded {
        #[serde(rename = "noteId")]
        note_id: String,
        title: String,
        timestamp: f64,
    },
    /// Note removed from the local stores.
    NoteDeleted {
        #[serde(rename = "noteId")]
        note_id: String,
        /// "tombstone", "cleanup" or "user".
        reason: String,
        timestamp: f64,
    },
    /// Remote file ignored during discovery.
    RemoteFileSkipped {
        name: String,
        reason: String,
        timestamp: f64,
    },
}

impl SyncEvent {
    pub fn progress(note_id: &str, progress: i32) -> Self {
        SyncEvent::NoteProgress {
            note_id: note_id.to_string(),
            progress,
            timestamp: crate::time::now_millis() as f64,
        }
    }

    pub fn added(note_id: &str, title: &str) -> Self {
        SyncEvent::NoteAdded {
            note_id: note_id.to_string(),
            title: title.to_string(),
            timestamp: crate::time::now_millis() as f64,
        }
    }

    pub fn deleted(note_id: &str, reason: &str) -> Self {
        SyncEvent::NoteDeleted {
            note_id: note_id.to_string(),
            reason: reason.to_string(),
            timestamp: crate::time::now_millis() as f64,
        }
    }

    pub fn skipped(name: &str, reason: &str) -> Self {
        SyncEvent::RemoteFileSkipped {
            name: name.to_string(),
            reason: reason.to_string(),
            timestamp: crate::time::now_millis() as f64,
        }
    }
}

// ============================================================================
// Native (multi-threaded) implementation
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod platform {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, RwLock, Weak};

    /// Subscription handle that unsubscribes automatically when dropped.
    ///
    /// Follows the disposer pattern: hold this value to keep receiving events,
    /// drop it (or let it go out of scope) to unsubscribe.
    pub struct Subscription {
        bus: Weak<EventBus>,
        id: usize,
    }

    impl Drop for Subscription {
        fn drop(&mut self) {
            if let Some(bus) = self.bus.upgrade() {
                bus.unsubscribe(self.id);
            }
        }
    }

    /// Event bus for publishing note sync events to subscribers.
    ///
    /// Thread-safe for use in multi-threaded Tokio runtime.
    /// Wrap in `Arc` to enable subscriptions.
    pub struct EventBus {
        callbacks: RwLock<Vec<(usize, Arc<dyn Fn(SyncEvent) + Send + Sync>)>>,
        next_id: AtomicUsize,
    }

    impl Default for EventBus {
        fn default() -> Self {
            Self {
                callbacks: RwLock::new(Vec::new()),
                next_id: AtomicUsize::new(0),
            }
        }
    }

    impl EventBus {
        pub fn new() -> Self {
            Self::default()
        }

        /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
        ///
        /// Requires `self` to be wrapped in `Arc`.
        pub fn subscribe(
            self: &Arc<Self>,
            callback: impl Fn(SyncEvent) + Send + Sync + 'static,
        ) -> Subscription {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.callbacks
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .push((id, Arc::new(callback)));
            Subscription {
                bus: Arc::downgrade(self),
                id,
            }
        }

        fn unsubscribe(&self, id: usize) {
            // Use try_write to avoid deadlock if Drop runs during panic unwinding
            // while a read lock is held (e.g., during emit).
            if let Ok(mut guard) = self.callbacks.try_write() {
                guard.retain(|(i, _)| *i != id);
            }
        }

        /// Emit an event to all subscribers.
        pub fn emit(&self, event: SyncEvent) {
            // Clone the callback list to prevent deadlock if a callback calls subscribe.
            let callbacks: Vec<_> = self
                .callbacks
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect();

            for callback in callbacks {
                callback(event.clone());
            }
        }
    }
}

// ============================================================================
// WASM (single-threaded) implementation
// ============================================================================

#[cfg(target_arch = "wasm32")]
mod platform {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::{Rc, Weak};

    /// Subscription handle that unsubscribes automatically when dropped.
    ///
    /// Follows the disposer pattern: hold this value to keep receiving events,
    /// drop it (or let it go out of scope) to unsubscribe.
    pub struct Subscription {
        bus: Weak<EventBus>,
        id: usize,
    }

    impl Drop for Subscription {
        fn drop(&mut self) {
            if let Some(bus) = self.bus.upgrade() {
                bus.unsubscribe(self.id);
            }
        }
    }

    /// Event bus for publishing note sync events to subscribers.
    ///
    /// Single-threaded for WASM browser environment.
    /// Wrap in `Rc` to enable subscriptions.
    pub struct EventBus {
        callbacks: RefCell<Vec<(usize, Rc<dyn Fn(SyncEvent)>)>>,
        next_id: Cell<usize>,
    }

    impl Default for EventBus {
        fn default() -> Self {
            Self {
                callbacks: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
            }
        }
    }

    impl EventBus {
        pub fn new() -> Self {
            Self::default()
        }

        /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
        ///
        /// Requires `self` to be wrapped in `Rc`.
        pub fn subscribe(self: &Rc<Self>, callback: impl Fn(SyncEvent) + 'static) -> Subscription {
            let id = self.next_id.get();
            self.next_id.set(id + 1);
            self.callbacks.borrow_mut().push((id, Rc::new(callback)));
            Subscription {
                bus: Rc::downgrade(self),
                id,
            }
        }

        fn unsubscribe(&self, id: usize) {
            self.callbacks.borrow_mut().retain(|(i, _)| *i != id);
        }

        /// Emit an event to all subscribers.
        pub fn emit(&self, event: SyncEvent) {
            // Clone the callback list to prevent panic if a callback calls subscribe.
            let callbacks: Vec<_> = self
                .callbacks
                .borrow()
                .iter()
                .map(|(_, cb)| Rc::clone(cb))
                .collect();

            for callback in callbacks {
                callback(event.clone());
            }
        }
    }
}

pub use platform::*;

/// Shared handle to an event bus.
#[cfg(not(target_arch = "wasm32"))]
pub type SharedEventBus = std::sync::Arc<EventBus>;

/// Shared handle to an event bus.
#[cfg(target_arch = "wasm32")]
pub type SharedEventBus = std::rc::Rc<EventBus>;
