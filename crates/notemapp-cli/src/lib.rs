//! notemapp-cli library: native backends for the note-sync engine.
//!
//! This is a thin library layer under the `notemapp` binary,
//! allowing integration tests to access the native store and drive client.

pub mod config;
pub mod file_store;
pub mod google_drive;

// Re-export key types for convenience
pub use config::{Config, ConfigError};
pub use file_store::FileStore;
pub use google_drive::GoogleDrive;
