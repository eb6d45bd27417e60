//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::note::DEFAULT_TITLE;

/// How a user deletion is propagated to the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// Overwrite `{id}.json` with the `[deleted]` sentinel so other devices
    /// delete their copy on their next sync.
    #[default]
    Soft,
    /// Remove the remote files outright.
    Hard,
}

impl FromStr for DeleteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "soft" => Ok(DeleteMode::Soft),
            "hard" => Ok(DeleteMode::Hard),
            other => Err(format!("unknown delete mode {}", other)),
        }
    }
}

/// Behavior switches of the [`SyncEngine`](crate::SyncEngine).
///
/// Deserializes from a partial object; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Mirror metadata and view prefs in `{id}.props` files.
    pub props_files: bool,
    /// Delete local notes whose content file disappeared from the drive.
    pub remote_cleanup: bool,
    pub delete_mode: DeleteMode,
    /// Title for discovered notes that carry none.
    pub default_title: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            props_files: true,
            remote_cleanup: false,
            delete_mode: DeleteMode::Soft,
            default_title: DEFAULT_TITLE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"remoteCleanup":true,"deleteMode":"hard"}"#).unwrap();
        assert!(config.props_files);
        assert!(config.remote_cleanup);
        assert_eq!(config.delete_mode, DeleteMode::Hard);
        assert_eq!(config.default_title, DEFAULT_TITLE);
    }

    #[test]
    fn test_delete_mode_from_str() {
        assert_eq!("SOFT".parse::<DeleteMode>(), Ok(DeleteMode::Soft));
        assert_eq!("hard".parse::<DeleteMode>(), Ok(DeleteMode::Hard));
        assert!("purge".parse::<DeleteMode>().is_err());
    }
}
