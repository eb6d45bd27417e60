use note_sync::{DeleteMode, SyncConfig};
use std::path::PathBuf;

/// Environment variable naming the data directory.
pub const DATA_DIR_ENV: &str = "NOTEMAPP_DATA_DIR";
/// Environment variable holding the drive bearer token.
pub const TOKEN_ENV: &str = "NOTEMAPP_DRIVE_TOKEN";

const DEFAULT_DATA_DIR: &str = "~/.notemapp";

/// CLI configuration resolved from arguments and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the three note stores
    pub data_dir: PathBuf,
    /// OAuth bearer token for the drive (required for remote operations)
    pub token: Option<String>,
    pub sync: SyncConfig,
}

impl Config {
    /// Build a configuration from already-parsed values.
    ///
    /// `data_dir` falls back to `~/.notemapp`; `~` is expanded to the home directory.
    pub fn new(data_dir: Option<&str>, token: Option<String>, sync: SyncConfig) -> Self {
        let data_dir = expand_tilde(data_dir.unwrap_or(DEFAULT_DATA_DIR));
        let token = token.filter(|t| !t.trim().is_empty());
        Self {
            data_dir,
            token,
            sync,
        }
    }

    /// The drive token, or an error naming where to set it.
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.token.as_deref().ok_or(ConfigError::MissingToken)
    }
}

/// Sync switches from the command-line flags.
pub fn sync_config(remote_cleanup: bool, hard_delete: bool, no_props: bool) -> SyncConfig {
    SyncConfig {
        props_files: !no_props,
        remote_cleanup,
        delete_mode: if hard_delete {
            DeleteMode::Hard
        } else {
            DeleteMode::Soft
        },
        ..SyncConfig::default()
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No drive token: pass --token or set NOTEMAPP_DRIVE_TOKEN")]
    MissingToken,
}
