//! NoteId: Stable identifier for a note across the local stores and the drive.
//!
//! Generated ids are 8 lowercase base-36 characters. Parsing is more
//! lenient so ids minted by older clients keep working, but anything that
//! could break the `{id}.json` remote naming contract or a file-backed
//! store path is rejected.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Length of freshly generated ids.
pub const GENERATED_LEN: usize = 8;

/// Upper bound on accepted ids.
const MAX_LEN: usize = 64;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Error, PartialEq)]
pub enum NoteIdError {
    #[error("Note ID is empty")]
    Empty,
    #[error("Note ID is longer than 64 characters")]
    TooLong,
    #[error("Note ID contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Identifier of a note; the primary key of all three local stores.
///
/// # Examples
/// ```
/// use note_sync::NoteId;
///
/// let id = NoteId::generate();
/// assert_eq!(id.as_str().len(), 8);
///
/// let parsed: NoteId = "k3j9x0ab".parse().unwrap();
/// assert_eq!(parsed.content_file_name(), "k3j9x0ab.json");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteId(String);

impl NoteId {
    /// Generate a new random id.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::rng();
        let id: String = (0..GENERATED_LEN)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Remote name of the file holding this note's features.
    pub fn content_file_name(&self) -> String {
        format!("{}{}", self.0, crate::CONTENT_SUFFIX)
    }

    /// Remote name of the file holding this note's metadata and view prefs.
    pub fn props_file_name(&self) -> String {
        format!("{}{}", self.0, crate::PROPS_SUFFIX)
    }

    /// Derive a note id from a remote content file name (`{id}.json`).
    pub fn from_content_file_name(name: &str) -> Option<Self> {
        name.strip_suffix(crate::CONTENT_SUFFIX)?.parse().ok()
    }
}

impl Display for NoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NoteId {
    type Err = NoteIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(NoteIdError::Empty);
        }
        if s.len() > MAX_LEN {
            return Err(NoteIdError::TooLong);
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(NoteIdError::InvalidChar(c));
        }
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for NoteId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Serialize as a plain string so stored records match what the browser writes
impl serde::Serialize for NoteId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NoteId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
