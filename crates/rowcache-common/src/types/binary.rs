//! References to binary content.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A column value pointing at binary content.
///
/// The content itself lives outside the cache. Which of the two modes a
/// value is in is fixed when it is built: a freshly uploaded file that has
/// not reached the binary store yet, or content already stored under its
/// digest. Both modes serialize as themselves, so a file-backed value
/// shipped to another process stays file-backed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Binary {
    /// Content in a local file.
    File {
        /// Location of the file.
        path: PathBuf,
        /// Size in bytes.
        length: u64,
    },
    /// Content in the binary store.
    Stored {
        /// Content digest, the key in the binary store.
        digest: String,
        /// Size in bytes.
        length: u64,
    },
}

impl Binary {
    /// Creates a file-backed reference.
    pub fn file(path: impl Into<PathBuf>, length: u64) -> Self {
        Self::File {
            path: path.into(),
            length,
        }
    }

    /// Creates a digest-addressed reference.
    pub fn stored(digest: impl Into<String>, length: u64) -> Self {
        Self::Stored {
            digest: digest.into(),
            length,
        }
    }

    /// Returns the content size.
    pub fn length(&self) -> u64 {
        match self {
            Self::File { length, .. } | Self::Stored { length, .. } => *length,
        }
    }

    /// Returns the digest of stored content.
    pub fn digest(&self) -> Option<&str> {
        match self {
            Self::Stored { digest, .. } => Some(digest),
            Self::File { .. } => None,
        }
    }

    /// Returns the local file of not yet stored content.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File { path, .. } => Some(path),
            Self::Stored { .. } => None,
        }
    }

    /// Returns true once the content is in the binary store.
    #[inline]
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

impl fmt::Display for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { path, length } => write!(f, "file:{} ({} bytes)", path.display(), length),
            Self::Stored { digest, length } => write!(f, "{} ({} bytes)", digest, length),
        }
    }
}
