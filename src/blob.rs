//! Blob identity and transferable item references.
//!
//! A [`BlobKey`] names one payload in both tiers: a `tag` (logical namespace,
//! e.g. a dataset label) and a `name` within it. An [`ItemRef`] is a concrete,
//! transferable item produced by the [`resolver`](crate::resolver) and handed
//! to the archive during ingest.
//!
//! # Example
//!
//! ```
//! use tier_engine::BlobKey;
//!
//! let key = BlobKey::new("docs", "readme.md").unwrap();
//! assert_eq!(key.tag(), "docs");
//! assert_eq!(key.to_string(), "docs/readme.md");
//!
//! assert!(BlobKey::new("", "readme.md").is_err());
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("blob tag must not be empty")]
    EmptyTag,
    #[error("blob name must not be empty")]
    EmptyName,
}

/// Identity of one logical payload: `(tag, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobKey {
    tag: String,
    name: String,
}

impl BlobKey {
    /// Build a key, rejecting empty components.
    pub fn new(tag: impl Into<String>, name: impl Into<String>) -> Result<Self, KeyError> {
        let tag = tag.into();
        let name = name.into();
        if tag.is_empty() {
            return Err(KeyError::EmptyTag);
        }
        if name.is_empty() {
            return Err(KeyError::EmptyName);
        }
        Ok(Self { tag, name })
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tag, self.name)
    }
}

/// Schemes the archive can transfer natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemScheme {
    File,
    Hdf5,
}

impl ItemScheme {
    /// The `scheme::` prefix used in source references.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::File => "file::",
            Self::Hdf5 => "hdf5::",
        }
    }
}

/// A concrete item the archive can pull in during a bundle write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub scheme: ItemScheme,
    pub path: PathBuf,
    /// Name the item is stored under inside its tag.
    pub name: String,
}

impl ItemRef {
    /// Passthrough item named after the file it points at.
    pub fn new(scheme: ItemScheme, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = file_name_of(&path);
        Self { scheme, path, name }
    }

    /// Item with an explicit blob name (directory expansion, spilled cache blobs).
    pub fn named(scheme: ItemScheme, path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            scheme,
            path: path.into(),
            name: name.into(),
        }
    }

    /// Source reference string understood by the archive (`file::/a/b.csv`).
    #[must_use]
    pub fn uri(&self) -> String {
        format!("{}{}", self.scheme.prefix(), self.path.display())
    }

    /// Key this item lands under once bundled into `tag`.
    pub fn key_in(&self, tag: &str) -> Result<BlobKey, KeyError> {
        BlobKey::new(tag, self.name.clone())
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
