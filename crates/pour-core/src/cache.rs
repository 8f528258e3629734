//! On-disk cache keyed by logical identity.
//!
//! Layout (relative to the cache root):
//! - `api/formula.json` - the raw formula index
//! - `<name>_bottle_manifest--<annotated-version>` - raw manifest bytes
//! - `<name>--<annotated-version>` - raw bottle archive
//! - `<name>--<annotated-version>.out/` - unpacked bottle tree
//!
//! Presence of an entry is the only state: an existing file is trusted as
//! valid. Entries are written to a temp file in the cache root and renamed
//! into place, so a reader never sees a partially written entry.

use std::path::{Path, PathBuf};

use pour_schema::{AnnotatedVersion, Formula};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Logical cache entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKey {
    /// The bulk formula index.
    Index,
    /// A formula's manifest.
    Manifest {
        /// Formula name.
        name: String,
        /// Annotated version.
        version: AnnotatedVersion,
    },
    /// A formula's bottle archive.
    Bottle {
        /// Formula name.
        name: String,
        /// Annotated version.
        version: AnnotatedVersion,
    },
    /// A formula's unpacked bottle tree.
    Unpacked {
        /// Formula name.
        name: String,
        /// Annotated version.
        version: AnnotatedVersion,
    },
}

impl CacheKey {
    /// Manifest entry for a formula.
    pub fn manifest(formula: &Formula) -> Self {
        Self::Manifest {
            name: formula.name.clone(),
            version: formula.annotated_version(),
        }
    }

    /// Bottle entry for a formula.
    pub fn bottle(formula: &Formula) -> Self {
        Self::Bottle {
            name: formula.name.clone(),
            version: formula.annotated_version(),
        }
    }

    /// Unpacked tree entry for a formula.
    pub fn unpacked(formula: &Formula) -> Self {
        Self::Unpacked {
            name: formula.name.clone(),
            version: formula.annotated_version(),
        }
    }

    /// Path of the entry relative to the cache root.
    pub fn relative_path(&self) -> PathBuf {
        match self {
            Self::Index => Path::new("api").join("formula.json"),
            Self::Manifest { name, version } => {
                PathBuf::from(format!("{name}_bottle_manifest--{version}"))
            }
            Self::Bottle { name, version } => PathBuf::from(format!("{name}--{version}")),
            Self::Unpacked { name, version } => PathBuf::from(format!("{name}--{version}.out")),
        }
    }
}

/// The cache directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// A cache rooted at `root`. Nothing is created until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of an entry.
    pub fn path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// Whether the entry exists (and is therefore considered valid).
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.path(key).exists()
    }

    /// Read an entry, `None` when it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the entry exists but cannot be read.
    pub async fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    /// Write an entry atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the temp file cannot be created, filled or
    /// renamed into place.
    pub async fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<PathBuf> {
        let staged = self.stage(key).await?;
        let file = staged.path().to_path_buf();
        tokio::fs::write(&file, bytes)
            .await
            .map_err(|e| Error::io(file, e))?;
        self.commit(staged, key).await
    }

    /// Create a temp file in the same directory the entry will live in.
    ///
    /// Fill it and hand it to [`commit`](Self::commit); dropping it instead
    /// removes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the entry's directory cannot be created.
    pub async fn stage(&self, key: &CacheKey) -> Result<NamedTempFile> {
        let dest = self.path(key);
        let dir = dest
            .parent()
            .map_or_else(|| self.root.clone(), Path::to_path_buf);
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
            NamedTempFile::new_in(&dir).map_err(|e| Error::io(&dir, e))
        })
        .await?
    }

    /// Rename a staged temp file onto its entry path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the rename fails.
    pub async fn commit(&self, staged: NamedTempFile, key: &CacheKey) -> Result<PathBuf> {
        let dest = self.path(key);
        tokio::task::spawn_blocking(move || {
            staged
                .persist(&dest)
                .map_err(|e| Error::io(&dest, e.error))?;
            Ok::<_, Error>(dest)
        })
        .await?
    }
}
