//! Error taxonomy for index lookup, registry transport and materialization.

use std::path::PathBuf;

use pour_schema::ManifestError;
use thiserror::Error;

/// Result alias used throughout `pour-core`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The pipeline stage an install unit failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Locating formula records in the index.
    Index,
    /// Fetching or decoding a manifest.
    Manifest,
    /// Downloading a bottle archive.
    Download,
    /// Extracting a bottle archive.
    Unpack,
    /// Symlink-cloning an unpacked bottle into the cellar.
    Link,
}

impl Stage {
    /// Lowercase stage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Manifest => "manifest",
            Self::Download => "download",
            Self::Unpack => "unpack",
            Self::Link => "link",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by `pour-core`.
#[derive(Error, Debug)]
pub enum Error {
    /// Requested names that a full index scan did not find.
    #[error("missing formulas: {}", .missing.join(", "))]
    NotFound {
        /// Every unresolved name, sorted.
        missing: Vec<String>,
    },

    /// Non-2xx response or transport-level failure.
    #[error("request to {url} failed{}: {body}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    Transport {
        /// Requested URL.
        url: String,
        /// HTTP status, `None` when no response was received.
        status: Option<u16>,
        /// Captured (bounded) response body, or the transport error message.
        body: String,
    },

    /// Malformed JSON in an index record or a manifest.
    #[error("failed to decode {what}: {source}")]
    Decode {
        /// What was being decoded.
        what: String,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// A manifest entry without a tab.
    #[error(transparent)]
    Manifest(ManifestError),

    /// No manifest entry matches the running platform.
    #[error("no bottle build for {os}/{arch}")]
    PlatformUnsupported {
        /// Operating system looked up.
        os: String,
        /// Architecture looked up.
        arch: String,
    },

    /// The formula has no bottle for the platform tag.
    #[error("{formula} has no bottle for {tag}")]
    MissingBottle {
        /// Formula name.
        formula: String,
        /// Bottle tag looked up.
        tag: String,
    },

    /// Downloaded bytes did not hash to the index checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum recorded in the index.
        expected: String,
        /// Checksum of the downloaded bytes.
        actual: String,
    },

    /// Archive extraction failed.
    #[error("corrupt archive {}: {reason}", .path.display())]
    ArchiveCorrupt {
        /// Archive on disk.
        path: PathBuf,
        /// Extraction failure message.
        reason: String,
    },

    /// The dependency graph contains a cycle.
    #[error("circular dependency involving {name}")]
    Cycle {
        /// A formula on the cycle.
        name: String,
    },

    /// A sibling unit failed and this unit was cancelled before finishing.
    #[error("cancelled")]
    Cancelled,

    /// Filesystem failure at a known path.
    #[error("{}: {source}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// A failure attributed to one stage of one formula's pipeline.
    #[error("{stage} failed for {formula}: {source}")]
    Stage {
        /// Failing stage.
        stage: Stage,
        /// Formula being processed.
        formula: String,
        /// What went wrong.
        #[source]
        source: Box<Error>,
    },

    /// A blocking task panicked or was aborted.
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Wrap a filesystem error with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attribute this error to a stage of a formula's pipeline.
    ///
    /// Errors that already carry a stage, and cancellations, are returned unchanged.
    pub fn at(self, stage: Stage, formula: &str) -> Self {
        match self {
            Self::Stage { .. } | Self::Cancelled => self,
            other => Self::Stage {
                stage,
                formula: formula.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The stage and formula this error is attributed to, if any.
    pub fn stage(&self) -> Option<(Stage, &str)> {
        match self {
            Self::Stage { stage, formula, .. } => Some((*stage, formula.as_str())),
            _ => None,
        }
    }

    /// The error underneath any stage attribution.
    pub fn root(&self) -> &Self {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<ManifestError> for Error {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::PlatformUnsupported { os, arch } => {
                Self::PlatformUnsupported { os, arch }
            }
            ManifestError::Decode(source) => Self::Decode {
                what: "manifest".to_string(),
                source,
            },
            ManifestError::Tab { index, source } => Self::Decode {
                what: format!("manifest tab {index}"),
                source,
            },
            other => Self::Manifest(other),
        }
    }
}

/// Extension for attaching stage attribution to results.
pub trait StageExt<T> {
    /// Attribute an error to `stage` of `formula`'s pipeline.
    fn at(self, stage: Stage, formula: &str) -> Result<T>;
}

impl<T> StageExt<T> for Result<T> {
    fn at(self, stage: Stage, formula: &str) -> Result<T> {
        self.map_err(|e| e.at(stage, formula))
    }
}
