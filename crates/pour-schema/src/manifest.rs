//! OCI image index documents served by the bottle registry.
//!
//! Each manifest entry carries an annotation map whose `sh.brew.tab` value is
//! itself a JSON document encoded as a string. Decoding is done in two explicit
//! stages: the annotation map is decoded as plain strings, then the tab string
//! is decoded as a [`Tab`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Platform, TAB_ANNOTATION};

/// Errors produced while decoding a manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The manifest document itself is malformed.
    #[error("malformed manifest: {0}")]
    Decode(#[source] serde_json::Error),

    /// The string-encoded tab of an entry is malformed.
    #[error("malformed tab in manifest entry {index}: {source}")]
    Tab {
        /// Position of the entry in the manifest list.
        index: usize,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// No entry matches the requested platform.
    #[error("no manifest entry for {os}/{arch}")]
    PlatformUnsupported {
        /// Requested operating system.
        os: String,
        /// Requested architecture.
        arch: String,
    },

    /// The matching entry carries no tab annotation.
    #[error("manifest entry for {os}/{arch} has no tab")]
    MissingTab {
        /// Entry operating system.
        os: String,
        /// Entry architecture.
        arch: String,
    },
}

/// Platform descriptor of a manifest entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPlatform {
    /// OCI architecture (`amd64`, `arm64`).
    #[serde(default)]
    pub architecture: String,
    /// OCI operating system (`linux`, `darwin`).
    #[serde(default)]
    pub os: String,
    /// Operating system version the bottle was built on.
    #[serde(rename = "os.version", default)]
    pub os_version: Option<String>,
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(rename = "schemaVersion", default)]
    schema_version: u32,
    #[serde(default)]
    manifests: Vec<RawEntry>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(rename = "mediaType", default)]
    media_type: String,
    #[serde(default)]
    digest: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    platform: ManifestPlatform,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

/// A decoded multi-platform manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// OCI schema version.
    pub schema_version: u32,
    /// Per-platform entries, in document order.
    pub entries: Vec<ManifestEntry>,
    /// Index-level annotations.
    pub annotations: BTreeMap<String, String>,
}

/// One platform's descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Descriptor media type.
    pub media_type: String,
    /// Content digest of the platform image manifest.
    pub digest: String,
    /// Size in bytes of the platform image manifest.
    pub size: u64,
    /// Platform the entry was built for.
    pub platform: ManifestPlatform,
    /// Raw annotation strings.
    pub annotations: BTreeMap<String, String>,
    /// The decoded tab, when the entry carries one.
    pub tab: Option<Tab>,
}

/// Build metadata recorded when a bottle was produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    /// Version of the tool that built the bottle.
    #[serde(default)]
    pub homebrew_version: Option<String>,
    /// Compiler used for the build.
    #[serde(default)]
    pub compiler: Option<String>,
    /// Build time as a unix timestamp (source modification time).
    #[serde(default)]
    pub source_modified_time: Option<i64>,
    /// Architecture the bottle was built for.
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    runtime_dependencies: Option<Vec<Dependency>>,
}

/// A runtime dependency recorded in a [`Tab`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Name the dependency resolves to in the formula index.
    pub full_name: String,
    /// Version linked against at build time.
    #[serde(default)]
    pub version: Option<String>,
    /// Whether the formula declares the dependency itself (vs. inherited).
    #[serde(default)]
    pub declared_directly: bool,
}

impl Tab {
    /// Runtime dependencies (empty when the tab records none).
    pub fn runtime_dependencies(&self) -> &[Dependency] {
        self.runtime_dependencies.as_deref().unwrap_or_default()
    }

    /// Create a tab carrying only a dependency list.
    pub fn with_dependencies(deps: Vec<Dependency>) -> Self {
        Self {
            runtime_dependencies: Some(deps),
            ..Self::default()
        }
    }
}

impl Manifest {
    /// Decode a manifest, including the nested tab of every entry.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Decode`] for a malformed document and
    /// [`ManifestError::Tab`] when an entry's tab string is not a valid tab.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_slice(bytes).map_err(ManifestError::Decode)?;

        let entries = raw
            .manifests
            .into_iter()
            .enumerate()
            .map(|(index, e)| {
                let tab = e
                    .annotations
                    .get(TAB_ANNOTATION)
                    .map(|s| serde_json::from_str::<Tab>(s))
                    .transpose()
                    .map_err(|source| ManifestError::Tab { index, source })?;
                Ok(ManifestEntry {
                    media_type: e.media_type,
                    digest: e.digest,
                    size: e.size,
                    platform: e.platform,
                    annotations: e.annotations,
                    tab,
                })
            })
            .collect::<Result<Vec<_>, ManifestError>>()?;

        Ok(Self {
            schema_version: raw.schema_version,
            entries,
            annotations: raw.annotations,
        })
    }

    /// The tab of the first entry whose `{os, arch}` matches `platform`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::PlatformUnsupported`] when no entry matches and
    /// [`ManifestError::MissingTab`] when the matching entry carries no tab.
    pub fn tab_for(&self, platform: &Platform) -> Result<&Tab, ManifestError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.platform.os == platform.os && e.platform.architecture == platform.arch)
            .ok_or_else(|| ManifestError::PlatformUnsupported {
                os: platform.os.clone(),
                arch: platform.arch.clone(),
            })?;

        entry.tab.as_ref().ok_or_else(|| ManifestError::MissingTab {
            os: entry.platform.os.clone(),
            arch: entry.platform.architecture.clone(),
        })
    }
}
