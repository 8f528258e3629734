//! Formula records as served by the bulk formula index.
//!
//! Only the fields the client acts on are modelled; everything else in an
//! index record is skipped during decoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ALL_PLATFORMS_TAG, AnnotatedVersion};

/// A named package record from the formula index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    /// Short name (e.g. `openssl@3`).
    pub name: String,
    /// Fully qualified name including the tap when it is not the core tap.
    #[serde(default)]
    pub full_name: String,
    /// One-line description.
    #[serde(default)]
    pub desc: Option<String>,
    /// Upstream version information.
    #[serde(default)]
    pub versions: Versions,
    /// Formula revision, bumped when the formula changes without a new upstream version.
    #[serde(default)]
    pub revision: u32,
    /// Prebuilt bottle locations.
    #[serde(default)]
    pub bottle: Bottles,
    /// Declared runtime dependencies (names only).
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Upstream version fields of a formula.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versions {
    /// Stable upstream version, absent for head-only formulae.
    #[serde(default)]
    pub stable: Option<String>,
    /// Whether a bottle is published for the stable version.
    #[serde(default)]
    pub bottle: bool,
}

/// Bottle section of a formula.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bottles {
    /// Bottles for the stable version.
    #[serde(default)]
    pub stable: Option<BottleSpec>,
}

/// Per-platform bottles for one version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BottleSpec {
    /// Bottle rebuild counter.
    #[serde(default)]
    pub rebuild: u32,
    /// Registry root that manifest URLs are derived from.
    #[serde(default)]
    pub root_url: String,
    /// Bottle files keyed by platform tag (e.g. `x86_64_linux`).
    #[serde(default)]
    pub files: BTreeMap<String, BottleFile>,
}

/// One platform's bottle archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BottleFile {
    /// Where the bottle may be poured (`:any`, `:any_skip_relocation` or a cellar path).
    #[serde(rename = "cellar")]
    pub cellar_policy: String,
    /// Blob URL of the archive.
    pub url: String,
    /// Hex-encoded SHA-256 of the archive.
    #[serde(rename = "sha256")]
    pub checksum: String,
}

impl Formula {
    /// Rebuild counter of the stable bottle (0 when there is none).
    pub fn rebuild(&self) -> u32 {
        self.bottle.stable.as_ref().map_or(0, |b| b.rebuild)
    }

    /// The cache and cellar key for this formula.
    pub fn annotated_version(&self) -> AnnotatedVersion {
        AnnotatedVersion::new(
            self.versions.stable.as_deref().unwrap_or_default(),
            self.revision,
            self.rebuild(),
        )
    }

    /// The keg directory a bottle stores its payload under, `stable[_revision]`.
    ///
    /// Unlike [`annotated_version`](Self::annotated_version) this never
    /// carries the rebuild counter: a rebuilt bottle still unpacks to
    /// `<name>/<stable>[_<revision>]/`.
    pub fn pkg_version(&self) -> String {
        let stable = self.versions.stable.as_deref().unwrap_or_default();
        if self.revision == 0 {
            stable.to_string()
        } else {
            format!("{stable}_{}", self.revision)
        }
    }

    /// Registry URL of this formula's manifest:
    /// `root_url/name(with the first "@" replaced by "/")/manifests/annotated-version`.
    pub fn manifest_url(&self) -> String {
        let root_url = self
            .bottle
            .stable
            .as_ref()
            .map_or("", |b| b.root_url.as_str());
        format!(
            "{}/{}/manifests/{}",
            root_url.trim_end_matches('/'),
            self.name.replacen('@', "/", 1),
            self.annotated_version()
        )
    }

    /// The bottle file for a platform tag, falling back to the `all` tag.
    pub fn bottle_for(&self, tag: &str) -> Option<&BottleFile> {
        let files = &self.bottle.stable.as_ref()?.files;
        files.get(tag).or_else(|| files.get(ALL_PLATFORMS_TAG))
    }
}
