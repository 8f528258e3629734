//! Shared types and wire format for pour.
//!
//! Nothing in this crate performs I/O. It describes the records served by the
//! formula index, the OCI manifests served by the bottle registry, and the
//! build metadata ("tab") embedded inside those manifests.

/// Formula records from the bulk index.
pub mod formula;
/// Registry manifests and the embedded tab.
pub mod manifest;
/// OCI platform pair and bottle tag.
pub mod platform;
/// Annotated version strings.
pub mod version;

// Re-exports
pub use formula::{BottleFile, BottleSpec, Bottles, Formula, Versions};
pub use manifest::{Dependency, Manifest, ManifestEntry, ManifestError, ManifestPlatform, Tab};
pub use platform::Platform;
pub use version::AnnotatedVersion;

/// Media type requested from the registry when fetching manifests and blobs.
pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Annotation key whose value is the string-encoded [`Tab`] document.
pub const TAB_ANNOTATION: &str = "sh.brew.tab";

/// Bottle tag used by formulae whose bottle works on every platform.
pub const ALL_PLATFORMS_TAG: &str = "all";
