use serde::{Deserialize, Serialize};

/// The derived version identity of a bottle: `stable[_revision][-rebuild]`.
///
/// This string keys both the on-disk cache and the cellar, so it is only ever
/// produced through [`AnnotatedVersion::new`] (or
/// [`Formula::annotated_version`](crate::Formula::annotated_version)).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnnotatedVersion(String);

impl AnnotatedVersion {
    /// Build the annotated version from its three components.
    ///
    /// A zero revision or rebuild is omitted.
    pub fn new(stable: &str, revision: u32, rebuild: u32) -> Self {
        let mut v = stable.to_string();
        if revision != 0 {
            v.push_str(&format!("_{revision}"));
        }
        if rebuild != 0 {
            v.push_str(&format!("-{rebuild}"));
        }
        Self(v)
    }

    /// Return the version string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AnnotatedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for AnnotatedVersion {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for AnnotatedVersion {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<std::path::Path> for AnnotatedVersion {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

impl PartialEq<str> for AnnotatedVersion {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for AnnotatedVersion {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
