/// The platform a bottle is selected for.
///
/// Carries two spellings of the same thing: the OCI `{os, arch}` pair used to
/// pick a manifest entry, and the bottle tag (e.g. `x86_64_linux`) used to pick
/// a file out of a formula's bottle map.
///
/// # Example
///
/// ```
/// use pour_schema::Platform;
///
/// let linux = Platform::new("linux", "amd64", "x86_64_linux");
/// assert_eq!(linux.to_string(), "linux/amd64 (x86_64_linux)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Platform {
    /// OCI operating system (`linux`, `darwin`).
    pub os: String,
    /// OCI architecture (`amd64`, `arm64`).
    pub arch: String,
    /// Bottle tag (`x86_64_linux`, `arm64_sonoma`, ...).
    pub bottle_tag: String,
}

impl Platform {
    /// Create a platform from explicit parts.
    pub fn new(os: &str, arch: &str, bottle_tag: &str) -> Self {
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
            bottle_tag: bottle_tag.to_string(),
        }
    }

    /// Derive the OCI pair from a bottle tag.
    ///
    /// `x86_64_linux` maps to `linux/amd64`; any other `<arch>_<codename>` tag
    /// maps to `darwin` with the given architecture.
    pub fn from_bottle_tag(tag: &str) -> Option<Self> {
        let (arch, rest) = if let Some(rest) = tag.strip_prefix("x86_64_") {
            ("amd64", rest)
        } else if let Some(rest) = tag.strip_prefix("arm64_") {
            ("arm64", rest)
        } else {
            return None;
        };
        if rest.is_empty() {
            return None;
        }
        let os = if rest == "linux" { "linux" } else { "darwin" };
        Some(Self::new(os, arch, tag))
    }

    /// Map a Rust architecture name (`std::env::consts::ARCH`) to its OCI name.
    pub fn oci_arch(rust_arch: &str) -> &str {
        match rust_arch {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        }
    }

    /// Map a Rust OS name (`std::env::consts::OS`) to its OCI name.
    pub fn oci_os(rust_os: &str) -> &str {
        match rust_os {
            "macos" => "darwin",
            other => other,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({})", self.os, self.arch, self.bottle_tag)
    }
}
