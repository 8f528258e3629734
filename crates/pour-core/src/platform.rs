//! Detection of the platform bottles are selected for.
//!
//! [`detect`] is the default policy. Tests and `POUR_BOTTLE_TAG` inject a
//! fixed [`Platform`] through [`Config::platform`](crate::Config::platform)
//! instead of patching detection.

use std::process::Command;

use pour_schema::Platform;

/// Detect the running platform.
///
/// Linux maps to `<arch>_linux`. macOS maps to `<arch>_<codename>`, with the
/// codename taken from `sw_vers`; an unknown release falls back to the newest
/// codename known here.
pub fn detect() -> Platform {
    let os = Platform::oci_os(std::env::consts::OS);
    let arch = Platform::oci_arch(std::env::consts::ARCH);
    let tag_arch = if arch == "amd64" { "x86_64" } else { arch };

    let suffix = if os == "darwin" {
        macos_codename(macos_major_version()).to_string()
    } else {
        os.to_string()
    };

    Platform::new(os, arch, &format!("{tag_arch}_{suffix}"))
}

fn macos_major_version() -> Option<u32> {
    let output = Command::new("sw_vers").arg("-productVersion").output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .trim()
        .split('.')
        .next()?
        .parse()
        .ok()
}

fn macos_codename(major: Option<u32>) -> &'static str {
    match major {
        Some(11) => "big_sur",
        Some(12) => "monterey",
        Some(13) => "ventura",
        Some(14) => "sonoma",
        _ => "sequoia",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_is_consistent() {
        let p = detect();
        assert!(!p.os.is_empty());
        assert!(p.bottle_tag.contains('_'));
        if p.os == "linux" {
            assert!(p.bottle_tag.ends_with("_linux"));
        }
    }

    #[test]
    fn test_codenames() {
        assert_eq!(macos_codename(Some(14)), "sonoma");
        assert_eq!(macos_codename(Some(11)), "big_sur");
        assert_eq!(macos_codename(None), "sequoia");
    }
}
