//! Unpacking bottles and linking them into the cellar.
//!
//! A bottle is a gzip-compressed tarball laid out as
//! `<name>/<annotated-version>/...`. It is extracted once into the cache's
//! `<name>--<annotated-version>.out/` entry, then its payload directory is
//! mirrored into `<cellar>/<name>/<annotated-version>` as relative symlinks.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use pour_schema::Formula;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::cache::{CacheKey, CacheStore};
use crate::config::UnpackFailurePolicy;
use crate::error::{Error, Result};
use crate::reporter::Reporter;

/// Extract a gzipped tarball into `dest`.
///
/// Extraction happens in a sibling temp directory that is renamed onto `dest`
/// when complete, so `dest` is either absent or fully populated. Returns the
/// number of entries written.
///
/// # Errors
///
/// Returns [`Error::ArchiveCorrupt`] when the archive cannot be decoded or an
/// entry would land outside `dest`, [`Error::Cancelled`] when `cancel` fires
/// mid-extraction, and [`Error::Io`] for filesystem failures.
pub fn unpack_archive(archive: &Path, dest: &Path, cancel: &CancellationToken) -> Result<usize> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    let staging = tempfile::Builder::new()
        .prefix(".unpack-")
        .tempdir_in(parent)
        .map_err(|e| Error::io(parent, e))?;

    let corrupt = |reason: String| Error::ArchiveCorrupt {
        path: archive.to_path_buf(),
        reason,
    };

    let file = File::open(archive).map_err(|e| Error::io(archive, e))?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    tar.set_preserve_permissions(true);

    let mut count = 0;
    for entry in tar.entries().map_err(|e| corrupt(e.to_string()))? {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut entry = entry.map_err(|e| corrupt(e.to_string()))?;
        // unpack_in refuses paths that would escape the staging directory.
        let written = entry
            .unpack_in(staging.path())
            .map_err(|e| corrupt(e.to_string()))?;
        if !written {
            let path = entry.path().map(|p| p.display().to_string()).unwrap_or_default();
            return Err(corrupt(format!("entry escapes the archive root: {path}")));
        }
        count += 1;
    }

    match fs::rename(staging.path(), dest) {
        Ok(()) => Ok(count),
        // Another writer finished first; its tree is equally valid.
        Err(_) if dest.is_dir() => Ok(count),
        Err(e) => Err(Error::io(dest, e)),
    }
}

/// Mirror the tree at `src` into `dst` as relative symlinks.
///
/// Both directories must exist. Subdirectories are created as real
/// directories (existing ones are kept); every other entry becomes a symlink
/// whose target is relative to the link's own parent directory, so the
/// mirrored tree stays valid when `dst` and `src` move together. Existing
/// symlinks in `dst` are replaced. Returns the number of links created.
///
/// # Errors
///
/// Returns [`Error::Io`] when either directory is missing or a link cannot be
/// created.
pub fn clone_dir_with_symlinks(src: &Path, dst: &Path) -> Result<usize> {
    let src = fs::canonicalize(src).map_err(|e| Error::io(src, e))?;
    let dst = fs::canonicalize(dst).map_err(|e| Error::io(dst, e))?;
    if !dst.is_dir() {
        return Err(Error::io(
            &dst,
            std::io::Error::new(std::io::ErrorKind::NotADirectory, "not a directory"),
        ));
    }

    let mut links = 0;
    for entry in WalkDir::new(&src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map_or_else(|| src.clone(), Path::to_path_buf);
            Error::io(path, e.into())
        })?;
        let relative = entry
            .path()
            .strip_prefix(&src)
            .map_err(|e| Error::io(entry.path(), std::io::Error::other(e)))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;
            continue;
        }

        let link_dir = target.parent().unwrap_or(&dst);
        let link_target = relative_path(link_dir, entry.path());
        if fs::symlink_metadata(&target).is_ok_and(|m| m.file_type().is_symlink()) {
            fs::remove_file(&target).map_err(|e| Error::io(&target, e))?;
        }
        symlink(&link_target, &target).map_err(|e| Error::io(&target, e))?;
        links += 1;
    }
    Ok(links)
}

/// Compute a relative path from `from_dir` to `to_path`.
///
/// Both arguments must be absolute. Walks up from `from_dir` to the common
/// ancestor and then descends into `to_path`.
fn relative_path(from_dir: &Path, to_path: &Path) -> PathBuf {
    let from: Vec<_> = from_dir.components().collect();
    let to: Vec<_> = to_path.components().collect();

    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut result = PathBuf::new();
    for _ in common..from.len() {
        result.push("..");
    }
    for part in &to[common..] {
        result.push(part);
    }
    result
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Unpacks cached bottles and links them into the cellar.
#[derive(Clone)]
pub struct Materializer {
    cache: CacheStore,
    cellar: PathBuf,
    policy: UnpackFailurePolicy,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for Materializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Materializer")
            .field("cache", &self.cache)
            .field("cellar", &self.cellar)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Materializer {
    /// A materializer unpacking into `cache` and linking into `cellar`.
    pub fn new(
        cache: CacheStore,
        cellar: PathBuf,
        policy: UnpackFailurePolicy,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            cache,
            cellar,
            policy,
            reporter,
        }
    }

    /// Whether `name` is already present in the cellar.
    pub fn is_installed(&self, name: &str) -> bool {
        self.cellar.join(name).exists()
    }

    /// Unpack a formula's cached bottle, reusing an existing unpacked tree.
    ///
    /// Returns `None` when extraction failed and the policy is
    /// [`UnpackFailurePolicy::Warn`].
    ///
    /// # Errors
    ///
    /// Extraction failures under [`UnpackFailurePolicy::Fail`], and
    /// cancellation under either policy.
    pub async fn unpack(
        &self,
        formula: &Formula,
        archive: &Path,
        cancel: CancellationToken,
    ) -> Result<Option<PathBuf>> {
        let dest = self.cache.path(&CacheKey::unpacked(formula));
        if dest.is_dir() {
            self.reporter.cache_hit(&dest);
            return Ok(Some(dest));
        }

        let archive = archive.to_path_buf();
        let out = dest.clone();
        let result =
            tokio::task::spawn_blocking(move || unpack_archive(&archive, &out, &cancel)).await?;

        match result {
            Ok(entries) => {
                tracing::debug!(formula = %formula.name, entries, "unpacked bottle");
                Ok(Some(dest))
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) if self.policy == UnpackFailurePolicy::Warn => {
                let msg = format!("failed to unpack {}: {err}", formula.name);
                tracing::warn!(formula = %formula.name, error = %err, "unpack failed, continuing");
                self.reporter.warning(&msg);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Link an unpacked bottle into `<cellar>/<name>/<annotated-version>`.
    ///
    /// The payload is the tree's `<name>/<stable>[_<revision>]` directory when
    /// present, otherwise the whole tree. Bottles never include the rebuild
    /// counter in that directory, only the cellar path does.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fired before linking started,
    /// or [`Error::Io`] when the cellar cannot be written.
    pub async fn link(
        &self,
        formula: &Formula,
        unpacked: &Path,
        cancel: CancellationToken,
    ) -> Result<PathBuf> {
        let version = formula.annotated_version();
        let nested = unpacked.join(&formula.name).join(formula.pkg_version());
        let payload = if nested.is_dir() {
            nested
        } else {
            unpacked.to_path_buf()
        };
        let dest = self.cellar.join(&formula.name).join(&version);

        let out = dest.clone();
        let links = tokio::task::spawn_blocking(move || {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            fs::create_dir_all(&out).map_err(|e| Error::io(&out, e))?;
            clone_dir_with_symlinks(&payload, &out)
        })
        .await??;

        tracing::debug!(formula = %formula.name, links, dest = %dest.display(), "linked");
        Ok(dest)
    }
}
