//! Fixtures shared by unit tests.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use pour_schema::Formula;
use sha2::{Digest, Sha256};

use crate::error::Stage;
use crate::reporter::Reporter;

/// A gzip-compressed tarball holding `files` (path, contents).
pub(crate) fn tarball(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, *contents).unwrap();
    }
    let mut gz = builder.into_inner().unwrap();
    gz.flush().unwrap();
    gz.finish().unwrap()
}

/// The bottle of `name` at version `1.0` containing `bin/<name>`.
pub(crate) fn bottle(name: &str) -> Vec<u8> {
    let path = format!("{name}/1.0/bin/{name}");
    tarball(&[(path.as_str(), name.as_bytes())])
}

/// A formula at version `1.0` whose registry lives at `server_url`.
pub(crate) fn formula(server_url: &str, name: &str, deps: &[&str], archive: &[u8]) -> Formula {
    let sha = hex::encode(Sha256::digest(archive));
    serde_json::from_value(serde_json::json!({
        "name": name,
        "full_name": name,
        "versions": {"stable": "1.0", "bottle": true},
        "revision": 0,
        "dependencies": deps,
        "bottle": {"stable": {
            "rebuild": 0,
            "root_url": format!("{server_url}/v2/homebrew/core"),
            "files": {"x86_64_linux": {
                "cellar": ":any",
                "url": format!("{server_url}/v2/homebrew/core/{name}/blobs/sha256:{sha}"),
                "sha256": sha,
            }},
        }},
    }))
    .unwrap()
}

/// A manifest whose linux/amd64 tab lists `deps` as runtime dependencies.
pub(crate) fn manifest(deps: &[&str]) -> String {
    let deps: Vec<_> = deps
        .iter()
        .map(|d| serde_json::json!({"full_name": d, "version": "1.0"}))
        .collect();
    let tab = serde_json::json!({"runtime_dependencies": deps});
    serde_json::json!({
        "schemaVersion": 2,
        "manifests": [{
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "platform": {"architecture": "amd64", "os": "linux"},
            "annotations": {"sh.brew.tab": tab.to_string()},
        }],
    })
    .to_string()
}

/// Records reporter events for assertions.
#[derive(Debug, Default)]
pub(crate) struct RecordingReporter {
    pub(crate) events: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl Reporter for RecordingReporter {
    fn stage_started(&self, stage: Stage, formula: &str) {
        self.push(format!("start {stage} {formula}"));
    }
    fn stage_finished(&self, stage: Stage, formula: &str, _: Duration) {
        self.push(format!("finish {stage} {formula}"));
    }
    fn cache_hit(&self, path: &Path) {
        let name = path.file_name().map(PathBuf::from).unwrap_or_default();
        self.push(format!("hit {}", name.display()));
    }
    fn warning(&self, msg: &str) {
        self.push(format!("warn {msg}"));
    }
    fn summary(&self, count: usize, _: Duration) {
        self.push(format!("summary {count}"));
    }
}
