//! Driving a resolved install set to completion.
//!
//! Every formula goes through the same pipeline:
//!
//! ```text
//! manifest -> download -> unpack -> link
//! ```
//!
//! [`SchedulePolicy`] decides how those pipelines overlap. Concurrency is
//! bounded by [`Config::concurrency`](crate::Config::concurrency) and the first
//! failing unit cancels the rest of its group. Work already finished (cached
//! downloads, unpacked trees, links) is left in place.

pub mod group;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pour_schema::{AnnotatedVersion, Formula, Platform};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Result, Stage, StageExt};
use crate::materialize::Materializer;
use crate::registry::Registry;
use crate::reporter::Reporter;
use crate::resolver::{InstallGraph, ResolveStrategy, Resolver};
pub use group::BoundedGroup;

/// How per-formula pipelines are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulePolicy {
    /// One formula at a time, start to finish.
    Sequential,
    /// Every fetch (manifest + download) under the cap, then every
    /// unpack + link under the cap.
    #[default]
    Phased,
    /// Each formula's whole pipeline as one unit under the cap.
    Fused,
}

/// Options for one install.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Scheduling policy.
    pub schedule: SchedulePolicy,
    /// Resolution strategy.
    pub strategy: ResolveStrategy,
}

/// One formula brought into the cellar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    /// Formula name.
    pub name: String,
    /// Installed annotated version.
    pub version: AnnotatedVersion,
    /// Cellar directory, `None` when unpacking failed under the warn policy.
    pub path: Option<PathBuf>,
}

/// Outcome of an install.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    /// Formulae processed, in completion order.
    pub installed: Vec<Installed>,
    /// Formulae skipped because they were already in the cellar.
    pub skipped: Vec<String>,
    /// Wall-clock time of the whole install.
    pub elapsed: Duration,
}

/// Per-formula stages shared by every schedule.
#[derive(Clone)]
struct Pipeline {
    registry: Registry,
    materializer: Materializer,
    tag: String,
    reporter: Arc<dyn Reporter>,
}

impl Pipeline {
    async fn stage<T>(
        &self,
        stage: Stage,
        formula: &str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        self.reporter.stage_started(stage, formula);
        let started = Instant::now();
        let out = work.await.at(stage, formula)?;
        self.reporter.stage_finished(stage, formula, started.elapsed());
        Ok(out)
    }

    /// Manifest then bottle; returns the cached archive.
    async fn fetch(&self, formula: &Formula) -> Result<PathBuf> {
        let name = formula.name.as_str();
        self.stage(Stage::Manifest, name, self.registry.fetch_manifest(formula))
            .await?;
        self.stage(
            Stage::Download,
            name,
            self.registry.download_bottle(formula, &self.tag),
        )
        .await
    }

    /// Unpack then link.
    async fn materialize(
        &self,
        formula: &Formula,
        archive: PathBuf,
        cancel: CancellationToken,
    ) -> Result<Installed> {
        let name = formula.name.as_str();
        let unpacked = self
            .stage(
                Stage::Unpack,
                name,
                self.materializer.unpack(formula, &archive, cancel.clone()),
            )
            .await?;

        let path = match unpacked {
            Some(tree) => Some(
                self.stage(Stage::Link, name, self.materializer.link(formula, &tree, cancel))
                    .await?,
            ),
            None => None,
        };

        Ok(Installed {
            name: formula.name.clone(),
            version: formula.annotated_version(),
            path,
        })
    }

    async fn run(&self, formula: &Formula, cancel: CancellationToken) -> Result<Installed> {
        let archive = self.fetch(formula).await?;
        self.materialize(formula, archive, cancel).await
    }
}

/// Resolves and installs formulae.
pub struct Installer {
    config: Config,
    platform: Platform,
    pipeline: Pipeline,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("config", &self.config)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

impl Installer {
    /// Build an installer; events go to `reporter`.
    ///
    /// # Errors
    ///
    /// Fails when the registry client cannot be built.
    pub fn new(config: Config, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let platform = config.resolve_platform();
        let registry = Registry::new(&config, Arc::clone(&reporter))?;
        let materializer = Materializer::new(
            registry.cache().clone(),
            config.cellar(),
            config.unpack_failure,
            Arc::clone(&reporter),
        );
        tracing::debug!(%platform, cache = %config.cache_root.display(), "installer ready");

        Ok(Self {
            pipeline: Pipeline {
                registry,
                materializer,
                tag: platform.bottle_tag.clone(),
                reporter,
            },
            platform,
            config,
        })
    }

    /// The registry client.
    pub fn registry(&self) -> &Registry {
        &self.pipeline.registry
    }

    /// The platform bottles are selected for.
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Whether `name` is present in the cellar.
    pub fn is_installed(&self, name: &str) -> bool {
        self.pipeline.materializer.is_installed(name)
    }

    /// A resolver over the cached index, downloading the index if needed.
    ///
    /// # Errors
    ///
    /// Returns an index-stage error when the index cannot be downloaded.
    pub async fn resolver(&self) -> Result<Resolver> {
        let index = self.registry().index().await.at(Stage::Index, "formula.json")?;
        Ok(Resolver::new(index, self.registry().clone(), self.platform.clone())
            .with_lookup(self.config.index_lookup))
    }

    /// The formulae an install of `root` would touch, in install order for
    /// the transitive strategy and root-first for the direct one.
    ///
    /// # Errors
    ///
    /// Fails when a name is missing from the index, a manifest cannot be
    /// fetched or decoded, or the dependency graph has a cycle.
    pub async fn resolve(&self, root: &str, strategy: ResolveStrategy) -> Result<Vec<Formula>> {
        let resolver = self.resolver().await?;
        match strategy {
            ResolveStrategy::Direct => resolver.one_hop(root).await,
            ResolveStrategy::Transitive => {
                let (graph, mut formulas) = resolver.transitive(root).await?;
                Ok(graph
                    .order()?
                    .iter()
                    .filter_map(|name| formulas.remove(name))
                    .collect())
            }
        }
    }

    /// Resolve `root` and install it with its dependencies.
    ///
    /// # Errors
    ///
    /// Fails as [`resolve`](Self::resolve) does, or with the first stage
    /// error of any formula's pipeline, attributed to that stage and formula.
    pub async fn install(&self, root: &str, options: InstallOptions) -> Result<InstallReport> {
        let started = Instant::now();
        let resolver = self.resolver().await?;

        let mut report = match options.strategy {
            ResolveStrategy::Direct => {
                let set = resolver.one_hop(root).await?;
                InstallReport {
                    installed: self.install_set(set, options.schedule).await?,
                    ..InstallReport::default()
                }
            }
            ResolveStrategy::Transitive => {
                let (graph, formulas) = resolver.transitive(root).await?;
                self.install_graph(&graph, formulas, options.schedule).await?
            }
        };

        report.elapsed = started.elapsed();
        self.pipeline
            .reporter
            .summary(report.installed.len(), report.elapsed);
        Ok(report)
    }

    /// Fetch and materialize a resolved set under `schedule`.
    ///
    /// # Errors
    ///
    /// Returns the first stage error; under the concurrent schedules the
    /// other formulas' work is cancelled.
    pub async fn install_set(
        &self,
        formulas: Vec<Formula>,
        schedule: SchedulePolicy,
    ) -> Result<Vec<Installed>> {
        tracing::info!(count = formulas.len(), ?schedule, "installing");
        match schedule {
            SchedulePolicy::Sequential => self.sequential(formulas).await,
            SchedulePolicy::Phased => self.phased(formulas).await,
            SchedulePolicy::Fused => self.fused(formulas).await,
        }
    }

    async fn sequential(&self, formulas: Vec<Formula>) -> Result<Vec<Installed>> {
        let cancel = CancellationToken::new();
        let mut installed = Vec::with_capacity(formulas.len());
        for formula in formulas {
            installed.push(self.pipeline.run(&formula, cancel.clone()).await?);
        }
        Ok(installed)
    }

    async fn phased(&self, formulas: Vec<Formula>) -> Result<Vec<Installed>> {
        let fetched = self.prefetch(formulas).await?;

        let mut unpack = BoundedGroup::new(self.config.concurrency);
        for (formula, archive) in fetched {
            let pipeline = self.pipeline.clone();
            unpack.spawn(move |cancel| async move {
                pipeline.materialize(&formula, archive, cancel).await
            });
        }
        unpack.join().await
    }

    async fn fused(&self, formulas: Vec<Formula>) -> Result<Vec<Installed>> {
        let mut units = BoundedGroup::new(self.config.concurrency);
        for formula in formulas {
            let pipeline = self.pipeline.clone();
            units.spawn(move |cancel| async move { pipeline.run(&formula, cancel).await });
        }
        units.join().await
    }

    /// Manifest and bottle for every formula, under the cap. The result keeps
    /// the input order.
    async fn prefetch(&self, formulas: Vec<Formula>) -> Result<Vec<(Formula, PathBuf)>> {
        let mut fetch = BoundedGroup::new(self.config.concurrency);
        for (position, formula) in formulas.into_iter().enumerate() {
            let pipeline = self.pipeline.clone();
            fetch.spawn(move |_| async move {
                let archive = pipeline.fetch(&formula).await?;
                Ok((position, formula, archive))
            });
        }
        let mut fetched = fetch.join().await?;
        fetched.sort_unstable_by_key(|(position, ..)| *position);
        Ok(fetched.into_iter().map(|(_, f, archive)| (f, archive)).collect())
    }

    /// Install every node of `graph` that is not in the cellar, dependencies
    /// first. Fetching overlaps under the cap unless `schedule` is sequential;
    /// unpack and link always follow the graph order.
    async fn install_graph(
        &self,
        graph: &InstallGraph,
        mut formulas: HashMap<String, Formula>,
        schedule: SchedulePolicy,
    ) -> Result<InstallReport> {
        let plan = graph.plan(|name| self.is_installed(name))?;
        let skipped: Vec<String> = graph
            .nodes()
            .filter(|n| !plan.iter().any(|p| p == *n))
            .map(str::to_string)
            .collect();
        if !skipped.is_empty() {
            tracing::debug!(?skipped, "already installed");
        }

        let ordered: Vec<Formula> = plan.iter().filter_map(|n| formulas.remove(n)).collect();
        let cancel = CancellationToken::new();
        let mut installed = Vec::with_capacity(ordered.len());

        if schedule == SchedulePolicy::Sequential {
            for formula in &ordered {
                installed.push(self.pipeline.run(formula, cancel.clone()).await?);
            }
        } else {
            for (formula, archive) in self.prefetch(ordered).await? {
                installed.push(
                    self.pipeline
                        .materialize(&formula, archive, cancel.clone())
                        .await?,
                );
            }
        }

        Ok(InstallReport {
            installed,
            skipped,
            elapsed: Duration::ZERO,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnpackFailurePolicy;
    use crate::error::Error;
    use crate::test_support::{RecordingReporter, bottle, formula, manifest};
    use mockito::{Mock, Server, ServerGuard};
    use std::io::Write;
    use tempfile::TempDir;

    /// A mock registry serving one bottle per formula, with the index
    /// pre-seeded in the cache.
    struct FakeRegistry {
        server: ServerGuard,
        dir: TempDir,
        _mocks: Vec<Mock>,
    }

    impl FakeRegistry {
        async fn new(specs: &[(&str, &[&str])]) -> Self {
            Self::build(specs, &[], &[]).await
        }

        /// Like [`new`](Self::new), but the blobs of `broken` answer 500.
        async fn with_broken(specs: &[(&str, &[&str])], broken: &[&str]) -> Self {
            Self::build(specs, broken, &[]).await
        }

        /// Like [`new`](Self::new), but the blobs of `slow` take half a
        /// second to start streaming.
        async fn with_slow(specs: &[(&str, &[&str])], slow: &[&str]) -> Self {
            Self::build(specs, &[], slow).await
        }

        async fn build(specs: &[(&str, &[&str])], broken: &[&str], slow: &[&str]) -> Self {
            let mut server = Server::new_async().await;
            let dir = TempDir::new().unwrap();
            let mut records = Vec::new();
            let mut mocks = Vec::new();

            for (name, deps) in specs {
                let archive = bottle(name);
                let f = formula(&server.url(), name, deps, &archive);
                let manifest_path = format!("/v2/homebrew/core/{name}/manifests/1.0");
                mocks.push(
                    server
                        .mock("GET", manifest_path.as_str())
                        .with_status(200)
                        .with_body(manifest(deps))
                        .create_async()
                        .await,
                );

                let blob_path = f.bottle_for("x86_64_linux").unwrap().url.replace(&server.url(), "");
                let blob = server.mock("GET", blob_path.as_str());
                let blob = if broken.contains(name) {
                    blob.with_status(500).with_body("registry down")
                } else if slow.contains(name) {
                    blob.with_status(200).with_chunked_body(move |w| {
                        std::thread::sleep(Duration::from_millis(500));
                        w.write_all(&archive)
                    })
                } else {
                    blob.with_status(200).with_body(archive)
                };
                mocks.push(blob.create_async().await);
                records.push(f);
            }

            let index = dir.path().join("cache/api/formula.json");
            std::fs::create_dir_all(index.parent().unwrap()).unwrap();
            std::fs::write(index, serde_json::to_vec(&records).unwrap()).unwrap();
            Self {
                server,
                dir,
                _mocks: mocks,
            }
        }

        fn config(&self) -> Config {
            Config {
                cache_root: self.dir.path().join("cache"),
                prefix: self.dir.path().join("prefix"),
                api_root: format!("{}/api/", self.server.url()),
                concurrency: 2,
                platform: Some(Platform::new("linux", "amd64", "x86_64_linux")),
                ..Config::default()
            }
        }

        fn cellar(&self, name: &str) -> PathBuf {
            self.dir.path().join("prefix/Cellar").join(name)
        }
    }

    #[tokio::test]
    async fn test_direct_install_reports_every_stage() {
        let registry = FakeRegistry::new(&[("ruby", &["libyaml"]), ("libyaml", &[])]).await;
        let reporter = Arc::new(RecordingReporter::default());
        let installer = Installer::new(registry.config(), reporter.clone()).unwrap();

        let report = installer
            .install("ruby", InstallOptions::default())
            .await
            .unwrap();
        assert_eq!(report.installed.len(), 2);
        assert!(registry.cellar("ruby").join("1.0/bin/ruby").exists());
        assert!(registry.cellar("libyaml").join("1.0/bin/libyaml").exists());

        let events = reporter.events();
        for stage in ["manifest", "download", "unpack", "link"] {
            assert!(events.contains(&format!("finish {stage} ruby")), "{events:?}");
            assert!(events.contains(&format!("finish {stage} libyaml")), "{events:?}");
        }
        assert_eq!(events.last().map(String::as_str), Some("summary 2"));
    }

    fn position(events: &[String], event: &str) -> usize {
        events
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("no {event:?} in {events:?}"))
    }

    #[tokio::test]
    async fn test_phased_downloads_everything_before_unpacking() {
        let specs: &[(&str, &[&str])] = &[
            ("ruby", &["libyaml", "openssl", "zlib"]),
            ("libyaml", &[]),
            ("openssl", &[]),
            ("zlib", &[]),
        ];
        let names = ["ruby", "libyaml", "openssl", "zlib"];

        let registry = FakeRegistry::with_slow(specs, &["ruby"]).await;
        let reporter = Arc::new(RecordingReporter::default());
        let installer = Installer::new(registry.config(), reporter.clone()).unwrap();
        let options = InstallOptions {
            schedule: SchedulePolicy::Phased,
            strategy: ResolveStrategy::Direct,
        };
        installer.install("ruby", options).await.unwrap();

        let events = reporter.events();
        let last_download = names
            .iter()
            .map(|n| position(&events, &format!("finish download {n}")))
            .max()
            .unwrap();
        let first_unpack = names
            .iter()
            .map(|n| position(&events, &format!("start unpack {n}")))
            .min()
            .unwrap();
        assert!(last_download < first_unpack, "{events:?}");
    }

    #[tokio::test]
    async fn test_fused_unpacks_while_other_downloads_run() {
        let specs: &[(&str, &[&str])] = &[
            ("ruby", &["libyaml", "openssl", "zlib"]),
            ("libyaml", &[]),
            ("openssl", &[]),
            ("zlib", &[]),
        ];

        let registry = FakeRegistry::with_slow(specs, &["ruby"]).await;
        let reporter = Arc::new(RecordingReporter::default());
        let installer = Installer::new(registry.config(), reporter.clone()).unwrap();
        let options = InstallOptions {
            schedule: SchedulePolicy::Fused,
            strategy: ResolveStrategy::Direct,
        };
        installer.install("ruby", options).await.unwrap();

        let events = reporter.events();
        for name in ["ruby", "libyaml", "openssl", "zlib"] {
            assert!(
                position(&events, &format!("finish manifest {name}"))
                    < position(&events, &format!("start download {name}"))
            );
            assert!(
                position(&events, &format!("finish download {name}"))
                    < position(&events, &format!("start unpack {name}"))
            );
        }
        // The root's slow download holds one slot while the other slot
        // carries the dependencies through to unpack.
        assert!(
            position(&events, "start unpack libyaml") < position(&events, "finish download ruby"),
            "{events:?}"
        );
    }

    #[tokio::test]
    async fn test_failed_download_names_stage_and_formula() {
        let registry =
            FakeRegistry::with_broken(&[("ruby", &["openssl"]), ("openssl", &[])], &["openssl"])
                .await;
        let installer =
            Installer::new(registry.config(), Arc::new(RecordingReporter::default())).unwrap();

        for schedule in [
            SchedulePolicy::Sequential,
            SchedulePolicy::Phased,
            SchedulePolicy::Fused,
        ] {
            let options = InstallOptions {
                schedule,
                ..InstallOptions::default()
            };
            let err = installer.install("ruby", options).await.unwrap_err();
            assert_eq!(err.stage(), Some((Stage::Download, "openssl")), "{schedule:?}");
            assert!(matches!(
                err.root(),
                Error::Transport {
                    status: Some(500),
                    ..
                }
            ));
        }
        assert!(!registry.cellar("openssl").exists());
    }

    #[tokio::test]
    async fn test_transitive_install_skips_installed_dependencies() {
        let registry = FakeRegistry::new(&[
            ("ruby", &["openssl", "libyaml"]),
            ("openssl", &["ca-certificates"]),
            ("libyaml", &[]),
            ("ca-certificates", &[]),
        ])
        .await;
        std::fs::create_dir_all(registry.cellar("openssl")).unwrap();

        let reporter = Arc::new(RecordingReporter::default());
        let installer = Installer::new(registry.config(), reporter.clone()).unwrap();
        let options = InstallOptions {
            schedule: SchedulePolicy::Fused,
            strategy: ResolveStrategy::Transitive,
        };
        let report = installer.install("ruby", options).await.unwrap();

        let names: Vec<&str> = report.installed.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["ca-certificates", "libyaml", "ruby"]);
        assert_eq!(report.skipped, vec!["openssl"]);

        let links: Vec<String> = reporter
            .events()
            .into_iter()
            .filter(|e| e.starts_with("finish link"))
            .collect();
        assert_eq!(
            links,
            vec![
                "finish link ca-certificates",
                "finish link libyaml",
                "finish link ruby"
            ]
        );
    }

    #[tokio::test]
    async fn test_warn_policy_keeps_going_past_corrupt_bottle() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        // Garbage whose checksum matches the index.
        let garbage = b"not a tarball".to_vec();
        let url = server.url();
        let f = formula(&url, "ruby", &[], &garbage);
        let index = dir.path().join("cache/api/formula.json");
        std::fs::create_dir_all(index.parent().unwrap()).unwrap();
        std::fs::write(&index, serde_json::to_vec(&[&f]).unwrap()).unwrap();

        let blob_path = f.bottle_for("x86_64_linux").unwrap().url.replace(&url, "");
        let blob = server
            .mock("GET", blob_path.as_str())
            .with_status(200)
            .with_body(garbage)
            .create_async()
            .await;
        let manifest_mock = server
            .mock("GET", "/v2/homebrew/core/ruby/manifests/1.0")
            .with_status(200)
            .with_body(manifest(&[]))
            .create_async()
            .await;
        let registry = FakeRegistry {
            server,
            dir,
            _mocks: vec![blob, manifest_mock],
        };

        let reporter = Arc::new(RecordingReporter::default());
        let config = Config {
            unpack_failure: UnpackFailurePolicy::Warn,
            ..registry.config()
        };
        let report = Installer::new(config, reporter.clone())
            .unwrap()
            .install("ruby", InstallOptions::default())
            .await
            .unwrap();

        assert_eq!(report.installed[0].path, None);
        assert!(reporter.events().iter().any(|e| e.starts_with("warn ")));
        assert!(!registry.cellar("ruby").exists());

        let strict =
            Installer::new(registry.config(), Arc::new(RecordingReporter::default())).unwrap();
        let err = strict
            .install("ruby", InstallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some((Stage::Unpack, "ruby")));
        assert!(matches!(err.root(), Error::ArchiveCorrupt { .. }));
    }

    #[tokio::test]
    async fn test_resolve_orders_transitive_set() {
        let registry = FakeRegistry::new(&[
            ("ruby", &["openssl"]),
            ("openssl", &["ca-certificates"]),
            ("ca-certificates", &[]),
        ])
        .await;
        let installer =
            Installer::new(registry.config(), Arc::new(RecordingReporter::default())).unwrap();

        let set = installer
            .resolve("ruby", ResolveStrategy::Transitive)
            .await
            .unwrap();
        let names: Vec<&str> = set.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["ca-certificates", "openssl", "ruby"]);

        let direct = installer
            .resolve("ruby", ResolveStrategy::Direct)
            .await
            .unwrap();
        assert_eq!(direct.len(), 2);
        assert_eq!(direct[0].name, "ruby");
    }
}
