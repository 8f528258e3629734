//! Dependency resolution.
//!
//! Two strategies produce the set of formulae to install for a root:
//!
//! - [`Resolver::one_hop`] follows only the runtime dependencies recorded in
//!   the root's tab for the current platform.
//! - [`Resolver::transitive`] collects the declared dependency closure from
//!   the index into an [`InstallGraph`], which is then walked depth-first so
//!   every dependency is installed before its dependents.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use pour_schema::{Formula, Platform};

use crate::error::{Error, Result, Stage, StageExt};
use crate::index::{IndexLocator, LookupStrategy};
use crate::registry::Registry;

/// Which resolution strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveStrategy {
    /// The root plus its tab's runtime dependencies.
    #[default]
    Direct,
    /// The full declared dependency closure, installed in topological order.
    Transitive,
}

/// A source of dependency edges, `name -> declared dependency names`.
pub trait EdgeSource {
    /// Declared dependencies of `name`; unknown names have none.
    fn dependencies(&self, name: &str) -> &[String];
}

impl EdgeSource for HashMap<String, Vec<String>> {
    fn dependencies(&self, name: &str) -> &[String] {
        self.get(name).map(Vec::as_slice).unwrap_or_default()
    }
}

impl EdgeSource for HashMap<String, Formula> {
    fn dependencies(&self, name: &str) -> &[String] {
        self.get(name)
            .map(|f| f.dependencies.as_slice())
            .unwrap_or_default()
    }
}

/// The dependency graph reachable from a set of roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallGraph {
    roots: Vec<String>,
    edges: BTreeMap<String, Vec<String>>,
}

impl InstallGraph {
    /// Copy every edge reachable from `roots` out of `source`.
    pub fn build<S: AsRef<str>>(roots: &[S], source: &impl EdgeSource) -> Self {
        let roots: Vec<String> = roots.iter().map(|r| r.as_ref().to_string()).collect();
        let mut edges = BTreeMap::new();
        let mut stack = roots.clone();

        while let Some(name) = stack.pop() {
            if edges.contains_key(&name) {
                continue;
            }
            let deps = source.dependencies(&name).to_vec();
            stack.extend(deps.iter().filter(|d| !edges.contains_key(*d)).cloned());
            edges.insert(name, deps);
        }

        Self { roots, edges }
    }

    /// Every node in the graph.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Depth-first postorder: each node appears after all of its dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cycle`] if the graph is not acyclic.
    pub fn order(&self) -> Result<Vec<String>> {
        let mut order = Vec::with_capacity(self.edges.len());
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();

        for root in &self.roots {
            self.visit(root, &mut order, &mut visited, &mut visiting)?;
        }
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        order: &mut Vec<String>,
        visited: &mut HashSet<&'a str>,
        visiting: &mut HashSet<&'a str>,
    ) -> Result<()> {
        if visited.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name) {
            return Err(Error::Cycle {
                name: name.to_string(),
            });
        }

        for dep in self.edges.get(name).into_iter().flatten() {
            self.visit(dep, order, visited, visiting)?;
        }

        visiting.remove(name);
        visited.insert(name);
        order.push(name.to_string());
        Ok(())
    }

    /// Nodes to install, in dependency order, skipping installed ones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cycle`] when the graph is not acyclic.
    pub fn plan(&self, is_installed: impl Fn(&str) -> bool) -> Result<Vec<String>> {
        Ok(self
            .order()?
            .into_iter()
            .filter(|name| !is_installed(name))
            .collect())
    }

    /// Call `install` for every node that is not installed, dependencies first.
    ///
    /// Stops at the first failing callback. Returns the nodes installed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cycle`] before any callback runs, or the first
    /// callback error.
    pub fn walk(
        &self,
        is_installed: impl Fn(&str) -> bool,
        mut install: impl FnMut(&str) -> Result<()>,
    ) -> Result<Vec<String>> {
        let plan = self.plan(is_installed)?;
        for name in &plan {
            install(name)?;
        }
        Ok(plan)
    }
}

/// Resolves install sets against an on-disk index and the registry.
#[derive(Debug, Clone)]
pub struct Resolver {
    index: PathBuf,
    lookup: LookupStrategy,
    registry: Registry,
    platform: Platform,
}

impl Resolver {
    /// A resolver reading the index at `index`.
    pub fn new(index: PathBuf, registry: Registry, platform: Platform) -> Self {
        Self {
            index,
            lookup: LookupStrategy::default(),
            registry,
            platform,
        }
    }

    /// Use a different index lookup strategy.
    #[must_use]
    pub fn with_lookup(mut self, lookup: LookupStrategy) -> Self {
        self.lookup = lookup;
        self
    }

    /// One pass over the index for `names`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] naming the names the index lacks.
    pub async fn locate(&self, names: Vec<String>) -> Result<Vec<Formula>> {
        let path = self.index.clone();
        let lookup = self.lookup;
        tokio::task::spawn_blocking(move || IndexLocator::open(&path)?.locate(&names, lookup))
            .await?
    }

    /// The root and the runtime dependencies its tab records for this platform.
    ///
    /// The root is always the first element.
    ///
    /// # Errors
    ///
    /// Index failures are attributed to the index stage and manifest failures
    /// to the manifest stage, both naming the root.
    pub async fn one_hop(&self, root: &str) -> Result<Vec<Formula>> {
        let mut found = self
            .locate(vec![root.to_string()])
            .await
            .at(Stage::Index, root)?;
        let root = found.swap_remove(0);

        let manifest = self
            .registry
            .fetch_manifest(&root)
            .await
            .at(Stage::Manifest, &root.name)?;
        let tab = manifest
            .tab_for(&self.platform)
            .map_err(|e| Error::from(e).at(Stage::Manifest, &root.name))?;

        let deps: Vec<String> = tab
            .runtime_dependencies()
            .iter()
            .map(|d| d.full_name.clone())
            .filter(|name| *name != root.name)
            .collect();
        tracing::debug!(formula = %root.name, deps = ?deps, "runtime dependencies");

        let mut set = vec![root];
        if !deps.is_empty() {
            let resolved = self.locate(deps).await.at(Stage::Index, &set[0].name)?;
            set.extend(resolved);
        }
        Ok(set)
    }

    /// The declared dependency closure of `root`, one index pass per level.
    ///
    /// # Errors
    ///
    /// Returns an index-stage error when any name in the closure is missing.
    pub async fn transitive(&self, root: &str) -> Result<(InstallGraph, HashMap<String, Formula>)> {
        let mut formulas: HashMap<String, Formula> = HashMap::new();
        let mut frontier = vec![root.to_string()];
        let mut root_name = None;

        while !frontier.is_empty() {
            let found = self
                .locate(std::mem::take(&mut frontier))
                .await
                .at(Stage::Index, root)?;
            root_name.get_or_insert_with(|| found[0].name.clone());

            let mut queued = HashSet::new();
            for formula in &found {
                for dep in &formula.dependencies {
                    if !formulas.contains_key(dep)
                        && found.iter().all(|f| &f.name != dep)
                        && queued.insert(dep.clone())
                    {
                        frontier.push(dep.clone());
                    }
                }
            }
            formulas.extend(found.into_iter().map(|f| (f.name.clone(), f)));
        }

        let root_name = root_name.unwrap_or_else(|| root.to_string());
        let graph = InstallGraph::build(&[root_name], &formulas);
        Ok((graph, formulas))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::reporter::NullReporter;
    use std::cell::RefCell;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn edges(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.iter().map(|s| (*s).to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_walk_skips_installed_and_orders_dependencies_first() {
        let source = edges(&[("ruby", &["openssl", "libyaml"])]);
        let graph = InstallGraph::build(&["ruby"], &source);
        let installed = ["openssl"];

        let attempted = RefCell::new(Vec::new());
        let done = graph
            .walk(
                |n| installed.contains(&n),
                |n| {
                    attempted.borrow_mut().push(n.to_string());
                    Ok(())
                },
            )
            .unwrap();

        assert_eq!(done, vec!["libyaml", "ruby"]);
        assert_eq!(*attempted.borrow(), vec!["libyaml", "ruby"]);
    }

    #[test]
    fn test_shared_dependency_visited_once() {
        let source = edges(&[
            ("app", &["a", "b"]),
            ("a", &["c"]),
            ("b", &["c"]),
            ("c", &[]),
        ]);
        let order = InstallGraph::build(&["app"], &source).order().unwrap();
        assert_eq!(order.len(), 4);
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("c") < pos("a"));
        assert!(pos("c") < pos("b"));
        assert_eq!(order.last().map(String::as_str), Some("app"));
    }

    #[test]
    fn test_cycle_is_reported() {
        let source = edges(&[("a", &["b"]), ("b", &["a"])]);
        let graph = InstallGraph::build(&["a"], &source);
        assert!(matches!(graph.order(), Err(Error::Cycle { .. })));

        let err = graph.walk(|_| false, |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::Cycle { .. }));
    }

    #[test]
    fn test_walk_stops_at_first_failure() {
        let source = edges(&[("ruby", &["openssl", "libyaml"])]);
        let graph = InstallGraph::build(&["ruby"], &source);
        let mut seen = Vec::new();
        let err = graph
            .walk(
                |_| false,
                |n| {
                    seen.push(n.to_string());
                    Err(Error::Cancelled)
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(seen.len(), 1);
    }

    fn index_record(server_url: &str, name: &str, deps: &[&str]) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "full_name": name,
            "versions": {"stable": "1.0"},
            "revision": 0,
            "dependencies": deps,
            "bottle": {"stable": {
                "rebuild": 0,
                "root_url": format!("{server_url}/v2/homebrew/core"),
                "files": {},
            }},
        })
    }

    fn resolver(server: &mockito::Server, dir: &TempDir, records: &[serde_json::Value]) -> Resolver {
        let index = dir.path().join("formula.json");
        std::fs::write(&index, serde_json::to_vec(records).unwrap()).unwrap();
        let config = Config {
            cache_root: dir.path().join("cache"),
            api_root: format!("{}/api/", server.url()),
            ..Config::default()
        };
        let registry = Registry::new(&config, Arc::new(NullReporter)).unwrap();
        Resolver::new(index, registry, Platform::new("linux", "amd64", "x86_64_linux"))
    }

    #[tokio::test]
    async fn test_one_hop_returns_root_and_tab_dependencies() {
        let mut server = mockito::Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let url = server.url();
        let records = [
            index_record(&url, "zlib", &[]),
            index_record(&url, "openssl", &[]),
            index_record(&url, "ruby", &["libyaml", "openssl"]),
            index_record(&url, "libyaml", &[]),
        ];
        let resolver = resolver(&server, &dir, &records);

        let tab = serde_json::json!({"runtime_dependencies": [
            {"full_name": "openssl", "version": "1.0"},
            {"full_name": "libyaml", "version": "1.0"},
        ]});
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [{
                "platform": {"architecture": "amd64", "os": "linux"},
                "annotations": {"sh.brew.tab": tab.to_string()},
            }],
        });
        let _m = server
            .mock("GET", "/v2/homebrew/core/ruby/manifests/1.0")
            .with_status(200)
            .with_body(manifest.to_string())
            .create_async()
            .await;

        for lookup in [LookupStrategy::Stream, LookupStrategy::Scan] {
            let set = resolver.clone().with_lookup(lookup).one_hop("ruby").await.unwrap();
            let mut names: Vec<&str> = set.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names[0], "ruby");
            names.sort_unstable();
            assert_eq!(names, vec!["libyaml", "openssl", "ruby"]);
        }
    }

    #[tokio::test]
    async fn test_one_hop_unsupported_platform() {
        let mut server = mockito::Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let records = [index_record(&server.url(), "ruby", &[])];
        let resolver = resolver(&server, &dir, &records);

        let _m = server
            .mock("GET", "/v2/homebrew/core/ruby/manifests/1.0")
            .with_status(200)
            .with_body(r#"{"schemaVersion":2,"manifests":[{"platform":{"architecture":"arm64","os":"darwin"}}]}"#)
            .create_async()
            .await;

        let err = resolver.one_hop("ruby").await.unwrap_err();
        assert_eq!(err.stage(), Some((Stage::Manifest, "ruby")));
        assert!(matches!(err.root(), Error::PlatformUnsupported { .. }));
    }

    #[tokio::test]
    async fn test_transitive_collects_closure() {
        let server = mockito::Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let url = server.url();
        let records = [
            index_record(&url, "ruby", &["libyaml", "openssl"]),
            index_record(&url, "openssl", &["ca-certificates"]),
            index_record(&url, "libyaml", &[]),
            index_record(&url, "ca-certificates", &[]),
            index_record(&url, "unrelated", &[]),
        ];
        let resolver = resolver(&server, &dir, &records);

        let (graph, formulas) = resolver.transitive("ruby").await.unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(formulas.len(), 4);

        let order = graph.order().unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("ca-certificates") < pos("openssl"));
        assert!(pos("openssl") < pos("ruby"));
        assert!(pos("libyaml") < pos("ruby"));
    }

    #[tokio::test]
    async fn test_transitive_missing_dependency() {
        let server = mockito::Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let records = [index_record(&server.url(), "ruby", &["ghost"])];
        let resolver = resolver(&server, &dir, &records);

        let err = resolver.transitive("ruby").await.unwrap_err();
        match err.root() {
            Error::NotFound { missing } => assert_eq!(missing, &vec!["ghost".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
    }
}
