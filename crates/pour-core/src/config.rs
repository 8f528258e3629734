//! Client configuration.
//!
//! Every recognized option is a field of [`Config`]; [`Config::default`]
//! documents the defaults and [`Config::from_env`] layers environment
//! overrides on top of them.

use std::path::PathBuf;

use pour_schema::Platform;

use crate::index::LookupStrategy;

/// Default number of concurrently running install units.
pub const DEFAULT_CONCURRENCY: usize = 6;

/// Default formula API root.
pub const DEFAULT_API_ROOT: &str = "https://formulae.brew.sh/api/";

/// Anonymous bearer token accepted by the bottle registry.
pub const DEFAULT_BEARER_TOKEN: &str = "QQ==";

/// What to do when a downloaded bottle cannot be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnpackFailurePolicy {
    /// Fail the formula's unit (and with it the install).
    #[default]
    Fail,
    /// Report a warning and treat the unit as done.
    Warn,
}

/// Options recognized by the installer.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cache root holding `api/formula.json`, manifests, bottles and unpacked trees.
    pub cache_root: PathBuf,
    /// Install prefix; formulae are linked into `<prefix>/Cellar`.
    pub prefix: PathBuf,
    /// Formula API root (must end with `/`).
    pub api_root: String,
    /// Maximum number of install units in flight at once (at least 1).
    pub concurrency: usize,
    /// Static bearer credential attached to registry requests.
    pub bearer_token: String,
    /// Client identification sent as `User-Agent`.
    pub user_agent: String,
    /// Platform override; `None` detects the running platform.
    pub platform: Option<Platform>,
    /// Policy for extraction failures.
    pub unpack_failure: UnpackFailurePolicy,
    /// How formula records are found in the index.
    pub index_lookup: LookupStrategy,
    /// Prebuilt HTTP client; `None` builds one from the fields above.
    pub http_client: Option<reqwest::Client>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            prefix: default_prefix(),
            api_root: DEFAULT_API_ROOT.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            bearer_token: DEFAULT_BEARER_TOKEN.to_string(),
            user_agent: crate::USER_AGENT.to_string(),
            platform: None,
            unpack_failure: UnpackFailurePolicy::default(),
            index_lookup: LookupStrategy::default(),
            http_client: None,
        }
    }
}

impl Config {
    /// Defaults overridden by `POUR_HOME`, `POUR_CACHE`, `POUR_API_ROOT`,
    /// `POUR_CONCURRENCY`, `POUR_BOTTLE_TAG` and `POUR_TOKEN`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(home) = lookup("POUR_HOME") {
            config.prefix = PathBuf::from(home);
        }
        if let Some(cache) = lookup("POUR_CACHE") {
            config.cache_root = PathBuf::from(cache);
        }
        if let Some(root) = lookup("POUR_API_ROOT") {
            config.api_root = normalize_api_root(&root);
        }
        if let Some(n) = lookup("POUR_CONCURRENCY").and_then(|v| v.parse::<usize>().ok()) {
            config.concurrency = n.max(1);
        }
        if let Some(tag) = lookup("POUR_BOTTLE_TAG") {
            config.platform = Platform::from_bottle_tag(&tag);
            if config.platform.is_none() {
                tracing::warn!(%tag, "unrecognized POUR_BOTTLE_TAG, detecting platform instead");
            }
        }
        if let Some(token) = lookup("POUR_TOKEN") {
            config.bearer_token = token;
        }
        config
    }

    /// The cellar directory, `<prefix>/Cellar`.
    pub fn cellar(&self) -> PathBuf {
        self.prefix.join("Cellar")
    }

    /// The configured platform override, or the detected platform.
    pub fn resolve_platform(&self) -> Platform {
        self.platform.clone().unwrap_or_else(crate::platform::detect)
    }
}

/// Ensure an API root ends with exactly one `/`.
pub fn normalize_api_root(root: &str) -> String {
    format!("{}/", root.trim_end_matches('/'))
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir)
        .join("pour")
}

fn default_prefix() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".pour")
}
