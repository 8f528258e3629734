//! pour - pours prebuilt bottles into a cellar
//!
//! Resolves a formula against the bulk formula index, fetches the bottles
//! for the current platform from the registry, and links them into
//! `<prefix>/Cellar` as relative symlinks into the cache.
//!
//! # Directory Layout
//!
//! ```text
//! <cache>/
//! ├── api/formula.json                  # Bulk formula index
//! ├── <name>_bottle_manifest--<version> # Registry manifests
//! ├── <name>--<version>                 # Bottle archives
//! └── <name>--<version>.out/            # Unpacked bottles
//! <prefix>/
//! └── Cellar/<name>/<version>/          # Symlink mirror of the unpacked payload
//! ```

#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]

pub mod cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use pour_core::{Config, ResolveStrategy, SchedulePolicy};

#[derive(Debug, Parser)]
#[command(name = "pour")]
#[command(author, version, about = "pour - pours prebuilt bottles into a cellar")]
pub struct Cli {
    /// Cache directory (overrides POUR_CACHE)
    #[arg(long, global = true)]
    pub cache: Option<PathBuf>,

    /// Install prefix; formulae are linked into <prefix>/Cellar (overrides POUR_HOME)
    #[arg(long, global = true)]
    pub prefix: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install a formula and its dependencies
    Install {
        /// Formula name
        name: String,
        /// How fetching and unpacking overlap
        #[arg(long, value_enum, default_value_t = Schedule::Phased)]
        schedule: Schedule,
        /// Which dependencies to install
        #[arg(long, value_enum, default_value_t = Strategy::Direct)]
        strategy: Strategy,
        /// Maximum concurrent units (overrides POUR_CONCURRENCY)
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Warn and continue when a bottle fails to unpack
        #[arg(long)]
        keep_going: bool,
    },
    /// List the formulae an install would touch
    Deps {
        /// Formula name
        name: String,
        /// Which dependencies to list
        #[arg(long, value_enum, default_value_t = Strategy::Direct)]
        strategy: Strategy,
    },
    /// Show a formula's record
    Info {
        /// Formula name
        name: String,
        /// Ask the formula API instead of the cached index
        #[arg(long)]
        remote: bool,
    },
    /// Re-download the formula index
    Update,
}

/// Command-line spelling of [`SchedulePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Schedule {
    /// One formula at a time
    Sequential,
    /// All downloads, then all unpacks
    Phased,
    /// Each formula's pipeline as one unit
    Fused,
}

impl From<Schedule> for SchedulePolicy {
    fn from(s: Schedule) -> Self {
        match s {
            Schedule::Sequential => Self::Sequential,
            Schedule::Phased => Self::Phased,
            Schedule::Fused => Self::Fused,
        }
    }
}

/// Command-line spelling of [`ResolveStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// The formula plus the runtime dependencies its bottle records
    Direct,
    /// The full declared dependency closure
    Transitive,
}

impl From<Strategy> for ResolveStrategy {
    fn from(s: Strategy) -> Self {
        match s {
            Strategy::Direct => Self::Direct,
            Strategy::Transitive => Self::Transitive,
        }
    }
}

impl Cli {
    /// Environment configuration with command-line overrides applied.
    pub fn config(&self) -> Config {
        let mut config = Config::from_env();
        if let Some(cache) = &self.cache {
            config.cache_root.clone_from(cache);
        }
        if let Some(prefix) = &self.prefix {
            config.prefix.clone_from(prefix);
        }
        if let Commands::Install {
            jobs, keep_going, ..
        } = &self.command
        {
            if let Some(jobs) = jobs {
                config.concurrency = (*jobs).max(1);
            }
            if *keep_going {
                config.unpack_failure = pour_core::UnpackFailurePolicy::Warn;
            }
        }
        config
    }
}
