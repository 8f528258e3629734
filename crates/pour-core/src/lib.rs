//! Core library for pour: formula index lookup, dependency resolution,
//! bounded bottle fetching and materialization into a cellar.

pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod materialize;
pub mod orchestrator;
pub mod platform;
pub mod registry;
pub mod resolver;

pub mod reporter;

#[cfg(test)]
mod test_support;

pub use cache::{CacheKey, CacheStore};
pub use config::{Config, UnpackFailurePolicy};
pub use error::{Error, Result, Stage};
pub use index::{IndexLocator, LookupStrategy};
pub use orchestrator::{InstallOptions, InstallReport, Installed, Installer, SchedulePolicy};
pub use registry::Registry;
pub use reporter::{NullReporter, Reporter, TracingReporter};
pub use resolver::{EdgeSource, InstallGraph, ResolveStrategy, Resolver};

/// User Agent string sent with every request
pub const USER_AGENT: &str = concat!("pour/", env!("CARGO_PKG_VERSION"));
