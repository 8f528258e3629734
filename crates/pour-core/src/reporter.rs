//! Reporter trait for dependency injection
//!
//! Install telemetry flows through a `Reporter` handed to the
//! [`Installer`](crate::Installer) at construction, so the caller decides
//! where events go and when the sink is torn down.

use std::path::Path;
use std::time::Duration;

use crate::error::Stage;

/// Receives install progress events.
pub trait Reporter: Send + Sync {
    /// A stage of a formula's pipeline has started.
    fn stage_started(&self, stage: Stage, formula: &str);

    /// A stage of a formula's pipeline completed successfully.
    fn stage_finished(&self, stage: Stage, formula: &str, elapsed: Duration);

    /// A cache entry satisfied a fetch without touching the network.
    fn cache_hit(&self, path: &Path);

    /// A non-fatal problem.
    fn warning(&self, msg: &str);

    /// Final summary of an install.
    fn summary(&self, count: usize, elapsed: Duration);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn stage_started(&self, stage: Stage, formula: &str) {
        (**self).stage_started(stage, formula);
    }
    fn stage_finished(&self, stage: Stage, formula: &str, elapsed: Duration) {
        (**self).stage_finished(stage, formula, elapsed);
    }
    fn cache_hit(&self, path: &Path) {
        (**self).cache_hit(path);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn summary(&self, count: usize, elapsed: Duration) {
        (**self).summary(count, elapsed);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn stage_started(&self, _: Stage, _: &str) {}
    fn stage_finished(&self, _: Stage, _: &str, _: Duration) {}
    fn cache_hit(&self, _: &Path) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: usize, _: Duration) {}
}

/// Forwards every event to `tracing`.
#[derive(Debug, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn stage_started(&self, stage: Stage, formula: &str) {
        tracing::debug!(%stage, formula, "stage started");
    }

    fn stage_finished(&self, stage: Stage, formula: &str, elapsed: Duration) {
        tracing::info!(%stage, formula, elapsed_ms = elapsed.as_millis() as u64, "stage finished");
    }

    fn cache_hit(&self, path: &Path) {
        tracing::debug!(path = %path.display(), "cache hit");
    }

    fn warning(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    fn summary(&self, count: usize, elapsed: Duration) {
        tracing::info!(count, elapsed_secs = elapsed.as_secs_f64(), "install complete");
    }
}
