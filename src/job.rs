//! The per-package pipeline.
//!
//! A [`PackageJob`] walks one plugin release through a fixed sequence of
//! states and always ends with exactly one [`PackageOutcome`]:
//!
//! ```text
//! CheckCache ──cached──────────────────────────────────▶ SKIPPED
//!     │
//!     ▼
//!   Fetch ──no artifact────────────────────────────────▶ NO DIST
//!     │
//!     ▼
//!  Extract ──unsupported format──▶ error (aborts the run)
//!     │
//!     ▼
//!   Test ──exit 0──▶ PASSED
//!        └─non-zero, timeout, crash──▶ FAILED
//! ```
//!
//! Only an unsupported archive format escapes as an error; every other
//! per-package problem is folded into a `FAILED` outcome so the rest of the
//! batch keeps running.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::archive::{self, ArchiveError};
use crate::config::RunConfiguration;
use crate::executor::{RunMode, TestExecutor};
use crate::fetch::ArtifactFetcher;
use crate::package::{ArtifactKind, PackageOutcome, PluginDescriptor};
use crate::storage::ResultStore;

/// Output of a test run that exceeded the deadline.
pub const TIMEOUT_OUTPUT: &str = "tox run timed out";

/// Everything a job needs that is shared across the run.
pub struct JobContext {
    pub fetcher: Arc<ArtifactFetcher>,
    pub executor: Arc<TestExecutor>,
    /// Consulted before fetching; `None` disables the "already tested" check.
    pub cache: Option<Arc<dyn ResultStore>>,
    pub run: RunConfiguration,
    pub test_timeout: Duration,
    /// Shared scratch directory; each job works in its own subdirectory.
    pub scratch_root: PathBuf,
}

/// Pipeline stage, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    CheckCache,
    Fetch,
    Extract,
    Test,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::CheckCache => "check-cache",
            JobState::Fetch => "fetch",
            JobState::Extract => "extract",
            JobState::Test => "test",
        };
        f.write_str(name)
    }
}

/// One plugin release on its way to an outcome.
pub struct PackageJob {
    plugin: PluginDescriptor,
    context: Arc<JobContext>,
}

impl PackageJob {
    pub fn new(plugin: PluginDescriptor, context: Arc<JobContext>) -> Self {
        Self { plugin, context }
    }

    fn enter(&self, state: JobState) {
        debug!("{}: {}", self.plugin.package_id(), state);
    }

    /// Runs the job to completion.
    ///
    /// Elapsed time is measured from the call, whatever state ends the job.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::UnsupportedArchiveFormat`] (wrapped) when the
    /// selected artifact is not a known archive type.
    pub async fn run(self) -> Result<PackageOutcome> {
        let start = Instant::now();
        let ctx = &self.context;
        let plugin = &self.plugin;

        self.enter(JobState::CheckCache);
        if let Some(cache) = &ctx.cache {
            match cache.has_result(plugin, &ctx.run).await {
                Ok(true) => return Ok(PackageOutcome::skipped(plugin, start.elapsed())),
                Ok(false) => {}
                Err(e) => debug!(
                    "Cache check for {} failed, testing anyway: {}",
                    plugin.package_id(),
                    e
                ),
            }
        }

        let job_dir = ctx.scratch_root.join(plugin.package_id());

        self.enter(JobState::Fetch);
        let fetched = match tokio::fs::create_dir_all(&job_dir)
            .await
            .with_context(|| format!("Failed to create {}", job_dir.display()))
        {
            Ok(()) => ctx.fetcher.fetch(plugin, &job_dir).await,
            Err(e) => Err(e),
        };

        let selection = match fetched {
            Ok(Some(selection)) => selection,
            Ok(None) => return Ok(PackageOutcome::no_dist(plugin, start.elapsed())),
            Err(e) => {
                warn!("Fetching {} failed: {:#}", plugin.package_id(), e);
                return Ok(self.finish(1, format!("fetch failed:\n{e:#}"), start));
            }
        };

        self.enter(JobState::Extract);
        let mode = match selection.kind {
            ArtifactKind::Binary => RunMode::Binary {
                wheel_filename: selection.filename.clone(),
            },
            ArtifactKind::Source => RunMode::Source,
        };
        let target = match archive::extract_async(selection.local_path.clone(), job_dir).await {
            Ok(target) => target,
            Err(e) => {
                if let Some(ArchiveError::UnsupportedArchiveFormat(_)) =
                    e.downcast_ref::<ArchiveError>()
                {
                    return Err(e);
                }
                return Ok(self.finish(1, format!("traceback:\n{e:?}"), start));
            }
        };

        self.enter(JobState::Test);
        let tested = tokio::time::timeout(
            ctx.test_timeout,
            ctx.executor.run(&target, &ctx.run, &mode),
        )
        .await;

        let (status_code, output) = match tested {
            Ok(Ok(result)) => (result.exit_code, result.output),
            Ok(Err(e)) => (1, format!("traceback:\n{e:?}")),
            Err(_) => {
                warn!(
                    "Test run of {} exceeded {:?}",
                    plugin.package_id(),
                    ctx.test_timeout
                );
                (1, TIMEOUT_OUTPUT.to_string())
            }
        };

        Ok(self.finish(status_code, output, start))
    }

    /// Builds the outcome of a job that reached the test stage, appending
    /// the elapsed-time footer.
    fn finish(&self, status_code: i32, mut output: String, start: Instant) -> PackageOutcome {
        output.push_str(&format!(
            "\n\nTime: {:.1} seconds",
            start.elapsed().as_secs_f64()
        ));
        PackageOutcome::tested(&self.plugin, status_code, output, start.elapsed())
    }
}
