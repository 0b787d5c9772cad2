//! Reporting of package outcomes.
//!
//! Two independent consumers see every completed [`PackageOutcome`]:
//!
//! - a [`Reporter`] renders live progress (see [`console`]);
//! - the [`BatchReporter`] (see [`batch`]) publishes results to storage.

pub mod batch;
pub mod console;

use async_trait::async_trait;

use crate::package::PackageOutcome;

pub use batch::{BatchReporter, Publisher};
pub use console::{ConsoleReporter, format_progress_line};

/// A progress reporter receives events during a compatibility run.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once before any job starts.
    async fn on_run_start(&self, total: usize, workers: usize);

    /// Called for each finished package, in completion order.
    ///
    /// `completed` counts this package.
    async fn on_package_complete(&self, outcome: &PackageOutcome, completed: usize, total: usize);

    /// Called after the last package and the final flush.
    async fn on_run_complete(&self, total_posted: usize);
}

/// A reporter that does nothing (for testing or when output is not needed).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_run_start(&self, _total: usize, _workers: usize) {}
    async fn on_package_complete(&self, _outcome: &PackageOutcome, _completed: usize, _total: usize) {}
    async fn on_run_complete(&self, _total_posted: usize) {}
}
