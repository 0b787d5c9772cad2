//! Live progress output in the terminal.
//!
//! Each finished package prints one line:
//!
//! ```text
//! pytest-xdist-3.5.0                                                    PASSED  12.3s [% 42]
//! ```
//!
//! The percentage is `completed * 100 / total` with integer division.

use std::sync::Mutex;

use async_trait::async_trait;
use console::{StyledObject, style};

use super::Reporter;
use crate::package::{PackageOutcome, PackageStatus};

/// Formats the progress line for `outcome`, without colors.
pub fn format_progress_line(outcome: &PackageOutcome, completed: usize, total: usize) -> String {
    format!(
        "{:<60} {:>15}{:>6.1}s [%{:>3}]",
        outcome.package_id(),
        outcome.status.label(),
        outcome.elapsed_secs(),
        percent(completed, total)
    )
}

fn percent(completed: usize, total: usize) -> usize {
    if total == 0 {
        return 0;
    }
    completed * 100 / total
}

fn styled_status(status: PackageStatus) -> StyledObject<String> {
    let label = format!("{:>15}", status.label());
    match status {
        PackageStatus::Skipped => style(label).yellow(),
        PackageStatus::NoDist => style(label).magenta(),
        PackageStatus::Passed => style(label).green(),
        PackageStatus::Failed => style(label).red(),
    }
}

/// Console reporter that shows progress in the terminal.
pub struct ConsoleReporter {
    progress: Mutex<Option<indicatif::ProgressBar>>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            progress: Mutex::new(None),
        }
    }

    fn render(outcome: &PackageOutcome, completed: usize, total: usize) -> String {
        format!(
            "{:<60} {}{} {}",
            outcome.package_id(),
            styled_status(outcome.status),
            style(format!("{:>6.1}s", outcome.elapsed_secs())).cyan(),
            style(format!("[%{:>3}]", percent(completed, total))).cyan().bright()
        )
    }

    fn print(&self, line: String) {
        let progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        match progress.as_ref() {
            Some(pb) if !pb.is_hidden() => pb.println(line),
            _ => println!("{line}"),
        }
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_run_start(&self, total: usize, workers: usize) {
        println!("Processing {} packages with {} workers", total, workers);

        let pb = indicatif::ProgressBar::new(total as u64);
        if let Ok(progress_style) = indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")
        {
            pb.set_style(progress_style.progress_chars("#>-"));
        }

        *self.progress.lock().unwrap_or_else(|e| e.into_inner()) = Some(pb);
    }

    async fn on_package_complete(&self, outcome: &PackageOutcome, completed: usize, total: usize) {
        let line = if console::colors_enabled() {
            Self::render(outcome, completed, total)
        } else {
            format_progress_line(outcome, completed, total)
        };
        self.print(line);
        if let Some(pb) = self
            .progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            pb.inc(1);
        }
    }

    async fn on_run_complete(&self, total_posted: usize) {
        if let Some(pb) = self
            .progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            pb.finish_and_clear();
        }

        println!();
        if total_posted > 0 {
            println!("{}", style(format!("Posted {} new results", total_posted)).green());
        }
        println!("{}", style("All done, congratulations :)").green().bold());
    }
}
