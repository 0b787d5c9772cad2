//! Core data types shared by every stage of a compatibility run.
//!
//! A run starts from a list of [`PluginDescriptor`]s, resolves each one to
//! an [`ArtifactSelection`], and ends with exactly one [`PackageOutcome`]
//! per descriptor.
//!
//! # Status codes
//!
//! | Status | `status_code` | Meaning |
//! |--------|---------------|---------|
//! | `SKIPPED` | 0 | A result already exists in storage; nothing ran |
//! | `NO DIST` | 1 | No source or compatible binary distribution |
//! | `PASSED` | 0 | The test runner exited successfully |
//! | `FAILED` | non-zero | The test runner failed, timed out or crashed |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One plugin release under test.
///
/// This is also the on-disk format of the plugin index file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Distribution name, e.g. `pytest-xdist`.
    pub name: String,

    /// Release version string exactly as published.
    pub version: String,

    /// One-line summary from the package index.
    #[serde(default)]
    pub description: String,
}

impl PluginDescriptor {
    /// Creates a descriptor from its three parts.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }

    /// Returns `{name}-{version}`, the identity used in progress output.
    pub fn package_id(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// Terminal classification of one package's compatibility run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageStatus {
    /// A result was already stored for this (package, env, framework) triple.
    Skipped,
    /// No usable distribution artifact was found.
    NoDist,
    /// The test runner exited with status 0.
    Passed,
    /// The test runner failed, timed out, or the job crashed while testing.
    Failed,
}

impl PackageStatus {
    /// Returns the label printed in progress lines.
    pub fn label(&self) -> &'static str {
        match self {
            PackageStatus::Skipped => "SKIPPED",
            PackageStatus::NoDist => "NO DIST",
            PackageStatus::Passed => "PASSED",
            PackageStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The result of one package job.
///
/// Outcomes are only built through the constructors below, which keep
/// `status` and `status_code` consistent: `Passed` and `Skipped` carry 0,
/// `NoDist` carries 1 and `Failed` carries a non-zero code.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageOutcome {
    pub name: String,
    pub version: String,
    pub status_code: i32,
    pub status: PackageStatus,
    pub output: String,
    pub description: String,
    pub elapsed: Duration,
}

impl PackageOutcome {
    /// Outcome for a package whose result is already stored.
    pub fn skipped(plugin: &PluginDescriptor, elapsed: Duration) -> Self {
        Self::build(plugin, 0, PackageStatus::Skipped, "Skipped".to_string(), elapsed)
    }

    /// Outcome for a package with no usable distribution.
    pub fn no_dist(plugin: &PluginDescriptor, elapsed: Duration) -> Self {
        Self::build(
            plugin,
            1,
            PackageStatus::NoDist,
            "No source or compatible distribution found".to_string(),
            elapsed,
        )
    }

    /// Outcome for a package that reached the test stage.
    ///
    /// Exit code 0 maps to `Passed`, everything else to `Failed`.
    pub fn tested(
        plugin: &PluginDescriptor,
        status_code: i32,
        output: String,
        elapsed: Duration,
    ) -> Self {
        let status = if status_code == 0 {
            PackageStatus::Passed
        } else {
            PackageStatus::Failed
        };
        Self::build(plugin, status_code, status, output, elapsed)
    }

    fn build(
        plugin: &PluginDescriptor,
        status_code: i32,
        status: PackageStatus,
        output: String,
        elapsed: Duration,
    ) -> Self {
        Self {
            name: plugin.name.clone(),
            version: plugin.version.clone(),
            status_code,
            status,
            output,
            description: plugin.description.clone(),
            elapsed,
        }
    }

    /// Returns `{name}-{version}`.
    pub fn package_id(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// Elapsed wall-clock time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// The kind of a distribution artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// A source distribution (`sdist`), extracted and tested in place.
    Source,
    /// A pre-built wheel (`bdist_wheel`), installed into a fresh directory.
    Binary,
}

/// One downloadable file of a release, as reported by the package index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFile {
    pub url: String,
    pub filename: String,
    /// `sdist`, `bdist_wheel`, `bdist_egg`, ...
    pub packagetype: String,
}

impl ReleaseFile {
    /// Maps the index's package type to an artifact kind we know how to test.
    pub fn kind(&self) -> Option<ArtifactKind> {
        match self.packagetype.as_str() {
            "sdist" => Some(ArtifactKind::Source),
            "bdist_wheel" => Some(ArtifactKind::Binary),
            _ => None,
        }
    }
}

/// A downloaded artifact, private to one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSelection {
    /// Absolute path of the downloaded file.
    pub local_path: std::path::PathBuf,
    /// File name as published.
    pub filename: String,
    pub kind: ArtifactKind,
}
