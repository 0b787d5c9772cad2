//! Configuration schema definitions for plugincompat.
//!
//! Every section and every field has a default, so an empty file (or no
//! file at all) is a valid configuration.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── RunConfig       - Concurrency, batching, timeouts, plugin list
//! ├── RunnerConfig    - The sandboxed test runner command (tox)
//! ├── IndexConfig     - Package index location, search prefix, blacklist
//! └── StorageConfig   - Result storage / dashboard location
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
///
/// # Example
///
/// ```
/// use plugincompat::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [run]
///     workers = 4
///
///     [storage]
///     url = "http://localhost:5000"
/// "#).unwrap();
///
/// assert_eq!(config.run.workers, 4);
/// assert_eq!(config.run.post_chunks, 10);
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Settings for a compatibility run.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `workers` | 8 |
/// | `post_chunks` | 10 |
/// | `test_timeout_secs` | 300 (5 minutes) |
/// | `index_file` | `index.json` |
/// | `tox_env` | detected from `python3` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Maximum number of packages processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Number of results posted per batch.
    ///
    /// Also sets the safety cap (`post_chunks * 3`) applied when no
    /// publishing credential is available and no explicit limit is given.
    #[serde(default = "default_post_chunks")]
    pub post_chunks: usize,

    /// Wall-clock limit for one package's test run, in seconds.
    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,

    /// JSON list of plugins to test, as written by `update-index`.
    ///
    /// A leading `~` is expanded.
    #[serde(default = "default_index_file")]
    pub index_file: PathBuf,

    /// Tox environment to test under, e.g. `py312`.
    pub tox_env: Option<String>,
}

fn default_workers() -> usize {
    8
}

fn default_post_chunks() -> usize {
    10
}

fn default_test_timeout() -> u64 {
    300 // 5 minutes
}

fn default_index_file() -> PathBuf {
    PathBuf::from("index.json")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            post_chunks: default_post_chunks(),
            test_timeout_secs: default_test_timeout(),
            index_file: default_index_file(),
            tox_env: None,
        }
    }
}

impl RunConfig {
    /// Returns `index_file` with a leading `~` expanded.
    pub fn index_path(&self) -> PathBuf {
        let raw = self.index_file.to_string_lossy();
        PathBuf::from(shellexpand::tilde(&raw).into_owned())
    }
}

/// The sandboxed test runner invocation.
///
/// # Example
///
/// ```toml
/// [runner]
/// command = "python -m tox"
///
/// [runner.env]
/// PIP_DISABLE_PIP_VERSION_CHECK = "1"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Runner command, split with shell quoting rules.
    ///
    /// The result-json, env and force-dep arguments are appended.
    ///
    /// Default: `tox`
    #[serde(default = "default_runner_command")]
    pub command: String,

    /// Extra environment variables for the runner process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_runner_command() -> String {
    "tox".to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: default_runner_command(),
            env: HashMap::new(),
        }
    }
}

/// Package index settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Base URL of a PyPI-compatible index.
    ///
    /// Default: `https://pypi.org`
    #[serde(default = "default_index_url")]
    pub url: String,

    /// Name prefix selecting the plugins to index.
    ///
    /// Default: `pytest-`
    #[serde(default = "default_search")]
    pub search: String,

    /// Project names never written to the plugin index.
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Seconds to wait after a "too many requests" response that does not
    /// say how long to wait.
    ///
    /// Default: 60
    #[serde(default = "default_rate_limit_fallback")]
    pub rate_limit_fallback_secs: u64,
}

fn default_index_url() -> String {
    "https://pypi.org".to_string()
}

fn default_search() -> String {
    "pytest-".to_string()
}

fn default_rate_limit_fallback() -> u64 {
    60
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            search: default_search(),
            blacklist: Vec::new(),
            rate_limit_fallback_secs: default_rate_limit_fallback(),
        }
    }
}

/// Result storage settings.
///
/// `PLUGINCOMPAT_SITE` in the environment overrides `url`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Base URL of the results dashboard.
    ///
    /// When unset, the "already tested" check is skipped and nothing can be
    /// posted.
    pub url: Option<String>,
}
