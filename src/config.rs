//! Configuration loading and schema definitions for plugincompat.
//!
//! Settings come from an optional TOML file (see [`schema`]). Values that
//! are constant for a single run but come from the process environment
//! (framework version, publishing credential, storage URL) are resolved once
//! in the binary and carried in a [`RunConfiguration`], never read from deep
//! inside the library.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not match the schema.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads configuration from a string.
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

/// Loads configuration from `path`, falling back to defaults when the file
/// does not exist.
///
/// A file that exists but fails to parse is still an error.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(
            "Config file {} not found, using defaults",
            path.display()
        );
        Ok(Config::default())
    }
}

/// The two axes of the compatibility matrix, fixed for a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfiguration {
    /// Tox environment naming the interpreter, e.g. `py312`.
    pub tox_env: String,

    /// The pytest version forced into every test environment.
    pub pytest_version: String,
}

impl RunConfiguration {
    pub fn new(tox_env: impl Into<String>, pytest_version: impl Into<String>) -> Self {
        Self {
            tox_env: tox_env.into(),
            pytest_version: pytest_version.into(),
        }
    }
}
