//! The plugin index file.
//!
//! `index.json` is a sorted JSON array of `{description, name, version}`
//! objects. It is written by `update-index` and read at the start of every
//! run.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::warn;

use crate::package::PluginDescriptor;

/// Reads the plugin list from `path`.
///
/// Repeated name and version pairs are dropped, keeping the first, since
/// each package gets its own working directory named after them.
pub fn read_plugins_index(path: &Path) -> Result<Vec<PluginDescriptor>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plugin index: {}", path.display()))?;

    let plugins: Vec<PluginDescriptor> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse plugin index: {}", path.display()))?;

    let mut seen = HashSet::new();
    Ok(plugins
        .into_iter()
        .filter(|plugin| {
            let first = seen.insert((plugin.name.clone(), plugin.version.clone()));
            if !first {
                warn!("Ignoring duplicate {} in {}", plugin.package_id(), path.display());
            }
            first
        })
        .collect())
}

/// Writes `plugins` to `path` as pretty JSON with sorted keys.
///
/// Returns `true` if the file was written, `false` if its contents were
/// already identical.
pub fn write_plugins_index(path: &Path, plugins: &[PluginDescriptor]) -> Result<bool> {
    // Going through `Value` sorts object keys.
    let value = serde_json::to_value(plugins).context("Failed to serialize plugin index")?;
    let contents = serde_json::to_string_pretty(&value).context("Failed to serialize plugin index")?;

    let current = if path.is_file() {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plugin index: {}", path.display()))?
    } else {
        String::new()
    };

    if contents == current {
        return Ok(false);
    }

    std::fs::write(path, contents)
        .with_context(|| format!("Failed to write plugin index: {}", path.display()))?;
    Ok(true)
}

/// Keeps only the newest version of each plugin, sorted by name.
///
/// Versions are compared loosely: numeric parts numerically, other parts as
/// text. Among equal versions the last one seen wins.
pub fn latest_versions(plugins: impl IntoIterator<Item = PluginDescriptor>) -> Vec<PluginDescriptor> {
    let mut latest: BTreeMap<String, PluginDescriptor> = BTreeMap::new();

    for plugin in plugins {
        match latest.get(&plugin.name) {
            Some(current)
                if compare_versions(&plugin.version, &current.version) == Ordering::Less => {}
            _ => {
                latest.insert(plugin.name.clone(), plugin);
            }
        }
    }

    latest.into_values().collect()
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum VersionPart {
    Text(String),
    Number(u64),
}

static VERSION_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+|[A-Za-z]+").expect("valid version regex"));

fn version_parts(version: &str) -> Vec<VersionPart> {
    VERSION_PART
        .find_iter(version)
        .map(|m| match m.as_str().parse::<u64>() {
            Ok(n) => VersionPart::Number(n),
            Err(_) => VersionPart::Text(m.as_str().to_ascii_lowercase()),
        })
        .collect()
}

/// Compares two version strings loosely.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    version_parts(a).cmp(&version_parts(b))
}
