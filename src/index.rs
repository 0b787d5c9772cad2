//! Package index abstraction.
//!
//! The index is where plugins are discovered and where their release
//! artifacts are downloaded from. The core only talks to it through the
//! [`PackageIndex`] trait, so tests can substitute an in-memory index
//! (see the `fakes` module, behind the `fakes` feature).
//!
//! # Implementations
//!
//! | Index | Module | Description |
//! |-------|--------|-------------|
//! | PyPI | [`pypi`] | PyPI JSON API over HTTP, with rate-limit retry |
//! | Memory | `fakes` (feature `fakes`) | Canned releases for tests |

pub mod file;
pub mod pypi;

use async_trait::async_trait;

use crate::package::{PluginDescriptor, ReleaseFile};

pub use file::{latest_versions, read_plugins_index, write_plugins_index};
pub use pypi::PypiIndex;

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors returned by a package index.
///
/// Rate limiting is not an error: implementations wait and retry it
/// themselves.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The request could not be sent or the response could not be read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The index answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status { status: u16, url: String },

    /// The response body did not have the expected shape.
    #[error("Malformed index response from {url}: {message}")]
    Malformed { url: String, message: String },

    /// The requested project or release does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for IndexError {
    fn from(err: reqwest::Error) -> Self {
        IndexError::Http(err.to_string())
    }
}

/// A source of plugins and their release artifacts.
#[async_trait]
pub trait PackageIndex: Send + Sync {
    /// Lists every project whose name starts with `prefix`, each with its
    /// latest version and summary.
    ///
    /// The same name may appear more than once; callers reduce the list with
    /// [`latest_versions`].
    async fn list_plugins_matching(&self, prefix: &str) -> IndexResult<Vec<PluginDescriptor>>;

    /// Lists the downloadable files of one release, in index order.
    async fn release_files(&self, name: &str, version: &str) -> IndexResult<Vec<ReleaseFile>>;

    /// Downloads the bytes of one release file.
    async fn download(&self, file: &ReleaseFile) -> IndexResult<Vec<u8>>;

    /// Index name, for logging.
    fn name(&self) -> &str;
}

/// Lists the latest release of every plugin matching `search`, sorted by
/// name, leaving out blacklisted names.
pub async fn list_latest_versions(
    index: &dyn PackageIndex,
    search: &str,
    blacklist: &[String],
) -> IndexResult<Vec<PluginDescriptor>> {
    let plugins = index
        .list_plugins_matching(search)
        .await?
        .into_iter()
        .filter(|p| !blacklist.iter().any(|b| b == &p.name));

    Ok(latest_versions(plugins))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryIndex;

    #[tokio::test]
    async fn test_list_latest_versions_applies_blacklist() {
        let index = MemoryIndex::new()
            .with_plugin(PluginDescriptor::new("pytest-plugin-a", "1.0", "a"))
            .with_plugin(PluginDescriptor::new("pytest-plugin-b", "1.0", "b"))
            .with_plugin(PluginDescriptor::new("pytest-plugin-b", "1.2", "b2"))
            .with_plugin(PluginDescriptor::new("other-package", "3.0", "x"));

        let plugins = list_latest_versions(&index, "pytest-", &["pytest-plugin-a".to_string()])
            .await
            .unwrap();

        assert_eq!(
            plugins,
            vec![PluginDescriptor::new("pytest-plugin-b", "1.2", "b2")]
        );
    }
}
