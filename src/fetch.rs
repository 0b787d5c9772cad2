//! Artifact selection and download.
//!
//! For each plugin release the fetcher picks one file to test:
//!
//! 1. the first source distribution the index lists, else
//! 2. the first wheel that is compatible with the tested interpreter, else
//! 3. nothing, and the package is reported as `NO DIST`.
//!
//! Wheels whose filename cannot be parsed are treated as incompatible.

pub mod wheel;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::sync::Mutex;
use tracing::debug;

use crate::index::PackageIndex;
use crate::package::{ArtifactKind, ArtifactSelection, PluginDescriptor, ReleaseFile};

pub use wheel::{Compatibility, TagCompatibility, WheelNameError, WheelTags};

/// Picks and downloads the artifact to test for a plugin release.
///
/// One fetcher is shared by all jobs of a run. Writes of downloaded
/// artifacts to disk are serialized through a single lock.
pub struct ArtifactFetcher {
    index: Arc<dyn PackageIndex>,
    compatibility: Arc<dyn Compatibility>,
    write_lock: Mutex<()>,
}

impl ArtifactFetcher {
    pub fn new(index: Arc<dyn PackageIndex>, compatibility: Arc<dyn Compatibility>) -> Self {
        Self {
            index,
            compatibility,
            write_lock: Mutex::new(()),
        }
    }

    /// Downloads the best artifact of `plugin` into `dest_dir`.
    ///
    /// Returns `Ok(None)` when the release has neither a source
    /// distribution nor a compatible wheel.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried, the download fails,
    /// or the file cannot be written.
    pub async fn fetch(
        &self,
        plugin: &PluginDescriptor,
        dest_dir: &Path,
    ) -> Result<Option<ArtifactSelection>> {
        let files = self
            .index
            .release_files(&plugin.name, &plugin.version)
            .await
            .with_context(|| format!("Failed to list release files of {}", plugin.package_id()))?;

        let Some((file, kind)) = select_artifact(&files, self.compatibility.as_ref()) else {
            debug!("No usable distribution for {}", plugin.package_id());
            return Ok(None);
        };

        // Never let a published filename escape the job directory.
        let filename = Path::new(&file.filename)
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| anyhow!("Invalid artifact filename: {:?}", file.filename))?
            .to_string();

        let bytes = self
            .index
            .download(file)
            .await
            .with_context(|| format!("Failed to download {}", file.url))?;

        let local_path = dest_dir.join(&filename);
        {
            let _guard = self.write_lock.lock().await;
            tokio::fs::write(&local_path, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", local_path.display()))?;
        }

        debug!(
            "Downloaded {} ({} bytes) for {} from {}",
            filename,
            bytes.len(),
            plugin.package_id(),
            self.index.name()
        );

        Ok(Some(ArtifactSelection {
            local_path,
            filename,
            kind,
        }))
    }
}

/// Applies the selection policy to a release's files.
pub fn select_artifact<'a>(
    files: &'a [ReleaseFile],
    compatibility: &dyn Compatibility,
) -> Option<(&'a ReleaseFile, ArtifactKind)> {
    if let Some(sdist) = files
        .iter()
        .find(|f| f.kind() == Some(ArtifactKind::Source))
    {
        return Some((sdist, ArtifactKind::Source));
    }

    files
        .iter()
        .filter(|f| f.kind() == Some(ArtifactKind::Binary))
        .find(|f| {
            compatibility
                .is_compatible(&f.filename)
                .unwrap_or_else(|e| {
                    debug!("{}", e);
                    false
                })
        })
        .map(|f| (f, ArtifactKind::Binary))
}
