//! In-memory fakes for the index and storage traits (testing only)
//!
//! Compiled for this crate's tests, and for dependents with the `fakes`
//! feature enabled.
//!
//! Provides `MemoryIndex` and `MemoryResultStore`, which satisfy the
//! [`PackageIndex`] and [`ResultStore`] contracts without network access.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::config::RunConfiguration;
use crate::index::{IndexError, IndexResult, PackageIndex};
use crate::package::{PluginDescriptor, ReleaseFile};
use crate::storage::{ResultRecord, ResultStore, StorageError, StorageResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// MemoryIndex
// ---------------------------------------------------------------------------

/// Package index backed by canned plugin lists, releases and file bodies.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    plugins: Vec<PluginDescriptor>,
    releases: HashMap<(String, String), Vec<ReleaseFile>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    downloads: AtomicUsize,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a project to the listing.
    pub fn with_plugin(mut self, plugin: PluginDescriptor) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Sets the files of one release.
    pub fn with_release(mut self, plugin: &PluginDescriptor, files: Vec<ReleaseFile>) -> Self {
        self.releases
            .insert((plugin.name.clone(), plugin.version.clone()), files);
        self
    }

    /// Sets the body served for `url`.
    pub fn with_file(self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.put_file(url, bytes);
        self
    }

    /// Sets the body served for `url` on a shared index.
    pub fn put_file(&self, url: impl Into<String>, bytes: Vec<u8>) {
        lock(&self.files).insert(url.into(), bytes);
    }

    /// Number of successful downloads so far.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageIndex for MemoryIndex {
    async fn list_plugins_matching(&self, prefix: &str) -> IndexResult<Vec<PluginDescriptor>> {
        Ok(self
            .plugins
            .iter()
            .filter(|p| p.name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn release_files(&self, name: &str, version: &str) -> IndexResult<Vec<ReleaseFile>> {
        Ok(self
            .releases
            .get(&(name.to_string(), version.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn download(&self, file: &ReleaseFile) -> IndexResult<Vec<u8>> {
        let bytes = lock(&self.files)
            .get(&file.url)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(file.url.clone()))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(bytes)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ---------------------------------------------------------------------------
// MemoryResultStore
// ---------------------------------------------------------------------------

/// Result store that remembers posted batches.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    /// (name, version, env, pytest) combinations that count as stored.
    stored: Mutex<HashSet<(String, String, String, String)>>,
    posted: Mutex<Vec<(String, Vec<ResultRecord>)>>,
    post_failure: Option<u16>,
    lookup_failure: bool,
    lookups: AtomicUsize,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a result as already stored.
    pub fn with_result(self, plugin: &PluginDescriptor, run: &RunConfiguration) -> Self {
        lock(&self.stored).insert((
            plugin.name.clone(),
            plugin.version.clone(),
            run.tox_env.clone(),
            run.pytest_version.clone(),
        ));
        self
    }

    /// Makes every post fail with HTTP `status`.
    pub fn failing_posts(mut self, status: u16) -> Self {
        self.post_failure = Some(status);
        self
    }

    /// Makes every lookup fail with a transport error.
    pub fn failing_lookups(mut self) -> Self {
        self.lookup_failure = true;
        self
    }

    /// Batches posted so far, each with the secret it was posted with.
    pub fn posted_batches(&self) -> Vec<(String, Vec<ResultRecord>)> {
        lock(&self.posted).clone()
    }

    /// All posted records, in posting order.
    pub fn posted_records(&self) -> Vec<ResultRecord> {
        lock(&self.posted)
            .iter()
            .flat_map(|(_, records)| records.iter().cloned())
            .collect()
    }

    /// Number of `has_result` calls so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn has_result(
        &self,
        plugin: &PluginDescriptor,
        run: &RunConfiguration,
    ) -> StorageResult<bool> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.lookup_failure {
            return Err(StorageError::Http("connection refused".to_string()));
        }
        Ok(lock(&self.stored).contains(&(
            plugin.name.clone(),
            plugin.version.clone(),
            run.tox_env.clone(),
            run.pytest_version.clone(),
        )))
    }

    async fn post_batch(&self, records: &[ResultRecord], secret: &str) -> StorageResult<()> {
        if let Some(status) = self.post_failure {
            return Err(StorageError::Status {
                status,
                url: "memory://results".to_string(),
            });
        }

        let mut stored = lock(&self.stored);
        for record in records {
            stored.insert((
                record.name.clone(),
                record.version.clone(),
                record.env.clone(),
                record.pytest.clone(),
            ));
        }
        lock(&self.posted).push((secret.to_string(), records.to_vec()));
        Ok(())
    }
}
