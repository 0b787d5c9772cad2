//! Batched publishing of results to storage.
//!
//! Outcomes accumulate in a pending batch that is posted once it reaches
//! the batch size, and once more at the end of the run for the remainder.
//! `SKIPPED` outcomes are never posted: storage already has them.
//!
//! Without a publishing credential nothing is sent. That is the normal mode
//! for local and pull-request runs, so it is logged rather than treated as
//! a failure.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::RunConfiguration;
use crate::package::{PackageOutcome, PackageStatus};
use crate::storage::{ResultRecord, ResultStore, StorageResult};

/// Where batches go, together with the credential that authorizes them.
pub struct Publisher {
    pub store: Arc<dyn ResultStore>,
    pub secret: String,
}

impl Publisher {
    pub fn new(store: Arc<dyn ResultStore>, secret: impl Into<String>) -> Self {
        Self {
            store,
            secret: secret.into(),
        }
    }
}

#[derive(Default)]
struct BatchState {
    pending: Vec<PackageOutcome>,
    total_posted: usize,
}

/// Accumulates outcomes and posts them in batches.
///
/// `record`, `flush` and `finalize` may be called from several tasks; the
/// pending batch is guarded by one lock that is held across the post, so
/// batch membership and the size check never race.
pub struct BatchReporter {
    run: RunConfiguration,
    batch_size: usize,
    publisher: Option<Publisher>,
    state: Mutex<BatchState>,
}

impl BatchReporter {
    /// Creates a reporter; `publisher` is `None` when no credential is
    /// available.
    pub fn new(run: RunConfiguration, batch_size: usize, publisher: Option<Publisher>) -> Self {
        Self {
            run,
            batch_size: batch_size.max(1),
            publisher,
            state: Mutex::new(BatchState::default()),
        }
    }

    /// Adds an outcome, posting the batch if it is full.
    ///
    /// # Errors
    ///
    /// Returns the storage error if a triggered post fails.
    pub async fn record(&self, outcome: PackageOutcome) -> StorageResult<()> {
        if outcome.status == PackageStatus::Skipped {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        state.pending.push(outcome);
        if state.pending.len() >= self.batch_size {
            self.flush_locked(&mut state).await?;
        }
        Ok(())
    }

    /// Posts the pending batch, if any.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the post fails. The batch is kept so
    /// nothing is lost silently.
    pub async fn flush(&self) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    /// Posts any remainder and returns the number of results posted during
    /// the whole run.
    pub async fn finalize(&self) -> StorageResult<usize> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await?;
        Ok(state.total_posted)
    }

    /// Results successfully posted so far.
    pub async fn total_posted(&self) -> usize {
        self.state.lock().await.total_posted
    }

    async fn flush_locked(&self, state: &mut BatchState) -> StorageResult<()> {
        if state.pending.is_empty() {
            return Ok(());
        }

        let n = state.pending.len();
        let Some(publisher) = &self.publisher else {
            info!(
                "Skipping posting batch of {} because secret is not available",
                n
            );
            state.pending.clear();
            return Ok(());
        };

        let mut records: Vec<ResultRecord> = state
            .pending
            .iter()
            .map(|outcome| ResultRecord::from_outcome(outcome, &self.run))
            .collect();
        records.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));

        if let Err(e) = publisher.store.post_batch(&records, &publisher.secret).await {
            warn!("Posting batch of {} failed: {}", n, e);
            return Err(e);
        }

        info!("Batch of {} posted", n);
        state.pending.clear();
        state.total_posted += n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryResultStore;
    use crate::package::PluginDescriptor;
    use crate::storage::StorageError;
    use std::time::Duration;

    fn run() -> RunConfiguration {
        RunConfiguration::new("py310", "1.2.3")
    }

    fn tested(name: &str, code: i32) -> PackageOutcome {
        let plugin = PluginDescriptor::new(name, "1.0", "desc");
        PackageOutcome::tested(&plugin, code, "output".into(), Duration::ZERO)
    }

    fn publishing(store: &Arc<MemoryResultStore>, batch_size: usize) -> BatchReporter {
        BatchReporter::new(
            run(),
            batch_size,
            Some(Publisher::new(store.clone(), "ILIKETURTLES")),
        )
    }

    #[tokio::test]
    async fn test_flushes_when_full_and_on_finalize() {
        let store = Arc::new(MemoryResultStore::new());
        let reporter = publishing(&store, 2);

        reporter.record(tested("pytest-a", 0)).await.unwrap();
        assert!(store.posted_batches().is_empty());

        reporter.record(tested("pytest-b", 1)).await.unwrap();
        assert_eq!(store.posted_batches().len(), 1);

        reporter.record(tested("pytest-c", 0)).await.unwrap();
        assert_eq!(store.posted_batches().len(), 1);

        assert_eq!(reporter.finalize().await.unwrap(), 3);

        let batches = store.posted_batches();
        assert_eq!(batches.len(), 2);
        let names = |i: usize| {
            batches[i]
                .1
                .iter()
                .map(|r| r.name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(0), vec!["pytest-a", "pytest-b"]);
        assert_eq!(names(1), vec!["pytest-c"]);
        assert_eq!(batches[0].0, "ILIKETURTLES");
        assert_eq!(batches[0].1[1].status, "fail");
    }

    #[tokio::test]
    async fn test_skipped_outcomes_are_not_posted() {
        let store = Arc::new(MemoryResultStore::new());
        let reporter = publishing(&store, 1);
        let plugin = PluginDescriptor::new("pytest-c", "1.0", "d");

        reporter
            .record(PackageOutcome::skipped(&plugin, Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(reporter.finalize().await.unwrap(), 0);
        assert!(store.posted_batches().is_empty());
    }

    #[tokio::test]
    async fn test_without_secret_nothing_is_sent() {
        let reporter = BatchReporter::new(run(), 2, None);

        reporter.record(tested("pytest-a", 0)).await.unwrap();
        reporter.record(tested("pytest-b", 0)).await.unwrap();
        reporter.record(tested("pytest-c", 0)).await.unwrap();

        assert_eq!(reporter.finalize().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_explicit_flush_posts_partial_batch() {
        let store = Arc::new(MemoryResultStore::new());
        let reporter = publishing(&store, 10);

        reporter.record(tested("pytest-a", 0)).await.unwrap();
        reporter.flush().await.unwrap();

        assert_eq!(store.posted_batches().len(), 1);
        assert_eq!(reporter.total_posted().await, 1);
        assert_eq!(reporter.finalize().await.unwrap(), 1);
        assert_eq!(store.posted_batches().len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let store = Arc::new(MemoryResultStore::new());
        let reporter = publishing(&store, 10);

        assert_eq!(reporter.finalize().await.unwrap(), 0);
        reporter.record(tested("pytest-a", 0)).await.unwrap();
        assert_eq!(reporter.finalize().await.unwrap(), 1);
        assert_eq!(reporter.finalize().await.unwrap(), 1);
        assert_eq!(store.posted_batches().len(), 1);
    }

    #[tokio::test]
    async fn test_post_failure_propagates() {
        let store = Arc::new(MemoryResultStore::new().failing_posts(503));
        let reporter = publishing(&store, 1);

        let err = reporter.record(tested("pytest-a", 0)).await.unwrap_err();
        assert!(matches!(err, StorageError::Status { status: 503, .. }));
        assert_eq!(reporter.total_posted().await, 0);
    }

    #[tokio::test]
    async fn test_records_sorted_within_batch() {
        let store = Arc::new(MemoryResultStore::new());
        let reporter = publishing(&store, 3);

        reporter.record(tested("pytest-z", 0)).await.unwrap();
        reporter.record(tested("pytest-m", 0)).await.unwrap();
        reporter.record(tested("pytest-a", 0)).await.unwrap();

        let names: Vec<String> = store.posted_records().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["pytest-a", "pytest-m", "pytest-z"]);
    }
}
