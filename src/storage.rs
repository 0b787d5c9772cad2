//! Result storage (the compatibility dashboard).
//!
//! The dashboard exposes two operations used by a run:
//!
//! - `GET {base}/output/{name}-{version}?py={env}&pytest={version}` answers
//!   200 when a result for that combination is already stored.
//! - `POST {base}` with `{"secret": ..., "results": [...]}` stores a batch.
//!
//! Anything other than a 2xx on POST is a hard error: losing results
//! silently is worse than stopping the run.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RunConfiguration;
use crate::package::{PackageOutcome, PluginDescriptor};

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors talking to the result storage service.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The request could not be sent or the response could not be read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The service answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status { status: u16, url: String },
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Http(err.to_string())
    }
}

/// One stored compatibility result, in the dashboard's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub name: String,
    pub version: String,
    /// Tox environment, e.g. `py312`.
    pub env: String,
    /// pytest version the plugin was tested against.
    pub pytest: String,
    /// `ok` or `fail`.
    pub status: String,
    pub output: String,
    pub description: String,
}

impl ResultRecord {
    /// Builds the record posted for `outcome`.
    pub fn from_outcome(outcome: &PackageOutcome, run: &RunConfiguration) -> Self {
        let status = if outcome.status_code == 0 { "ok" } else { "fail" };
        Self {
            name: outcome.name.clone(),
            version: outcome.version.clone(),
            env: run.tox_env.clone(),
            pytest: run.pytest_version.clone(),
            status: status.to_string(),
            output: outcome.output.clone(),
            description: outcome.description.clone(),
        }
    }
}

#[derive(Serialize)]
struct PostBody<'a> {
    secret: &'a str,
    results: &'a [ResultRecord],
}

/// Where results are looked up and published.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Returns whether a result for this plugin release under `run` is
    /// already stored.
    async fn has_result(
        &self,
        plugin: &PluginDescriptor,
        run: &RunConfiguration,
    ) -> StorageResult<bool>;

    /// Stores a batch of results.
    async fn post_batch(&self, records: &[ResultRecord], secret: &str) -> StorageResult<()>;
}

/// The dashboard reached over HTTP.
pub struct HttpResultStore {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpResultStore {
    /// Creates a client for the dashboard at `base_url`.
    pub fn new(base_url: impl Into<String>) -> StorageResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("plugincompat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.into(),
            http_client,
        })
    }

    fn output_url(&self, plugin: &PluginDescriptor) -> String {
        format!(
            "{}/output/{}-{}",
            self.base_url.trim_end_matches('/'),
            plugin.name,
            plugin.version
        )
    }
}

#[async_trait]
impl ResultStore for HttpResultStore {
    async fn has_result(
        &self,
        plugin: &PluginDescriptor,
        run: &RunConfiguration,
    ) -> StorageResult<bool> {
        let url = self.output_url(plugin);
        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("py", run.tox_env.as_str()),
                ("pytest", run.pytest_version.as_str()),
            ])
            .send()
            .await?;

        debug!("{} -> {}", url, response.status());
        Ok(response.status() == StatusCode::OK)
    }

    async fn post_batch(&self, records: &[ResultRecord], secret: &str) -> StorageResult<()> {
        let body = PostBody {
            secret,
            results: records,
        };
        let response = self
            .http_client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Status {
                status: status.as_u16(),
                url: self.base_url.clone(),
            });
        }

        Ok(())
    }
}
