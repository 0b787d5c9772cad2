//! PyPI package index over the JSON API.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | List projects | `GET {url}/simple/` (PEP 691 JSON) |
//! | Latest release | `GET {url}/pypi/{name}/json` |
//! | Release files | `GET {url}/pypi/{name}/{version}/json` |
//! | Download | `GET {file.url}` |
//!
//! # Rate limiting
//!
//! PyPI answers `429 Too Many Requests` when a client is too eager. Every
//! request made here waits for the `Retry-After` delay (or the configured
//! fallback when the header is missing) and then retries the same request,
//! so callers only observe extra latency.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{IndexError, IndexResult, PackageIndex};
use crate::config::IndexConfig;
use crate::package::{PluginDescriptor, ReleaseFile};

const SIMPLE_JSON: &str = "application/vnd.pypi.simple.v1+json";

#[derive(Deserialize)]
struct SimpleListing {
    projects: Vec<SimpleProject>,
}

#[derive(Deserialize)]
struct SimpleProject {
    name: String,
}

#[derive(Deserialize)]
struct ProjectResponse {
    info: ProjectInfo,
}

#[derive(Deserialize)]
struct ProjectInfo {
    name: String,
    version: String,
    summary: Option<String>,
}

#[derive(Deserialize)]
struct ReleaseResponse {
    urls: Vec<ReleaseFile>,
}

/// A PyPI-compatible index reached over HTTP.
pub struct PypiIndex {
    base_url: String,
    rate_limit_fallback: Duration,
    http_client: reqwest::Client,
}

impl PypiIndex {
    /// Creates an index client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &IndexConfig) -> IndexResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("plugincompat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            rate_limit_fallback: Duration::from_secs(config.rate_limit_fallback_secs),
            http_client,
        })
    }

    /// Sends a GET request, waiting out rate limiting, and returns the
    /// successful response.
    async fn get(&self, url: &str, accept: Option<&str>) -> IndexResult<reqwest::Response> {
        loop {
            let mut request = self.http_client.get(url);
            if let Some(accept) = accept {
                request = request.header(ACCEPT, accept);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let delay = retry_after(&response).unwrap_or(self.rate_limit_fallback);
                warn!(
                    "Rate limited by {}, retrying in {}s",
                    self.base_url,
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if status == StatusCode::NOT_FOUND {
                return Err(IndexError::NotFound(url.to_string()));
            }

            if !status.is_success() {
                return Err(IndexError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            return Ok(response);
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        accept: Option<&str>,
    ) -> IndexResult<T> {
        let response = self.get(url, accept).await?;
        response.json::<T>().await.map_err(|e| IndexError::Malformed {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// Parses a `Retry-After` header given in seconds.
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl PackageIndex for PypiIndex {
    async fn list_plugins_matching(&self, prefix: &str) -> IndexResult<Vec<PluginDescriptor>> {
        let listing_url = format!("{}/simple/", self.base_url);
        let listing: SimpleListing = self.get_json(&listing_url, Some(SIMPLE_JSON)).await?;

        let names: Vec<String> = listing
            .projects
            .into_iter()
            .map(|p| p.name)
            .filter(|name| name.starts_with(prefix))
            .collect();

        info!("Found {} projects matching {:?}", names.len(), prefix);

        let mut plugins = Vec::with_capacity(names.len());
        for name in names {
            let url = format!("{}/pypi/{}/json", self.base_url, name);
            match self.get_json::<ProjectResponse>(&url, None).await {
                Ok(project) => plugins.push(PluginDescriptor::new(
                    project.info.name,
                    project.info.version,
                    project.info.summary.unwrap_or_default(),
                )),
                // Listed but without any release; nothing to test.
                Err(IndexError::NotFound(_)) => {
                    debug!("No releases for {}", name);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(plugins)
    }

    async fn release_files(&self, name: &str, version: &str) -> IndexResult<Vec<ReleaseFile>> {
        let url = format!("{}/pypi/{}/{}/json", self.base_url, name, version);
        let release: ReleaseResponse = self.get_json(&url, None).await?;
        Ok(release.urls)
    }

    async fn download(&self, file: &ReleaseFile) -> IndexResult<Vec<u8>> {
        debug!("Downloading {}", file.url);
        let response = self.get(&file.url, None).await?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}
