//! plugincompat: compatibility matrix runner for pytest plugins.
//!
//! This crate downloads every plugin in a plugin list, runs each one's tests
//! under a pinned pytest version in an isolated tox environment, and posts
//! the pass/fail results to a results dashboard.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Index**: Discover plugins and their release files ([`index`])
//! - **Fetch**: Pick and download one artifact per plugin ([`fetch`])
//! - **Archive**: Unpack source distributions ([`archive`])
//! - **Executor**: Run tox against an unpacked package ([`executor`])
//! - **Job**: The per-package pipeline ([`job`])
//! - **Orchestrator**: Bounded-concurrency fan-out of jobs ([`orchestrator`])
//! - **Report**: Progress output and batched publishing ([`report`], [`storage`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use plugincompat::config::{Config, RunConfiguration};
//! use plugincompat::executor::TestExecutor;
//! use plugincompat::fetch::{ArtifactFetcher, TagCompatibility};
//! use plugincompat::index::{PypiIndex, read_plugins_index};
//! use plugincompat::orchestrator::Orchestrator;
//! use plugincompat::report::ConsoleReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let run = RunConfiguration::new("py312", "8.0.0");
//!
//!     let index = Arc::new(PypiIndex::new(&config.index)?);
//!     let fetcher = Arc::new(ArtifactFetcher::new(
//!         index,
//!         Arc::new(TagCompatibility::for_tox_env(&run.tox_env)),
//!     ));
//!     let executor = Arc::new(TestExecutor::new(&config.runner)?);
//!
//!     let plugins = read_plugins_index(&config.run.index_path())?;
//!     let orchestrator =
//!         Orchestrator::new(&config.run, run, fetcher, executor, ConsoleReporter::new());
//!     let summary = orchestrator.run(plugins).await?;
//!     println!("{} passed, {} failed", summary.passed, summary.failed);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod executor;
#[cfg(any(test, feature = "fakes"))]
pub mod fakes;
pub mod fetch;
pub mod index;
pub mod job;
pub mod orchestrator;
pub mod package;
pub mod report;
pub mod storage;

// Re-export commonly used types
pub use config::{Config, RunConfiguration, load_config};
pub use orchestrator::{Orchestrator, RunSummary};
pub use package::{PackageOutcome, PackageStatus, PluginDescriptor};
pub use report::Reporter;
