//! plugincompat CLI - Compatibility matrix runner for pytest plugins.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{Level, debug, info};
use tracing_subscriber::FmtSubscriber;

use plugincompat::config::{self, RunConfiguration};
use plugincompat::executor::TestExecutor;
use plugincompat::fetch::{ArtifactFetcher, TagCompatibility};
use plugincompat::index::{self, PypiIndex};
use plugincompat::orchestrator::{Orchestrator, effective_limit};
use plugincompat::report::{ConsoleReporter, Publisher};
use plugincompat::storage::HttpResultStore;

/// Environment variable holding the publishing credential.
const SECRET_ENV: &str = "POST_KEY";

#[derive(Parser)]
#[command(name = "plugincompat")]
#[command(about = "Compatibility matrix runner for pytest plugins", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "plugincompat.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test every plugin in the index file and publish the results
    Run {
        /// Test at most this many plugins
        #[arg(long)]
        limit: Option<usize>,

        /// Override the number of concurrent packages
        #[arg(long)]
        workers: Option<usize>,

        /// Override the number of results posted per batch
        #[arg(long)]
        post_chunks: Option<usize>,

        /// pytest version to test against
        #[arg(long, env = "PYTEST_VERSION")]
        pytest_version: String,

        /// Results dashboard URL (overrides storage.url)
        #[arg(long, env = "PLUGINCOMPAT_SITE")]
        site: Option<String>,

        /// Publishing credential
        #[arg(long, env = SECRET_ENV, hide = true, hide_env_values = true)]
        post_key: Option<String>,
    },

    /// Refresh the index file from the package index
    UpdateIndex,

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            limit,
            workers,
            post_chunks,
            pytest_version,
            site,
            post_key,
        } => {
            run_plugins(
                &cli.config,
                RunOverrides {
                    limit,
                    workers,
                    post_chunks,
                },
                pytest_version,
                site,
                post_key,
            )
            .await
        }
        Commands::UpdateIndex => update_index(&cli.config).await,
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(&cli.config),
    }
}

struct RunOverrides {
    limit: Option<usize>,
    workers: Option<usize>,
    post_chunks: Option<usize>,
}

async fn run_plugins(
    config_path: &Path,
    overrides: RunOverrides,
    pytest_version: String,
    site: Option<String>,
    secret: Option<String>,
) -> Result<()> {
    let mut config = config::load_or_default(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if let Some(workers) = overrides.workers {
        config.run.workers = workers;
    }
    if let Some(post_chunks) = overrides.post_chunks {
        config.run.post_chunks = post_chunks;
    }

    let tox_env = match config.run.tox_env.clone() {
        Some(tox_env) => tox_env,
        None => detect_tox_env().await?,
    };
    let run = RunConfiguration::new(tox_env, pytest_version);
    info!(
        "Testing against pytest {} on {}",
        run.pytest_version, run.tox_env
    );

    let storage_url = site.or_else(|| config.storage.url.clone());
    let secret = secret.filter(|s| !s.is_empty());
    if secret.is_some() && storage_url.is_none() {
        bail!("{SECRET_ENV} is set but no results URL is configured (set PLUGINCOMPAT_SITE or storage.url)");
    }

    let limit = effective_limit(overrides.limit, secret.is_some(), config.run.post_chunks);
    if let (None, Some(forced)) = (overrides.limit, limit) {
        println!(
            "{}",
            console::style(format!("Limit forced to {} since secret is unavail", forced)).cyan()
        );
    }

    let index_path = config.run.index_path();
    let mut plugins = index::read_plugins_index(&index_path)?;
    if let Some(limit) = limit {
        plugins.truncate(limit);
    }

    let package_index = Arc::new(PypiIndex::new(&config.index)?);
    let fetcher = Arc::new(ArtifactFetcher::new(
        package_index,
        Arc::new(TagCompatibility::for_tox_env(&run.tox_env)),
    ));
    let executor = Arc::new(TestExecutor::new(&config.runner)?.without_env(SECRET_ENV));

    let mut orchestrator =
        Orchestrator::new(&config.run, run, fetcher, executor, ConsoleReporter::new());

    if let Some(url) = storage_url {
        let store = Arc::new(HttpResultStore::new(url)?);
        orchestrator = orchestrator.with_cache(store.clone());
        if let Some(secret) = secret {
            orchestrator = orchestrator.with_publisher(Publisher::new(store, secret));
        }
    }

    let summary = orchestrator.run(plugins).await?;
    debug!("Run finished: {:?}", summary);

    Ok(())
}

/// Returns the tox environment of the default `python3`, e.g. `py312`.
async fn detect_tox_env() -> Result<String> {
    let output = tokio::process::Command::new("python3")
        .args(["-c", "import sys; print('py%d%d' % sys.version_info[:2])"])
        .output()
        .await
        .context("Failed to run python3; set run.tox_env in the configuration")?;

    if !output.status.success() {
        bail!("python3 exited with {}; set run.tox_env in the configuration", output.status);
    }

    let tox_env = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if tox_env.is_empty() {
        bail!("python3 printed no version; set run.tox_env in the configuration");
    }
    Ok(tox_env)
}

async fn update_index(config_path: &Path) -> Result<()> {
    let config = config::load_or_default(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let package_index = PypiIndex::new(&config.index)?;
    info!(
        "Listing projects starting with {:?} on {}",
        config.index.search, config.index.url
    );
    let plugins = index::list_latest_versions(
        &package_index,
        &config.index.search,
        &config.index.blacklist,
    )
    .await?;

    let index_path = config.run.index_path();
    if index::write_plugins_index(&index_path, &plugins)? {
        println!("{} updated ({} plugins)", index_path.display(), plugins.len());
    } else {
        println!("{} skipped, no changes", index_path.display());
    }

    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    match config::load_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Workers: {}", config.run.workers);
            println!("  Post chunks: {}", config.run.post_chunks);
            println!("  Test timeout: {}s", config.run.test_timeout_secs);
            println!("  Index file: {}", config.run.index_path().display());
            println!(
                "  Tox env: {}",
                config.run.tox_env.as_deref().unwrap_or("(detected)")
            );
            println!("  Runner: {}", config.runner.command);
            println!("  Package index: {}", config.index.url);
            println!(
                "  Results URL: {}",
                config.storage.url.as_deref().unwrap_or("(none)")
            );

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}

const STARTER_CONFIG: &str = r#"# plugincompat configuration file

[run]
workers = 8
post_chunks = 10
test_timeout_secs = 300
index_file = "index.json"
# tox_env = "py312"

[runner]
command = "tox"

[index]
url = "https://pypi.org"
search = "pytest-"
blacklist = []

[storage]
# url = "https://plugincompat.example.com"
"#;

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit manually.",
            path.display()
        );
        std::process::exit(1);
    }

    std::fs::write(path, STARTER_CONFIG)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  plugincompat update-index");
    println!("  PYTEST_VERSION=8.0.0 plugincompat run");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starter_config_parses() {
        let config = config::load_config_str(STARTER_CONFIG).unwrap();
        assert_eq!(config.run.workers, 8);
        assert_eq!(config.runner.command, "tox");
        assert!(config.storage.url.is_none());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
