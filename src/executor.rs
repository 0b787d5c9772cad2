//! Running the sandboxed test runner (tox) against one package.
//!
//! The executor owns everything that happens inside a package directory:
//!
//! 1. Pick the working directory for the [`RunMode`].
//! 2. Write a placeholder `tox.ini` if the package does not ship one. The
//!    placeholder installs pytest and runs `pytest --trace-config --help`,
//!    which fails if the plugin cannot be imported by pytest.
//! 3. Run `<runner> --result-json=result.json -e <env> --force-dep=pytest==<version>`
//!    and capture stdout and stderr as one text.
//!
//! Timeouts are not handled here: the caller bounds [`TestExecutor::run`]
//! with a deadline. On unix the runner leads its own process group, and the
//! whole group is killed when the future running it is dropped, so a
//! cancelled run leaves neither tox nor the pip and pytest processes it
//! started.
//!
//! Output is read as raw bytes and decoded lossily: a package printing
//! invalid UTF-8 still shows its error text.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, anyhow, bail};
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::SplitStream;
use tracing::debug;

use crate::config::{RunConfiguration, RunnerConfig};

/// Name of the test-configuration file the runner reads.
pub const TOX_CONFIG: &str = "tox.ini";

/// Placeholder configuration for source distributions without a `tox.ini`.
pub const PLACEHOLDER_TOX_SDIST: &str = "\
[tox]

[testenv]
deps = pytest
commands = pytest --trace-config --help
";

/// Placeholder configuration for wheels; `{wheel}` is replaced by the
/// wheel's filename, relative to the parent of the working directory.
const PLACEHOLDER_TOX_BDIST: &str = "\
[tox]
skipsdist = True

[testenv]
deps =
    pytest
    pip
commands =
    pip install ../{wheel}
    pytest --trace-config --help
";

/// How the package under test is laid out on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// An unpacked source distribution; tox runs inside it.
    Source,
    /// A wheel sitting next to an empty install root; tox installs it with
    /// pip before testing.
    Binary { wheel_filename: String },
}

/// Exit status and combined output of one runner invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerOutput {
    pub exit_code: i32,
    pub output: String,
}

/// Returns the placeholder `tox.ini` contents for `mode`.
pub fn placeholder_tox_config(mode: &RunMode) -> String {
    match mode {
        RunMode::Source => PLACEHOLDER_TOX_SDIST.to_string(),
        RunMode::Binary { wheel_filename } => PLACEHOLDER_TOX_BDIST.replace("{wheel}", wheel_filename),
    }
}

/// Writes the placeholder `tox.ini` into `dir` unless one exists.
///
/// Returns `true` if a placeholder was written.
pub fn ensure_tox_config(dir: &Path, mode: &RunMode) -> std::io::Result<bool> {
    let path = dir.join(TOX_CONFIG);
    if path.is_file() {
        return Ok(false);
    }
    std::fs::write(&path, placeholder_tox_config(mode))?;
    Ok(true)
}

/// Kills the runner's process group on drop unless disarmed.
///
/// Must be dropped before the child is reaped, while the group id cannot
/// have been reused.
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(child: &tokio::process::Child) -> Self {
        Self { pgid: child.id() }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.and_then(|id| libc::pid_t::try_from(id).ok()) {
            debug!("Killing runner process group {}", pgid);
            // SAFETY: killpg takes no pointers; a group that is already gone yields ESRCH.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
}

fn decode_line(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8_lossy(&line).into_owned()
}

/// Invokes the test runner for packages.
#[derive(Debug, Clone)]
pub struct TestExecutor {
    command: Vec<String>,
    env: Vec<(String, String)>,
    removed_env: Vec<String>,
}

impl TestExecutor {
    /// Creates an executor from the runner configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is empty or has unbalanced quotes.
    pub fn new(config: &RunnerConfig) -> Result<Self> {
        let command = shell_words::split(&config.command)
            .with_context(|| format!("Invalid runner command: {:?}", config.command))?;
        if command.is_empty() {
            bail!("Runner command is empty");
        }

        let mut env: Vec<(String, String)> = config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();

        Ok(Self {
            command,
            env,
            removed_env: Vec::new(),
        })
    }

    /// Keeps the variable `key` out of the runner's environment.
    ///
    /// Used to hide the publishing credential from the code under test.
    pub fn without_env(mut self, key: impl Into<String>) -> Self {
        self.removed_env.push(key.into());
        self
    }

    /// The full runner argument vector for `run`.
    pub fn command_line(&self, run: &RunConfiguration) -> Vec<String> {
        let mut args = self.command.clone();
        args.push("--result-json=result.json".to_string());
        args.push("-e".to_string());
        args.push(run.tox_env.clone());
        args.push(format!("--force-dep=pytest=={}", run.pytest_version));
        args
    }

    /// Returns the directory tox runs in for `target` under `mode`.
    ///
    /// For wheels this is `target` itself, created if needed.
    fn working_dir(target: &Path, mode: &RunMode) -> Result<PathBuf> {
        if let RunMode::Binary { .. } = mode {
            std::fs::create_dir_all(target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        }
        if !target.is_dir() {
            bail!("Package directory {} does not exist", target.display());
        }
        Ok(target.to_path_buf())
    }

    /// Runs the tests of the package at `target`.
    ///
    /// A non-zero exit of the runner is a normal result, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the package directory is missing, the
    /// placeholder cannot be written, or the runner cannot be started.
    pub async fn run(
        &self,
        target: &Path,
        run: &RunConfiguration,
        mode: &RunMode,
    ) -> Result<RunnerOutput> {
        let directory = Self::working_dir(target, mode)?;

        if ensure_tox_config(&directory, mode)
            .with_context(|| format!("Failed to write {} in {}", TOX_CONFIG, directory.display()))?
        {
            debug!("Wrote placeholder {} in {}", TOX_CONFIG, directory.display());
        }

        let args = self.command_line(run);
        debug!("Running {:?} in {}", args, directory.display());

        let mut process = tokio::process::Command::new(&args[0]);
        process.args(&args[1..]);
        process.current_dir(&directory);
        for (key, value) in &self.env {
            process.env(key, value);
        }
        for key in &self.removed_env {
            process.env_remove(key);
        }
        process.stdin(Stdio::null());
        process.stdout(Stdio::piped());
        process.stderr(Stdio::piped());
        process.kill_on_drop(true);
        #[cfg(unix)]
        process.process_group(0);

        let mut child = process
            .spawn()
            .with_context(|| format!("Failed to start test runner {:?}", args[0]))?;
        let mut group = ProcessGroupGuard::new(&child);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr not captured"))?;

        let stdout_lines = SplitStream::new(BufReader::new(stdout).split(b'\n'));
        let stderr_lines = SplitStream::new(BufReader::new(stderr).split(b'\n'));

        // Interleave both streams in arrival order.
        let mut combined = stream::select(stdout_lines, stderr_lines);
        let mut output = String::new();
        while let Some(line) = combined.next().await {
            match line {
                Ok(line) => output.push_str(&decode_line(line)),
                Err(e) => debug!("Failed to read runner output: {}", e),
            }
            output.push('\n');
        }

        let status = child
            .wait()
            .await
            .context("Failed to wait for test runner")?;
        group.disarm();

        Ok(RunnerOutput {
            exit_code: status.code().unwrap_or(-1),
            output,
        })
    }
}

#[cfg(all(test, unix))]
pub(crate) mod test_support {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Writes an executable shell script standing in for tox.
    pub(crate) fn fake_runner(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-tox");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::test_support::fake_runner;
    use super::*;
    use tempfile::TempDir;

    fn executor_for(script: &Path) -> TestExecutor {
        TestExecutor::new(&RunnerConfig {
            command: script.to_string_lossy().into_owned(),
            ..Default::default()
        })
        .unwrap()
    }

    fn run_config() -> RunConfiguration {
        RunConfiguration::new("py312", "8.0.0")
    }

    #[test]
    fn test_command_line() {
        let executor = TestExecutor::new(&RunnerConfig {
            command: "python -m tox".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            executor.command_line(&run_config()),
            vec![
                "python",
                "-m",
                "tox",
                "--result-json=result.json",
                "-e",
                "py312",
                "--force-dep=pytest==8.0.0",
            ]
        );
    }

    #[test]
    fn test_empty_command_rejected() {
        let config = RunnerConfig {
            command: "  ".to_string(),
            ..Default::default()
        };
        assert!(TestExecutor::new(&config).is_err());
    }

    #[test]
    fn test_existing_tox_config_is_kept() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(TOX_CONFIG), "[tox]\nenvlist = custom\n").unwrap();

        assert!(!ensure_tox_config(dir.path(), &RunMode::Source).unwrap());
        let content = std::fs::read_to_string(dir.path().join(TOX_CONFIG)).unwrap();
        assert!(content.contains("envlist = custom"));
    }

    #[test]
    fn test_binary_placeholder_installs_wheel() {
        let config = placeholder_tox_config(&RunMode::Binary {
            wheel_filename: "pytest_foo-1.0-py3-none-any.whl".to_string(),
        });
        assert!(config.contains("skipsdist = True"));
        assert!(config.contains("pip install ../pytest_foo-1.0-py3-none-any.whl"));
        let install = config.find("pip install").unwrap();
        let help = config.find("pytest --trace-config --help").unwrap();
        assert!(install < help);
    }

    #[tokio::test]
    async fn test_run_success_writes_placeholder() {
        let dir = TempDir::new().unwrap();
        let script = fake_runner(dir.path(), "echo \"args: $*\"\ncat tox.ini\nexit 0");
        let target = dir.path().join("pytest-foo-1.0");
        std::fs::create_dir(&target).unwrap();

        let result = executor_for(&script)
            .run(&target, &run_config(), &RunMode::Source)
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(
            result
                .output
                .contains("args: --result-json=result.json -e py312 --force-dep=pytest==8.0.0"),
            "{}",
            result.output
        );
        assert!(result.output.contains("pytest --trace-config --help"));
        assert!(target.join(TOX_CONFIG).is_file());
    }

    #[tokio::test]
    async fn test_run_failure_captures_both_streams() {
        let dir = TempDir::new().unwrap();
        let script = fake_runner(dir.path(), "echo out-line\necho err-line >&2\nexit 3");
        let target = dir.path().join("pkg");
        std::fs::create_dir(&target).unwrap();

        let result = executor_for(&script)
            .run(&target, &run_config(), &RunMode::Source)
            .await
            .unwrap();

        assert_eq!(result.exit_code, 3);
        assert!(result.output.contains("out-line"));
        assert!(result.output.contains("err-line"));
    }

    #[tokio::test]
    async fn test_binary_mode_creates_working_dir() {
        let dir = TempDir::new().unwrap();
        let script = fake_runner(dir.path(), "pwd\nexit 0");
        let target = dir.path().join("pytest_foo-1.0-py3-none-any");

        let mode = RunMode::Binary {
            wheel_filename: "pytest_foo-1.0-py3-none-any.whl".to_string(),
        };
        let result = executor_for(&script)
            .run(&target, &run_config(), &mode)
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("pytest_foo-1.0-py3-none-any"));
        let tox = std::fs::read_to_string(target.join(TOX_CONFIG)).unwrap();
        assert!(tox.contains("pip install ../pytest_foo-1.0-py3-none-any.whl"));
    }

    #[tokio::test]
    async fn test_secret_is_hidden_from_runner() {
        let dir = TempDir::new().unwrap();
        let script = fake_runner(dir.path(), "echo \"secret=[$PLUGINCOMPAT_TEST_SECRET]\"");
        let target = dir.path().join("pkg");
        std::fs::create_dir(&target).unwrap();

        let mut config = RunnerConfig {
            command: script.to_string_lossy().into_owned(),
            ..Default::default()
        };
        config
            .env
            .insert("PLUGINCOMPAT_TEST_SECRET".to_string(), "visible".to_string());

        let visible = TestExecutor::new(&config).unwrap();
        let out = visible.run(&target, &run_config(), &RunMode::Source).await.unwrap();
        assert!(out.output.contains("secret=[visible]"));

        let hidden = TestExecutor::new(&config)
            .unwrap()
            .without_env("PLUGINCOMPAT_TEST_SECRET");
        let out = hidden.run(&target, &run_config(), &RunMode::Source).await.unwrap();
        assert!(out.output.contains("secret=[]"), "{}", out.output);
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_is_kept() {
        let dir = TempDir::new().unwrap();
        let script = fake_runner(
            dir.path(),
            "echo before\nprintf 'caf\\351 ERROR: broken import\\r\\n'\necho after\nexit 1",
        );
        let target = dir.path().join("pkg");
        std::fs::create_dir(&target).unwrap();

        let result = executor_for(&script)
            .run(&target, &run_config(), &RunMode::Source)
            .await
            .unwrap();

        assert_eq!(result.exit_code, 1);
        assert_eq!(
            result.output,
            "before\ncaf\u{FFFD} ERROR: broken import\nafter\n"
        );
    }

    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            // The state follows the parenthesised command name.
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z'),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancelled_run_kills_runner_children() {
        let dir = TempDir::new().unwrap();
        let script = fake_runner(dir.path(), "sleep 30 &\necho $! > sleeper.pid\nwait");
        let target = dir.path().join("pkg");
        std::fs::create_dir(&target).unwrap();

        let executor = executor_for(&script);
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            executor.run(&target, &run_config(), &RunMode::Source),
        )
        .await;
        assert!(result.is_err(), "run should have timed out");

        let pid = std::fs::read_to_string(target.join("sleeper.pid")).unwrap();
        let pid = pid.trim();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while is_running(pid) && std::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert!(!is_running(pid), "background process {pid} outlived the run");
    }

    #[tokio::test]
    async fn test_missing_runner_is_an_error() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("pkg");
        std::fs::create_dir(&target).unwrap();

        let executor = TestExecutor::new(&RunnerConfig {
            command: dir.path().join("no-such-tox").to_string_lossy().into_owned(),
            ..Default::default()
        })
        .unwrap();

        assert!(executor.run(&target, &run_config(), &RunMode::Source).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_source_dir_is_an_error() {
        let dir = TempDir::new().unwrap();
        let script = fake_runner(dir.path(), "exit 0");

        let result = executor_for(&script)
            .run(&dir.path().join("missing"), &run_config(), &RunMode::Source)
            .await;
        assert!(result.is_err());
    }
}
