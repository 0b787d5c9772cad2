use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn plugincompat() -> Command {
    Command::cargo_bin("plugincompat").unwrap()
}

#[test]
fn test_help_lists_subcommands() {
    plugincompat()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("update-index"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("init"));
}

#[test]
fn test_help_hides_secret() {
    plugincompat()
        .args(["run", "--help"])
        .env("POST_KEY", "ILIKETURTLES")
        .assert()
        .success()
        .stdout(predicate::str::contains("ILIKETURTLES").not());
}

#[test]
fn test_init_then_validate() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("plugincompat.toml");

    plugincompat()
        .arg("--config")
        .arg(&config)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));
    assert!(config.is_file());

    plugincompat()
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("Workers: 8"));
}

#[test]
fn test_init_refuses_to_overwrite() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("plugincompat.toml");
    std::fs::write(&config, "[run]\nworkers = 2\n").unwrap();

    plugincompat()
        .arg("--config")
        .arg(&config)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    assert_eq!(
        std::fs::read_to_string(&config).unwrap(),
        "[run]\nworkers = 2\n"
    );
}

#[test]
fn test_validate_rejects_bad_config() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("plugincompat.toml");
    std::fs::write(&config, "[run]\nworkers = \"many\"\n").unwrap();

    plugincompat()
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_run_requires_pytest_version() {
    let dir = TempDir::new().unwrap();

    plugincompat()
        .current_dir(dir.path())
        .env_remove("PYTEST_VERSION")
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("pytest-version"));
}

#[test]
fn test_run_without_index_file_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("plugincompat.toml"),
        "[run]\ntox_env = \"py312\"\nindex_file = \"missing.json\"\n",
    )
    .unwrap();

    plugincompat()
        .current_dir(dir.path())
        .env("PYTEST_VERSION", "8.0.0")
        .env_remove("POST_KEY")
        .env_remove("PLUGINCOMPAT_SITE")
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.json"));
}

#[test]
fn test_run_with_secret_but_no_site_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("plugincompat.toml"),
        "[run]\ntox_env = \"py312\"\n",
    )
    .unwrap();

    plugincompat()
        .current_dir(dir.path())
        .env("PYTEST_VERSION", "8.0.0")
        .env("POST_KEY", "ILIKETURTLES")
        .env_remove("PLUGINCOMPAT_SITE")
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no results URL"))
        .stderr(predicate::str::contains("ILIKETURTLES").not());
}

#[test]
fn test_run_empty_index_without_secret() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("plugincompat.toml"),
        "[run]\ntox_env = \"py312\"\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("index.json"), "[]").unwrap();

    plugincompat()
        .current_dir(dir.path())
        .env("PYTEST_VERSION", "8.0.0")
        .env_remove("POST_KEY")
        .env_remove("PLUGINCOMPAT_SITE")
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("Limit forced to 30 since secret is unavail"))
        .stdout(predicate::str::contains("Processing 0 packages with 8 workers"))
        .stdout(predicate::str::contains("All done, congratulations :)"));
}
