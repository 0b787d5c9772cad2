//! Wheel filename tags and compatibility with the tested interpreter.
//!
//! A wheel is named `{dist}-{version}(-{build})?-{python}-{abi}-{platform}.whl`
//! where each of the three tag fields may hold several `.`-separated values
//! (`py2.py3`, `manylinux1_x86_64.manylinux2010_x86_64`).

/// A wheel filename that does not follow the naming convention.
#[derive(Debug, thiserror::Error)]
#[error("Invalid wheel filename: {0}")]
pub struct WheelNameError(pub String);

/// The compatibility tags of a wheel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelTags {
    pub python: Vec<String>,
    pub abi: Vec<String>,
    pub platform: Vec<String>,
}

impl WheelTags {
    /// Parses the tags out of a wheel filename.
    pub fn parse(filename: &str) -> Result<Self, WheelNameError> {
        let stem = filename
            .strip_suffix(".whl")
            .ok_or_else(|| WheelNameError(filename.to_string()))?;

        let parts: Vec<&str> = stem.split('-').collect();
        if !(parts.len() == 5 || parts.len() == 6) || parts.iter().any(|p| p.is_empty()) {
            return Err(WheelNameError(filename.to_string()));
        }

        let split = |field: &str| field.split('.').map(str::to_string).collect::<Vec<_>>();
        let n = parts.len();
        Ok(Self {
            python: split(parts[n - 3]),
            abi: split(parts[n - 2]),
            platform: split(parts[n - 1]),
        })
    }
}

/// Decides whether a binary distribution can be installed where the tests
/// run.
pub trait Compatibility: Send + Sync {
    /// Returns whether the wheel named `filename` is installable.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed filenames.
    fn is_compatible(&self, filename: &str) -> Result<bool, WheelNameError>;
}

/// Tag-based compatibility for a CPython interpreter on the host platform.
#[derive(Debug, Clone)]
pub struct TagCompatibility {
    python_tags: Vec<String>,
    abi_tags: Vec<String>,
    os: &'static str,
    arch: &'static str,
}

impl TagCompatibility {
    /// Builds the accepted tag sets from a tox environment such as `py312`.
    ///
    /// Environments that do not name a version (e.g. `pypy`) accept only
    /// pure-python `py3` wheels.
    pub fn for_tox_env(tox_env: &str) -> Self {
        let digits: String = tox_env
            .strip_prefix("py")
            .unwrap_or_default()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();

        let mut python_tags = vec!["py3".to_string()];
        let mut abi_tags = vec!["none".to_string()];

        if let Some(major) = digits.chars().next() {
            python_tags = vec![format!("py{major}")];
            if digits.len() > 1 {
                python_tags.push(format!("py{digits}"));
                python_tags.push(format!("cp{digits}"));
                abi_tags.push("abi3".to_string());
                abi_tags.push(format!("cp{digits}"));
            }
        }

        Self {
            python_tags,
            abi_tags,
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        }
    }

    /// Overrides the host platform, for checking wheels for another machine.
    pub fn with_platform(mut self, os: &'static str, arch: &'static str) -> Self {
        self.os = os;
        self.arch = arch;
        self
    }

    fn platform_matches(&self, tag: &str) -> bool {
        if tag == "any" {
            return true;
        }

        let os_matches = match self.os {
            "linux" => {
                tag.starts_with("linux")
                    || tag.starts_with("manylinux")
                    || tag.starts_with("musllinux")
            }
            "macos" => tag.starts_with("macosx"),
            "windows" => tag.starts_with("win"),
            _ => false,
        };

        let arch_matches = match self.arch {
            "x86_64" => tag.ends_with("x86_64") || tag.ends_with("amd64") || tag.ends_with("intel"),
            "aarch64" => tag.ends_with("aarch64") || tag.ends_with("arm64"),
            other => tag.ends_with(other),
        } || tag.ends_with("universal2");

        os_matches && arch_matches
    }
}

impl Compatibility for TagCompatibility {
    fn is_compatible(&self, filename: &str) -> Result<bool, WheelNameError> {
        let tags = WheelTags::parse(filename)?;

        let python = tags.python.iter().any(|t| self.python_tags.contains(t));
        let abi = tags.abi.iter().any(|t| self.abi_tags.contains(t));
        let platform = tags.platform.iter().any(|t| self.platform_matches(t));

        Ok(python && abi && platform)
    }
}
