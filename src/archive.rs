//! Distribution archive handling.
//!
//! The set of supported formats is closed: the filename suffix selects one
//! [`ArchiveKind`] and anything else is rejected with
//! [`ArchiveError::UnsupportedArchiveFormat`] rather than guessed at.
//!
//! | Suffix | Kind | Handling |
//! |--------|------|----------|
//! | `.whl` | [`ArchiveKind::Wheel`] | Not unpacked; an empty install root is created |
//! | `.zip` | [`ArchiveKind::Zip`] | Unpacked with `zip` |
//! | `.tar.gz` | [`ArchiveKind::TarGz`] | Unpacked with `tar` + `flate2` |
//! | `.tgz` | [`ArchiveKind::Tgz`] | Unpacked with `tar` + `flate2` |

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

/// Errors while preparing a package directory.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The filename has no recognized archive suffix.
    #[error("could not extract {0}: unsupported archive format")]
    UnsupportedArchiveFormat(String),

    /// Reading the archive or writing its contents failed.
    #[error("Failed to extract {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The zip archive is corrupt.
    #[error("Failed to extract {path}: {message}")]
    Zip { path: PathBuf, message: String },
}

/// A supported distribution format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Wheel,
    Zip,
    TarGz,
    Tgz,
}

impl ArchiveKind {
    /// Suffixes are matched in this order.
    const ALL: [ArchiveKind; 4] = [
        ArchiveKind::Wheel,
        ArchiveKind::Zip,
        ArchiveKind::TarGz,
        ArchiveKind::Tgz,
    ];

    /// The filename suffix of this format.
    pub fn suffix(&self) -> &'static str {
        match self {
            ArchiveKind::Wheel => ".whl",
            ArchiveKind::Zip => ".zip",
            ArchiveKind::TarGz => ".tar.gz",
            ArchiveKind::Tgz => ".tgz",
        }
    }

    /// Resolves the format of `filename` from its suffix.
    pub fn from_filename(filename: &str) -> Result<Self, ArchiveError> {
        Self::ALL
            .into_iter()
            .find(|kind| filename.ends_with(kind.suffix()))
            .ok_or_else(|| ArchiveError::UnsupportedArchiveFormat(filename.to_string()))
    }

    /// Returns `filename` without this format's suffix.
    pub fn strip<'a>(&self, filename: &'a str) -> &'a str {
        filename.strip_suffix(self.suffix()).unwrap_or(filename)
    }
}

/// Prepares the package directory for `archive` inside `dest_dir`.
///
/// Archives are fully unpacked into `dest_dir` and the returned path is
/// `dest_dir/{filename without suffix}`, the directory source
/// distributions conventionally unpack to. For wheels that directory is
/// created empty, to be populated by the test runner's install step.
///
/// # Errors
///
/// Fails before returning a path if the format is unsupported or the
/// archive cannot be unpacked completely.
pub fn extract(archive: &Path, dest_dir: &Path) -> Result<PathBuf, ArchiveError> {
    let filename = archive
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();

    let kind = ArchiveKind::from_filename(&filename)?;
    let target = dest_dir.join(kind.strip(&filename));

    let io_err = |source: std::io::Error| ArchiveError::Io {
        path: archive.to_path_buf(),
        source,
    };

    match kind {
        ArchiveKind::Wheel => {
            std::fs::create_dir_all(&target).map_err(io_err)?;
        }
        ArchiveKind::Zip => {
            let file = File::open(archive).map_err(io_err)?;
            let zip_err = |e: zip::result::ZipError| ArchiveError::Zip {
                path: archive.to_path_buf(),
                message: e.to_string(),
            };
            let mut zip = zip::ZipArchive::new(file).map_err(zip_err)?;
            zip.extract(dest_dir).map_err(zip_err)?;
        }
        ArchiveKind::TarGz | ArchiveKind::Tgz => {
            let file = File::open(archive).map_err(io_err)?;
            let mut tar = tar::Archive::new(GzDecoder::new(file));
            tar.unpack(dest_dir).map_err(io_err)?;
        }
    }

    tracing::debug!("Prepared {} from {}", target.display(), filename);
    Ok(target)
}

/// Runs [`extract`] on the blocking thread pool.
pub async fn extract_async(archive: PathBuf, dest_dir: PathBuf) -> anyhow::Result<PathBuf> {
    let target = tokio::task::spawn_blocking(move || extract(&archive, &dest_dir)).await??;
    Ok(target)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_tar_gz(path: &Path, top: &str, files: &[(&str, &str)]) {
        std::fs::write(path, test_support::tar_gz(top, files)).unwrap();
    }

    fn write_zip(path: &Path, top: &str, files: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, content) in files {
            zip.start_file(
                format!("{top}/{name}"),
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_kind_from_filename() {
        assert_eq!(
            ArchiveKind::from_filename("pytest_foo-1.0-py3-none-any.whl").unwrap(),
            ArchiveKind::Wheel
        );
        assert_eq!(ArchiveKind::from_filename("foo-1.0.zip").unwrap(), ArchiveKind::Zip);
        assert_eq!(
            ArchiveKind::from_filename("foo-1.0.tar.gz").unwrap(),
            ArchiveKind::TarGz
        );
        assert_eq!(ArchiveKind::from_filename("foo-1.0.tgz").unwrap(), ArchiveKind::Tgz);
    }

    #[test]
    fn test_unsupported_format() {
        for name in ["plugin.dat", "foo-1.0.tar.bz2", "foo-1.0.egg", "foo"] {
            match ArchiveKind::from_filename(name) {
                Err(ArchiveError::UnsupportedArchiveFormat(f)) => assert_eq!(f, name),
                other => panic!("expected UnsupportedArchiveFormat for {name}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_extract_unsupported_mentions_filename() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("plugin.dat");
        std::fs::write(&archive, b"data").unwrap();

        let err = extract(&archive, dir.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedArchiveFormat(_)));
        assert!(err.to_string().contains("plugin.dat"));
    }

    #[test]
    fn test_extract_tar_gz() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pytest-foo-1.0.tar.gz");
        write_tar_gz(
            &archive,
            "pytest-foo-1.0",
            &[("setup.py", "print('hi')"), ("tox.ini", "[tox]\n")],
        );

        let target = extract(&archive, dir.path()).unwrap();
        assert_eq!(target, dir.path().join("pytest-foo-1.0"));
        assert!(target.join("setup.py").is_file());
        assert!(target.join("tox.ini").is_file());
    }

    #[test]
    fn test_extract_tgz() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pytest-bar-2.0.tgz");
        write_tar_gz(&archive, "pytest-bar-2.0", &[("setup.py", "")]);

        let target = extract(&archive, dir.path()).unwrap();
        assert_eq!(target, dir.path().join("pytest-bar-2.0"));
        assert!(target.join("setup.py").is_file());
    }

    #[test]
    fn test_extract_zip() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pytest-baz-0.3.zip");
        write_zip(&archive, "pytest-baz-0.3", &[("setup.py", "")]);

        let target = extract(&archive, dir.path()).unwrap();
        assert_eq!(target, dir.path().join("pytest-baz-0.3"));
        assert!(target.join("setup.py").is_file());
    }

    #[test]
    fn test_wheel_creates_install_root() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pytest_foo-1.0-py3-none-any.whl");
        std::fs::write(&archive, b"not really a zip").unwrap();

        let target = extract(&archive, dir.path()).unwrap();
        assert_eq!(target, dir.path().join("pytest_foo-1.0-py3-none-any"));
        assert!(target.is_dir());
        assert_eq!(std::fs::read_dir(&target).unwrap().count(), 0);
    }

    #[test]
    fn test_corrupt_archive_is_an_error() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pytest-foo-1.0.tar.gz");
        std::fs::write(&archive, b"definitely not gzip").unwrap();

        assert!(extract(&archive, dir.path()).is_err());
    }
}
