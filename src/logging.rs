use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "ground_me=info";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("log path has no parent directory")]
    NoParent,

    #[error("a global subscriber is already installed")]
    AlreadyInstalled,
}

const LOG_FILE: &str = "runtime.log";

/// The log lives next to the journal and settings.
pub fn log_path(data_dir: &Path) -> PathBuf {
    data_dir.join(LOG_FILE)
}

/// Installs the global subscriber: plain text appended to `path`, plus
/// stderr when `verbose`. `RUST_LOG` overrides the default filter.
pub fn init(path: &Path, verbose: bool) -> Result<(), LogError> {
    let parent = path.parent().ok_or(LogError::NoParent)?;
    fs::create_dir_all(parent).map_err(|source| LogError::Io {
        path: parent.to_path_buf(),
        source,
    })?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LogError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let file_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_thread_names(true);
    let stderr_layer = verbose.then(|| fmt::layer().with_writer(io::stderr).with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|_| LogError::AlreadyInstalled)
}

pub fn read_recent(path: &Path, limit: usize) -> Result<Vec<String>, LogError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let contents = fs::read_to_string(path).map_err(|source| LogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let lines = contents.lines().collect::<Vec<_>>();
    let take = lines.len().min(limit);
    Ok(lines[lines.len() - take..]
        .iter()
        .map(|line| (*line).to_string())
        .collect())
}

pub fn clear(path: &Path) -> Result<(), LogError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LogError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_only_the_most_recent_lines() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("runtime.log");
        fs::write(&path, "first\nsecond\nthird\n").expect("log should write");

        assert_eq!(
            read_recent(&path, 2).expect("recent logs should read"),
            vec!["second", "third"]
        );
        assert_eq!(read_recent(&path, 10).expect("recent logs should read").len(), 3);
    }

    #[test]
    fn missing_log_reads_empty_and_clears_cleanly() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("absent.log");
        assert!(read_recent(&path, 5).expect("missing log should read").is_empty());
        clear(&path).expect("clearing a missing log should succeed");
    }

    #[test]
    fn clear_removes_log_file() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("runtime.log");
        fs::write(&path, "started\n").expect("log should write");
        clear(&path).expect("clear should remove file");
        assert!(!path.exists());
    }
}
