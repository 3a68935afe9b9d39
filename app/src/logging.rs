//! File logging. The terminal belongs to the UI, so nothing goes to stderr.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILE_NAME: &str = "tetra.log";

/// Where log lines go: a daily-rolled file in a directory, or one fixed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Daily(PathBuf),
    File(PathBuf),
}

impl LogTarget {
    #[must_use]
    pub fn resolve(config_dir: &Path, log_file: Option<PathBuf>) -> Self {
        match log_file {
            Some(path) => Self::File(path),
            None => Self::Daily(config_dir.to_path_buf()),
        }
    }
}

/// `RUST_LOG` wins over the configured directive; a bad directive falls back
/// to `info`.
#[must_use]
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Keep the guard alive until exit or
/// buffered lines are lost.
pub fn init(target: &LogTarget, default_directive: &str) -> std::io::Result<WorkerGuard> {
    let appender = match target {
        LogTarget::Daily(dir) => {
            std::fs::create_dir_all(dir)?;
            tracing_appender::rolling::daily(dir, LOG_FILE_NAME)
        }
        LogTarget::File(path) => {
            let dir = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;
            let file_name = path
                .file_name()
                .map_or_else(|| LOG_FILE_NAME.into(), ToOwned::to_owned);
            tracing_appender::rolling::never(dir, file_name)
        }
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer);
    let installed = tracing_subscriber::registry()
        .with(env_filter(default_directive))
        .with(layer)
        .try_init();
    if installed.is_err() {
        tracing::debug!("global subscriber already installed");
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::LogTarget;

    #[test]
    fn explicit_log_file_overrides_config_dir() {
        let target = LogTarget::resolve(Path::new("/cfg"), Some(PathBuf::from("/tmp/t.log")));
        assert_eq!(target, LogTarget::File(PathBuf::from("/tmp/t.log")));

        let target = LogTarget::resolve(Path::new("/cfg"), None);
        assert_eq!(target, LogTarget::Daily(PathBuf::from("/cfg")));
    }
}
