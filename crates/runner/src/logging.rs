//! Process-wide `tracing` subscriber setup.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use pgbatch_core::error::CoreError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Filter used when `RUST_LOG` is unset. `pgbatch` is the binary's own target.
pub const DEFAULT_LOG_FILTER: &str = "pgbatch=info,pgbatch_runner=info,pgbatch_db=info";

/// Log file used when `LOG_FILE` is unset.
pub const DEFAULT_LOG_FILE: &str = "./logs/pgbatch.log";

/// `LOG_FILE` value that disables the file layer.
const LOG_FILE_DISABLED: &str = "off";

/// Format of the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CoreError::config(format!(
                "LOG_FORMAT must be \"text\" or \"json\", got \"{other}\""
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Append-only log file in addition to the console. `None` logs to the
    /// console only.
    pub file: Option<PathBuf>,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            format: LogFormat::default(),
        }
    }
}

impl LogSettings {
    /// Reads `LOG_FILE` and `LOG_FORMAT`.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Ok(Self {
            file: match non_blank("LOG_FILE") {
                None => Some(PathBuf::from(DEFAULT_LOG_FILE)),
                Some(v) if v.trim().eq_ignore_ascii_case(LOG_FILE_DISABLED) => None,
                Some(v) => Some(PathBuf::from(v)),
            },
            format: non_blank("LOG_FORMAT")
                .map(|v| v.parse::<LogFormat>())
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

/// Install the global subscriber: a console layer, plus a file layer when
/// `settings.file` is set. Both share one `EnvFilter` built from `RUST_LOG`.
pub fn init(settings: &LogSettings) -> Result<(), CoreError> {
    let file_layer: Option<Box<dyn Layer<Registry> + Send + Sync>> = match &settings.file {
        Some(path) => {
            let file = open_log_file(path)?;
            let layer = fmt::layer().with_writer(Arc::new(file)).with_ansi(false);
            Some(match settings.format {
                LogFormat::Json => layer.json().boxed(),
                LogFormat::Text => layer.boxed(),
            })
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(fmt::layer())
        .try_init()
        .map_err(|e| CoreError::config(format!("Failed to initialise logging: {e}")))
}

/// Open `path` for appending, creating it and its parent directories.
pub fn open_log_file(path: &Path) -> Result<File, CoreError> {
    let io_error = |source| CoreError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_error)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Result<LogSettings, CoreError> {
        let vars: HashMap<&str, &str> = pairs.iter().copied().collect();
        LogSettings::from_vars(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn file_log_by_default() {
        let s = settings(&[]).unwrap();
        assert_eq!(s, LogSettings::default());
        assert_eq!(s.file, Some(PathBuf::from(DEFAULT_LOG_FILE)));

        let blank = settings(&[("LOG_FILE", "  ")]).unwrap();
        assert_eq!(blank.file, Some(PathBuf::from(DEFAULT_LOG_FILE)));
    }

    #[test]
    fn file_log_can_be_turned_off() {
        assert_eq!(settings(&[("LOG_FILE", "off")]).unwrap().file, None);
        assert_eq!(settings(&[("LOG_FILE", "OFF")]).unwrap().file, None);
    }

    #[test]
    fn log_file_parent_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("nested").join("pgbatch.log");

        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "first").unwrap();
        drop(file);
        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn default_filter_covers_the_binary_and_libraries() {
        let subscriber = tracing_subscriber::registry().with(EnvFilter::new(DEFAULT_LOG_FILTER));
        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(target: "pgbatch", tracing::Level::ERROR));
            assert!(tracing::enabled!(target: "pgbatch", tracing::Level::INFO));
            assert!(tracing::enabled!(target: "pgbatch_runner::scheduler", tracing::Level::INFO));
            assert!(tracing::enabled!(target: "pgbatch_db::pool", tracing::Level::INFO));
        });
    }

    #[test]
    fn file_and_json_format() {
        let s = settings(&[("LOG_FILE", "/var/log/pgbatch.log"), ("LOG_FORMAT", "JSON")]).unwrap();
        assert_eq!(s.file, Some(PathBuf::from("/var/log/pgbatch.log")));
        assert_eq!(s.format, LogFormat::Json);
    }

    #[test]
    fn unknown_format_rejected() {
        assert!(settings(&[("LOG_FORMAT", "xml")]).is_err());
    }
}
