use std::fs;
use std::path::{Path, PathBuf};

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset. The WebSocket stack logs every
/// frame at debug, so it is held at warn.
pub const DEFAULT_FILTER: &str = "info,tungstenite=warn,tokio_tungstenite=warn";

const LOG_PREFIX: &str = "companion";
const MAX_LOG_FILES: usize = 5;

/// Initialize structured logging.
///
/// Sets up:
/// - File output: `{log_dir}/companion.log`, rotated daily, latest 5 kept.
/// - Console output (stderr): compact human-readable format.
/// - Environment filter from `RUST_LOG`, defaulting to [`DEFAULT_FILTER`].
///
/// When the log directory cannot be created the file layer is skipped and
/// logging continues on stderr only. Returns the file log directory in use,
/// or an error if a global subscriber is already installed.
pub fn try_init(log_dir: &Path) -> Result<Option<PathBuf>, TryInitError> {
    let (file_layer, file_dir) = match file_appender(log_dir) {
        Ok(appender) => {
            let layer = fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(log_dir.to_path_buf()))
        }
        Err(e) => {
            eprintln!("file logging disabled ({}): {e}", log_dir.display());
            (None, None)
        }
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .compact();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    match &file_dir {
        Some(dir) => tracing::info!(log_dir = %dir.display(), "Logger initialized"),
        None => tracing::warn!("Logger initialized without file output"),
    }
    Ok(file_dir)
}

fn file_appender(log_dir: &Path) -> Result<RollingFileAppender, Box<dyn std::error::Error>> {
    fs::create_dir_all(log_dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir)?;
    Ok(appender)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        // Another test may have installed a subscriber already; either way
        // the second call must return an error rather than panic.
        let _ = try_init(dir.path());
        assert!(try_init(dir.path()).is_err());
    }

    #[test]
    fn test_file_appender_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/logs");
        file_appender(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
