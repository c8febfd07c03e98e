//! This module contains the logging setup for binaries and tests that embed
//! the recorder.
//!
//! The library itself only emits [`tracing`] events. Nothing is printed unless
//! a subscriber is installed, either by the embedding application or by
//! calling [`initialize_logging`].

use std::{
    fs::{File, OpenOptions},
    path::Path,
    sync::OnceLock,
};

use tracing_subscriber::{
    filter::EnvFilter,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    Layer,
};

use crate::error::logging::{Error, Result};

static INIT_GUARD: OnceLock<()> = OnceLock::new();

/// Installs a global subscriber filtered by `RUST_LOG`.
///
/// When `log_file_path` is provided, events are written to that file without
/// colour. Otherwise they go to standard error. Calling this more than once,
/// or after another subscriber has been installed, does nothing.
///
/// # Errors
///
/// Returns [`Err`] if the log file cannot be created. No subscriber is
/// installed in that case, and a later call may try again.
pub fn initialize_logging(log_file_path: Option<&Path>) -> Result<()> {
    if INIT_GUARD.get().is_some() {
        return Ok(());
    }

    match log_file_path {
        Some(path) => {
            let log_file = open_log_file(path)?;
            let file_layer = tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_ansi(false)
                .with_writer(log_file)
                .with_filter(EnvFilter::from_default_env());

            // Another subscriber may already be installed, which is fine.
            let _ = tracing_subscriber::registry().with(file_layer).try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_env_filter(EnvFilter::from_default_env())
                .try_init();
        }
    }

    let _ = INIT_GUARD.set(());
    Ok(())
}

/// Creates or truncates the log file at `path`.
fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| Error::log_file(path, e))
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use crate::{
        error::logging::Error,
        logging::{initialize_logging, open_log_file},
    };

    #[test]
    fn initialization_is_idempotent() -> anyhow::Result<()> {
        initialize_logging(None)?;
        initialize_logging(None)?;

        Ok(())
    }

    #[test]
    fn unopenable_log_files_are_reported() {
        let path = Path::new("/nonexistent/trace-capture/recorder.log");
        let result = open_log_file(path);

        assert!(matches!(result, Err(Error::LogFile { path: p, .. }) if p == path));
    }
}
