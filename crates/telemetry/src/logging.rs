// SPDX-License-Identifier: Apache-2.0

//! Logging initialization.

use conduit_config::LogConfig;
use std::fs::OpenOptions;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Errors initializing the logging subsystem.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The configured log file could not be opened for writing.
    #[error("could not open log file `{path}`: {source}")]
    LogFile {
        /// The path that failed to open.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A global subscriber was already installed (e.g. in a test harness).
    #[error("a global tracing subscriber is already set")]
    AlreadySet,
}

/// Installs a global `tracing` subscriber built from `log:` config.
///
/// Every worker thread's spans carry `app`, `flow`, `component`, and `component_index` fields
/// (attached by the caller via `tracing::info_span!`), so multi-threaded output stays
/// attributable to a specific component instance even when interleaved.
pub fn init_logging(config: &LogConfig) -> Result<(), Error> {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    if let Some(path) = &config.file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| Error::LogFile {
                path: path.clone(),
                source,
            })?;
        let file_layer = fmt::layer().with_writer(file).with_ansi(false);
        let stdout_layer = fmt::layer();
        registry
            .with(file_layer)
            .with(stdout_layer)
            .try_init()
            .map_err(|_| Error::AlreadySet)
    } else {
        registry
            .with(fmt::layer())
            .try_init()
            .map_err(|_| Error::AlreadySet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_level_directive() {
        let filter = EnvFilter::try_new("info");
        assert!(filter.is_ok());
    }

    #[test]
    fn log_file_error_wraps_io_error() {
        let config = LogConfig {
            level: "info".to_owned(),
            file: Some("/nonexistent-dir-xyz/conduit.log".to_owned()),
        };
        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, Error::LogFile { .. }));
    }
}
