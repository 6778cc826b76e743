//! Log output of the `berth` binary.
//!
//! Events go to stderr so command output on stdout stays clean. The filter
//! addresses berth's own targets (`berth::http`, `berth::channel`, ...) and
//! falls back to [`DEFAULT_LOG_FILTER`] when the configured expression is
//! blank. The subscriber is installed once per process.

use std::io::{self, IsTerminal};

use berth_config::{Config, DEFAULT_LOG_FILTER, LogFormat};
use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Errors encountered while configuring log output.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter expression did not parse.
    #[error("invalid log filter '{expression}': {message}")]
    Filter {
        /// Expression as configured.
        expression: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Another subscriber was already installed.
    #[error("failed to install log subscriber: {0}")]
    Subscriber(#[source] SetGlobalDefaultError),
}

/// Parses `expression` into a filter, using the default for blank input.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] when a directive does not parse.
pub fn build_filter(expression: &str) -> Result<EnvFilter, TelemetryError> {
    let expression = if expression.trim().is_empty() {
        DEFAULT_LOG_FILTER
    } else {
        expression
    };
    EnvFilter::try_new(expression).map_err(|error| TelemetryError::Filter {
        expression: expression.to_owned(),
        message: error.to_string(),
    })
}

fn subscriber(format: LogFormat, filter: EnvFilter) -> Box<dyn Subscriber + Send + Sync> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(fmt::time::UtcTime::rfc_3339());
    match format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().with_target(true).finish()),
    }
}

/// Installs the global subscriber on first use.
///
/// The filter is validated on every call; only the first valid call
/// installs anything.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is invalid or a foreign
/// subscriber is already registered.
pub fn initialise(config: &Config) -> Result<(), TelemetryError> {
    let filter = build_filter(config.log_filter())?;
    INSTALLED
        .get_or_try_init(|| {
            tracing::subscriber::set_global_default(subscriber(config.log_format(), filter))
                .map_err(TelemetryError::Subscriber)
        })
        .map(|_| ())
}
