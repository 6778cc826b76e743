//! Log output formats and the `tracing` targets berth emits under.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Prefix shared by every berth log target.
pub const LOG_TARGET_ROOT: &str = "berth";

/// Default filter: quiet dependencies, berth itself at `info`.
pub const DEFAULT_LOG_FILTER: &str = "warn,berth=info";

/// How the binary renders log events on stderr.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, fields flattened.
    Json,
    /// Single-line text for operators at a terminal.
    #[default]
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

/// Areas of the transport and binary with their own log target.
///
/// Filters can address a single area, for example `berth::http=trace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum LogTarget {
    /// Socket, pipe and TCP channels.
    Channel,
    /// Request writing and response framing.
    Http,
    /// Candidate resolution and connection fallback.
    Resolver,
    /// The client facade and its streams.
    Client,
    /// Operator commands run by the binary.
    Command,
    /// Argument parsing and start-up of the binary.
    Cli,
}

impl LogTarget {
    /// Returns the `tracing` target string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "berth::channel",
            Self::Http => "berth::http",
            Self::Resolver => "berth::resolver",
            Self::Client => "berth::client",
            Self::Command => "berth::command",
            Self::Cli => "berth::cli",
        }
    }

    /// Returns a filter directive enabling this target at `level`.
    #[must_use]
    pub fn directive(self, level: &str) -> String {
        format!("{}={level}", self.as_str())
    }
}

/// Lists every target string, used when documenting filters.
#[must_use]
pub fn log_targets() -> Vec<&'static str> {
    LogTarget::iter().map(LogTarget::as_str).collect()
}
