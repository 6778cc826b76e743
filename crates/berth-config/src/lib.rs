//! Shared configuration for the berth engine transport.
//!
//! The crate owns the vocabulary every other crate agrees on: how an engine
//! address is written (`unix://`, `npipe://`, `tcp://`), which endpoints a
//! platform tries by default, how logging is formatted, and where registry
//! credentials live.
//!
//! [`Config`] is layered by `ortho_config`: built-in defaults, then a
//! `berth.toml` file (or `--config-path`), then `BERTH_*` variables, then
//! command-line flags.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod defaults;
mod endpoint;
mod env;
mod logging;
mod registry;

pub use defaults::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MACHINE_START_ATTEMPTS,
    DEFAULT_MACHINE_START_BACKOFF, DEFAULT_MACHINE_START_BACKOFF_MS, HOST_VARIABLES,
    SOCKET_PATH_VARIABLE, alternate_endpoints, default_endpoint, default_log_filter,
    default_log_format,
};
pub use endpoint::{EndpointKind, EndpointParseError, EngineEndpoint};
pub use env::{EnvSource, MapEnv, ProcessEnv};
pub use logging::{
    DEFAULT_LOG_FILTER, LOG_TARGET_ROOT, LogFormat, LogFormatParseError, LogTarget, log_targets,
};
pub use ortho_config::OrthoError;
pub use registry::{
    ANONYMOUS_REGISTRY_AUTH, AuthEntry, DEFAULT_REGISTRY, DOCKER_CONFIG_VARIABLE,
    RegistryAuthError, RegistryAuths, docker_config_path, registry_for_image,
};

/// Settings shared by the transport and the binary.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[serde(default)]
#[ortho_config(prefix = "BERTH")]
pub struct Config {
    /// Explicit engine address; when set it is the only candidate.
    pub host: Option<EngineEndpoint>,
    /// `tracing` filter expression.
    #[ortho_config(default = DEFAULT_LOG_FILTER.to_owned())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = LogFormat::Compact)]
    pub log_format: LogFormat,
    /// Bound on each individual connection attempt, in milliseconds.
    #[ortho_config(default = DEFAULT_CONNECT_TIMEOUT_MS)]
    pub connect_timeout_ms: u64,
    /// Disables the machine start fallback.
    pub no_machine_start: bool,
    /// Connection passes made after the start action.
    #[ortho_config(default = DEFAULT_MACHINE_START_ATTEMPTS)]
    pub machine_start_attempts: u32,
    /// Pause before each post-start pass, in milliseconds.
    #[ortho_config(default = DEFAULT_MACHINE_START_BACKOFF_MS)]
    pub machine_start_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: None,
            log_filter: default_log_filter().to_owned(),
            log_format: default_log_format(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            no_machine_start: false,
            machine_start_attempts: DEFAULT_MACHINE_START_ATTEMPTS,
            machine_start_backoff_ms: DEFAULT_MACHINE_START_BACKOFF_MS,
        }
    }
}

impl Config {
    /// Returns a copy pinned to `host`.
    #[must_use]
    pub fn with_host(mut self, host: EngineEndpoint) -> Self {
        self.host = Some(host);
        self
    }

    /// Explicit engine address, if one was configured.
    #[must_use]
    pub fn host(&self) -> Option<&EngineEndpoint> {
        self.host.as_ref()
    }

    /// Returns the configured log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Returns the configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Returns the per-candidate connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns whether the machine start fallback may run.
    #[must_use]
    pub const fn machine_start_enabled(&self) -> bool {
        !self.no_machine_start
    }

    /// Returns the pause before each post-start connection pass.
    #[must_use]
    pub const fn machine_start_backoff(&self) -> Duration {
        Duration::from_millis(self.machine_start_backoff_ms)
    }
}
