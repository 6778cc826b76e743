use std::time::Duration;

use camino::Utf8PathBuf;

#[cfg(unix)]
use libc::geteuid;

use crate::env::EnvSource;
use crate::endpoint::EngineEndpoint;
use crate::logging::{DEFAULT_LOG_FILTER, LogFormat};

/// Scheme-prefixed engine address variables, consulted in this order.
pub const HOST_VARIABLES: &[&str] = &["DOCKER_HOST", "CONTAINER_HOST"];

/// Variable holding a bare socket path or pipe name.
pub const SOCKET_PATH_VARIABLE: &str = "DOCKER_SOCK";

/// Default bound on a single connection attempt, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default bound on a single connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS);

/// Connection passes made after the machine start action runs.
pub const DEFAULT_MACHINE_START_ATTEMPTS: u32 = 5;

/// Fixed pause before each post-start connection pass, in milliseconds.
pub const DEFAULT_MACHINE_START_BACKOFF_MS: u64 = 1_000;

/// Fixed pause before each post-start connection pass.
pub const DEFAULT_MACHINE_START_BACKOFF: Duration =
    Duration::from_millis(DEFAULT_MACHINE_START_BACKOFF_MS);

/// Default log filter expression used by the binary.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binary.
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Computes the platform default engine endpoint.
pub fn default_endpoint() -> EngineEndpoint {
    default_endpoint_inner()
}

/// Known alternate engine endpoints, in trial order, after the default.
pub fn alternate_endpoints(env: &dyn EnvSource) -> Vec<EngineEndpoint> {
    alternate_endpoints_inner(env)
}

#[cfg(not(windows))]
fn default_endpoint_inner() -> EngineEndpoint {
    EngineEndpoint::unix("/var/run/docker.sock")
}

#[cfg(not(windows))]
fn alternate_endpoints_inner(env: &dyn EnvSource) -> Vec<EngineEndpoint> {
    let runtime = runtime_directory(env);
    let mut endpoints = vec![
        EngineEndpoint::unix(runtime.join("podman").join("podman.sock")),
        EngineEndpoint::unix(runtime.join("docker.sock")),
        EngineEndpoint::unix("/run/podman/podman.sock"),
    ];
    if let Some(home) = home_directory(env) {
        endpoints.push(EngineEndpoint::unix(
            home.join(".docker").join("run").join("docker.sock"),
        ));
    }
    endpoints
}

#[cfg(not(windows))]
fn runtime_directory(env: &dyn EnvSource) -> Utf8PathBuf {
    env.var("XDG_RUNTIME_DIR")
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|| Utf8PathBuf::from(format!("/run/user/{}", effective_uid())))
}

#[cfg(not(windows))]
fn home_directory(env: &dyn EnvSource) -> Option<Utf8PathBuf> {
    env.var("HOME").map(Utf8PathBuf::from).or_else(|| {
        #[cfg(unix)]
        {
            dirs::home_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
        }
        #[cfg(not(unix))]
        {
            None
        }
    })
}

#[cfg(unix)]
fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { geteuid() }
}

#[cfg(all(not(unix), not(windows)))]
fn effective_uid() -> u32 {
    0
}

#[cfg(windows)]
fn default_endpoint_inner() -> EngineEndpoint {
    EngineEndpoint::named_pipe(r"\\.\pipe\docker_engine")
}

#[cfg(windows)]
fn alternate_endpoints_inner(_env: &dyn EnvSource) -> Vec<EngineEndpoint> {
    [
        r"\\.\pipe\podman-machine-default",
        r"\\.\pipe\podman-machine",
        r"\\.\pipe\docker_cli",
    ]
    .into_iter()
    .map(EngineEndpoint::named_pipe)
    .collect()
}
