//! Endpoint discovery and connection establishment.
//!
//! [`resolve`] turns configuration into an ordered candidate list without
//! touching the network. [`Connector::connect`] walks that list, bounding each
//! attempt by the connect timeout, and as a last resort asks a
//! [`MachineStarter`] to bring up a local engine before retrying: the Podman
//! machine on Windows, the rootless `podman.socket` unit on Linux.

use std::ffi::{OsStr, OsString};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use berth_config::{
    Config, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MACHINE_START_ATTEMPTS, DEFAULT_MACHINE_START_BACKOFF,
    EndpointKind, EngineEndpoint, EnvSource, HOST_VARIABLES, LogTarget, SOCKET_PATH_VARIABLE,
    alternate_endpoints, default_endpoint,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelError, SecureWrapper, TcpChannel};
use crate::descriptor::{ChannelDescriptor, DescriptorSource};
use crate::error::{ConnectAttempt, FallbackOutcome, TransportError};

const RESOLVER_TARGET: &str = LogTarget::Resolver.as_str();

/// Builds the ordered candidate list.
///
/// With `override_endpoint` set it is the only candidate. Otherwise the list
/// holds, in order, `DOCKER_HOST`, `CONTAINER_HOST`, `DOCKER_SOCK`, the
/// platform default and the alternate engine addresses. Repeated addresses
/// keep their first position. Variables that do not parse are skipped with a
/// warning.
#[must_use]
pub fn resolve(
    override_endpoint: Option<&EngineEndpoint>,
    env: &dyn EnvSource,
) -> Vec<ChannelDescriptor> {
    if let Some(endpoint) = override_endpoint {
        return vec![ChannelDescriptor::new(
            endpoint.clone(),
            0,
            DescriptorSource::Override,
        )];
    }

    let mut found: Vec<(EngineEndpoint, DescriptorSource)> = Vec::new();
    for &variable in HOST_VARIABLES {
        if let Some(value) = env.var(variable) {
            match value.parse::<EngineEndpoint>() {
                Ok(endpoint) => found.push((endpoint, DescriptorSource::Environment(variable))),
                Err(error) => {
                    warn!(target: RESOLVER_TARGET, variable, %error, "ignoring invalid engine address");
                }
            }
        }
    }
    if let Some(value) = env.var(SOCKET_PATH_VARIABLE) {
        match EngineEndpoint::from_bare_path(&value) {
            Ok(endpoint) => found.push((
                endpoint,
                DescriptorSource::Environment(SOCKET_PATH_VARIABLE),
            )),
            Err(error) => {
                warn!(target: RESOLVER_TARGET, variable = SOCKET_PATH_VARIABLE, %error, "ignoring invalid socket path");
            }
        }
    }
    found.push((default_endpoint(), DescriptorSource::PlatformDefault));
    found.extend(
        alternate_endpoints(env)
            .into_iter()
            .map(|endpoint| (endpoint, DescriptorSource::Alternate)),
    );

    let mut candidates: Vec<ChannelDescriptor> = Vec::with_capacity(found.len());
    for (endpoint, source) in found {
        if candidates
            .iter()
            .any(|candidate| candidate.endpoint == endpoint)
        {
            continue;
        }
        let priority = u32::try_from(candidates.len()).unwrap_or(u32::MAX);
        candidates.push(ChannelDescriptor::new(endpoint, priority, source));
    }
    candidates
}

/// Opens a channel to a single candidate.
pub trait ChannelOpener: Send + Sync {
    /// Connects to `descriptor`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the [`ChannelError`] raised by the transport.
    fn open(&self, descriptor: &ChannelDescriptor, timeout: Duration)
    -> Result<Channel, ChannelError>;
}

/// Opens channels with the operating system's transports.
#[derive(Default, Clone)]
pub struct SystemOpener {
    secure: Option<Arc<dyn SecureWrapper>>,
}

impl SystemOpener {
    /// Creates an opener without TLS support.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps TCP connections with `wrapper`.
    #[must_use]
    pub fn with_secure_wrapper(mut self, wrapper: Arc<dyn SecureWrapper>) -> Self {
        self.secure = Some(wrapper);
        self
    }
}

impl ChannelOpener for SystemOpener {
    fn open(
        &self,
        descriptor: &ChannelDescriptor,
        timeout: Duration,
    ) -> Result<Channel, ChannelError> {
        let io: Box<dyn crate::channel::ChannelIo> = match &descriptor.endpoint {
            EngineEndpoint::Tcp { host, port } => Box::new(TcpChannel::connect(
                host,
                *port,
                timeout,
                self.secure.as_deref(),
            )?),
            EngineEndpoint::Unix { path } => open_unix(path, timeout)?,
            EngineEndpoint::NamedPipe { path } => open_pipe(path, timeout)?,
        };
        Ok(Channel::from_io(descriptor.clone(), io))
    }
}

#[cfg(unix)]
fn open_unix(
    path: &camino::Utf8Path,
    timeout: Duration,
) -> Result<Box<dyn crate::channel::ChannelIo>, ChannelError> {
    Ok(Box::new(crate::channel::UnixSocketChannel::connect(
        path, timeout,
    )?))
}

#[cfg(not(unix))]
fn open_unix(
    path: &camino::Utf8Path,
    _timeout: Duration,
) -> Result<Box<dyn crate::channel::ChannelIo>, ChannelError> {
    Err(ChannelError::Refused(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("unix sockets are unsupported on this platform: {path}"),
    )))
}

#[cfg(windows)]
fn open_pipe(
    path: &str,
    timeout: Duration,
) -> Result<Box<dyn crate::channel::ChannelIo>, ChannelError> {
    let pipe = crate::channel::pipe::FilePipe::open(path, timeout)?;
    Ok(Box::new(crate::channel::NamedPipeChannel::new(pipe)))
}

#[cfg(not(windows))]
fn open_pipe(
    path: &str,
    _timeout: Duration,
) -> Result<Box<dyn crate::channel::ChannelIo>, ChannelError> {
    Err(ChannelError::Refused(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("named pipes are unsupported on this platform: {path}"),
    )))
}

/// Error raised by a [`MachineStarter`].
#[derive(Debug, Error)]
pub enum MachineStartError {
    /// The start command could not be launched.
    #[error("failed to launch '{program}': {source}")]
    Launch {
        /// Program that was run.
        program: String,
        /// Underlying launch error.
        #[source]
        source: std::io::Error,
    },
    /// The start command exited unsuccessfully.
    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        /// Program that was run.
        program: String,
        /// Exit status description.
        status: String,
        /// Captured standard error, trimmed.
        stderr: String,
    },
}

/// Starts a local engine when no endpoint answers.
pub trait MachineStarter: Send + Sync {
    /// Runs the start action once.
    ///
    /// # Errors
    ///
    /// Returns [`MachineStartError`] when the action fails.
    fn start(&self) -> Result<(), MachineStartError>;

    /// Returns whether starting could make one of `candidates` reachable.
    ///
    /// The default looks for a named pipe candidate.
    fn applies_to(&self, candidates: &[ChannelDescriptor]) -> bool {
        candidates
            .iter()
            .any(|candidate| candidate.kind == EndpointKind::NamedPipe)
    }
}

fn run_quietly(program: &OsStr, args: &[&str]) -> Result<(), MachineStartError> {
    let name = program.to_string_lossy().into_owned();
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| MachineStartError::Launch {
            program: name.clone(),
            source,
        })?;
    if output.status.success() {
        return Ok(());
    }
    Err(MachineStartError::Failed {
        program: name,
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
    })
}

/// Runs `podman machine start`.
#[derive(Debug, Clone)]
pub struct PodmanMachine {
    program: OsString,
}

impl Default for PodmanMachine {
    fn default() -> Self {
        Self {
            program: OsString::from("podman"),
        }
    }
}

impl PodmanMachine {
    /// Uses `program` instead of `podman`.
    #[must_use]
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl MachineStarter for PodmanMachine {
    fn start(&self) -> Result<(), MachineStartError> {
        run_quietly(&self.program, &["machine", "start"])
    }
}

/// Unit that serves the rootless Podman API socket.
pub const PODMAN_SOCKET_UNIT: &str = "podman.socket";

/// Enables the user's `podman.socket` unit through `systemctl --user`.
///
/// Nothing is run when the unit is already active.
#[derive(Debug, Clone)]
pub struct PodmanSocketUnit {
    program: OsString,
}

impl Default for PodmanSocketUnit {
    fn default() -> Self {
        Self {
            program: OsString::from("systemctl"),
        }
    }
}

impl PodmanSocketUnit {
    /// Uses `program` instead of `systemctl`.
    #[must_use]
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl MachineStarter for PodmanSocketUnit {
    fn start(&self) -> Result<(), MachineStartError> {
        if run_quietly(
            &self.program,
            &["--user", "is-active", "--quiet", PODMAN_SOCKET_UNIT],
        )
        .is_ok()
        {
            debug!(target: RESOLVER_TARGET, unit = PODMAN_SOCKET_UNIT, "unit already active");
            return Ok(());
        }
        run_quietly(
            &self.program,
            &["--user", "enable", "--now", PODMAN_SOCKET_UNIT],
        )
    }

    fn applies_to(&self, candidates: &[ChannelDescriptor]) -> bool {
        candidates.iter().any(|candidate| {
            candidate
                .endpoint
                .unix_path()
                .is_some_and(is_rootless_podman_socket)
        })
    }
}

fn is_rootless_podman_socket(path: &camino::Utf8Path) -> bool {
    path.ends_with("podman/podman.sock") && !path.starts_with("/run/podman")
}

/// Returns the platform's machine starter, if it has one.
#[must_use]
pub fn default_machine_starter() -> Option<Box<dyn MachineStarter>> {
    if cfg!(windows) {
        Some(Box::new(PodmanMachine::default()))
    } else if cfg!(target_os = "linux") {
        Some(Box::new(PodmanSocketUnit::default()))
    } else {
        None
    }
}

/// Connects to the first reachable candidate.
pub struct Connector {
    opener: Box<dyn ChannelOpener>,
    starter: Option<Box<dyn MachineStarter>>,
    connect_timeout: Duration,
    start_attempts: u32,
    start_backoff: Duration,
}

impl Connector {
    /// Creates a connector with default timeouts and no machine starter.
    #[must_use]
    pub fn new(opener: Box<dyn ChannelOpener>) -> Self {
        Self {
            opener,
            starter: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            start_attempts: DEFAULT_MACHINE_START_ATTEMPTS,
            start_backoff: DEFAULT_MACHINE_START_BACKOFF,
        }
    }

    /// Creates a connector using the system transports and `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut connector = Self::new(Box::new(SystemOpener::new()))
            .with_connect_timeout(config.connect_timeout())
            .with_start_retries(config.machine_start_attempts, config.machine_start_backoff());
        if config.machine_start_enabled() {
            connector.starter = default_machine_starter();
        }
        connector
    }

    /// Sets the machine starter.
    #[must_use]
    pub fn with_starter(mut self, starter: Box<dyn MachineStarter>) -> Self {
        self.starter = Some(starter);
        self
    }

    /// Bounds each connection attempt.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the passes made after the start action and the pause before each.
    #[must_use]
    pub const fn with_start_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.start_attempts = attempts;
        self.start_backoff = backoff;
        self
    }

    /// Connects to the first candidate that accepts a connection.
    ///
    /// When every candidate fails and the configured starter
    /// [applies](MachineStarter::applies_to) to the list, the starter runs
    /// once and the full list is retried.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::EndpointUnreachable`] listing every candidate
    /// with its failure reason from the final pass.
    pub fn connect(&self, candidates: &[ChannelDescriptor]) -> Result<Channel, TransportError> {
        let mut failures = match self.try_candidates(candidates) {
            Ok(channel) => return Ok(channel),
            Err(failures) => failures,
        };

        let fallback = match self.starter.as_deref() {
            Some(starter) if starter.applies_to(candidates) => {
                info!(target: RESOLVER_TARGET, "no engine endpoint answered; starting local engine");
                match starter.start() {
                    Ok(()) => {
                        for attempt in 1..=self.start_attempts {
                            thread::sleep(self.start_backoff);
                            debug!(target: RESOLVER_TARGET, attempt, "retrying candidates after engine start");
                            match self.try_candidates(candidates) {
                                Ok(channel) => return Ok(channel),
                                Err(pass) => failures = pass,
                            }
                        }
                        Some(FallbackOutcome::Started {
                            attempts: self.start_attempts,
                        })
                    }
                    Err(error) => {
                        warn!(target: RESOLVER_TARGET, %error, "engine start failed");
                        Some(FallbackOutcome::StartFailed {
                            reason: error.to_string(),
                        })
                    }
                }
            }
            _ => None,
        };

        Err(TransportError::EndpointUnreachable {
            attempts: failures,
            fallback,
        })
    }

    fn try_candidates(
        &self,
        candidates: &[ChannelDescriptor],
    ) -> Result<Channel, Vec<ConnectAttempt>> {
        let mut failures = Vec::with_capacity(candidates.len());
        for descriptor in candidates {
            debug!(target: RESOLVER_TARGET, endpoint = %descriptor.endpoint, source = %descriptor.source, "trying engine endpoint");
            match self.opener.open(descriptor, self.connect_timeout) {
                Ok(channel) => {
                    info!(target: RESOLVER_TARGET, endpoint = %descriptor.endpoint, "connected to engine");
                    return Ok(channel);
                }
                Err(error) => {
                    debug!(target: RESOLVER_TARGET, endpoint = %descriptor.endpoint, %error, "engine endpoint unavailable");
                    failures.push(ConnectAttempt {
                        descriptor: descriptor.clone(),
                        error,
                    });
                }
            }
        }
        Err(failures)
    }
}
