use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::Display;
use thiserror::Error;
use url::Url;

const NPIPE_SCHEME_PREFIX: &str = "npipe://";
const PIPE_PREFIX: &str = r"\\";

/// Transport family of an [`EngineEndpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EndpointKind {
    /// Unix domain socket.
    UnixSocket,
    /// Windows named pipe.
    NamedPipe,
    /// TCP socket, optionally wrapped in TLS by the caller.
    Tcp,
}

/// Address of a container-engine daemon.
///
/// Serialises as its address string. Deserialises from either that string or
/// a `{ transport = "unix", path = "..." }` table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EngineEndpoint {
    /// Unix domain socket endpoint.
    Unix { path: Utf8PathBuf },
    /// Windows named pipe endpoint, stored in `\\.\pipe\name` form.
    NamedPipe { path: String },
    /// TCP socket endpoint.
    Tcp { host: String, port: u16 },
}

impl EngineEndpoint {
    /// Builds a Unix domain socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Builds a named pipe endpoint, normalising forward slashes.
    #[must_use]
    pub fn named_pipe(path: impl AsRef<str>) -> Self {
        Self::NamedPipe {
            path: normalise_pipe_path(path.as_ref()),
        }
    }

    /// Builds a TCP socket endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Interprets a scheme-less value such as `DOCKER_SOCK`.
    ///
    /// Values starting with `\\` (or `//`) are named pipes; anything else is a
    /// Unix socket path.
    pub fn from_bare_path(value: &str) -> Result<Self, EndpointParseError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(EndpointParseError::Empty);
        }
        if trimmed.starts_with(PIPE_PREFIX) || trimmed.starts_with("//") {
            return Ok(Self::named_pipe(trimmed));
        }
        Ok(Self::unix(trimmed))
    }

    /// Returns the transport family.
    #[must_use]
    pub const fn kind(&self) -> EndpointKind {
        match self {
            Self::Unix { .. } => EndpointKind::UnixSocket,
            Self::NamedPipe { .. } => EndpointKind::NamedPipe,
            Self::Tcp { .. } => EndpointKind::Tcp,
        }
    }

    /// Returns the raw address: a filesystem path, a pipe path, or `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        match self {
            Self::Unix { path } => path.to_string(),
            Self::NamedPipe { path } => path.clone(),
            Self::Tcp { host, port } => format!("{host}:{port}"),
        }
    }

    /// Returns the Unix socket path when the endpoint uses the Unix transport.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_ref()),
            Self::NamedPipe { .. } | Self::Tcp { .. } => None,
        }
    }

    /// Value for the HTTP `Host` header when talking to this endpoint.
    #[must_use]
    pub fn host_header(&self) -> String {
        match self {
            Self::Tcp { host, port } => format!("{host}:{port}"),
            Self::Unix { .. } | Self::NamedPipe { .. } => String::from("localhost"),
        }
    }
}

impl fmt::Display for EngineEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::NamedPipe { path } => {
                write!(formatter, "{NPIPE_SCHEME_PREFIX}{}", path.replace('\\', "/"))
            }
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for EngineEndpoint {
    type Err = EndpointParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(EndpointParseError::Empty);
        }
        // Pipe paths carry backslashes that `Url` would rewrite, so the scheme
        // is stripped by hand.
        if let Some(rest) = trimmed.strip_prefix(NPIPE_SCHEME_PREFIX) {
            if rest.trim_matches(['/', '\\']).is_empty() {
                return Err(EndpointParseError::MissingPipePath(input.to_owned()));
            }
            return Ok(Self::named_pipe(rest));
        }
        if !trimmed.contains("://") {
            return Self::from_bare_path(trimmed);
        }

        let url = Url::parse(trimmed)?;
        match url.scheme() {
            "unix" => {
                if let Some(host) = url
                    .host_str()
                    .filter(|host| !host.is_empty() && *host != "localhost")
                {
                    return Err(EndpointParseError::UnexpectedUnixHost {
                        input: input.to_owned(),
                        host: host.to_owned(),
                    });
                }
                let path = percent_decode_str(url.path())
                    .decode_utf8()
                    .map_err(|_| EndpointParseError::InvalidUnixPath(input.to_owned()))?;
                if path.is_empty() || path == "/" {
                    return Err(EndpointParseError::MissingUnixPath(input.to_owned()));
                }
                Ok(Self::unix(path.into_owned()))
            }
            "tcp" | "http" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| EndpointParseError::MissingHost(input.to_owned()))?;
                let port = url
                    .port()
                    .ok_or_else(|| EndpointParseError::MissingPort(input.to_owned()))?;
                Ok(Self::tcp(host.trim_matches(['[', ']']), port))
            }
            other => Err(EndpointParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
enum EndpointTable {
    Unix { path: Utf8PathBuf },
    NamedPipe { path: String },
    Tcp { host: String, port: u16 },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EndpointRepr {
    Address(String),
    Table(EndpointTable),
}

impl<'de> Deserialize<'de> for EngineEndpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match EndpointRepr::deserialize(deserializer)? {
            EndpointRepr::Address(address) => address.parse().map_err(serde::de::Error::custom),
            EndpointRepr::Table(EndpointTable::Unix { path }) => Ok(Self::unix(path)),
            EndpointRepr::Table(EndpointTable::NamedPipe { path }) => Ok(Self::named_pipe(path)),
            EndpointRepr::Table(EndpointTable::Tcp { host, port }) => Ok(Self::tcp(host, port)),
        }
    }
}

impl Serialize for EngineEndpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

fn normalise_pipe_path(raw: &str) -> String {
    let name = raw.replace('/', "\\");
    let without_prefix = name.trim_start_matches('\\');
    format!("{PIPE_PREFIX}{without_prefix}")
}

/// Errors encountered while parsing an [`EngineEndpoint`] from text.
#[derive(Debug, Error)]
pub enum EndpointParseError {
    /// The address was blank.
    #[error("engine address is empty")]
    Empty,
    /// Scheme was not recognised.
    #[error("unsupported engine address scheme '{0}'")]
    UnsupportedScheme(String),
    /// TCP host name was missing.
    #[error("missing TCP host in '{0}'")]
    MissingHost(String),
    /// TCP port was missing from the address.
    #[error("missing TCP port in '{0}'")]
    MissingPort(String),
    /// Unix socket path was absent.
    #[error("missing Unix socket path in '{0}'")]
    MissingUnixPath(String),
    /// A `unix://` address carried a host part, as in `unix://var/run/x.sock`.
    #[error("unix address '{input}' has host '{host}'; use three slashes, as in unix:///path")]
    UnexpectedUnixHost {
        /// Address as given.
        input: String,
        /// Host part that would otherwise be dropped.
        host: String,
    },
    /// Unix socket path was not valid UTF-8 after percent-decoding.
    #[error("unix socket path in '{0}' is not valid UTF-8")]
    InvalidUnixPath(String),
    /// Named pipe path was absent.
    #[error("missing named pipe path in '{0}'")]
    MissingPipePath(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
