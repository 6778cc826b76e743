//! Errors surfaced by the transport.

use std::fmt;
use std::io;

use berth_stream::DecodeError;
use thiserror::Error;

use crate::channel::ChannelError;
use crate::descriptor::ChannelDescriptor;
use crate::http::ProtocolError;

/// One failed connection attempt.
#[derive(Debug, Error)]
#[error("{descriptor}: {error}")]
pub struct ConnectAttempt {
    /// Candidate that was tried.
    pub descriptor: ChannelDescriptor,
    /// Why it failed.
    #[source]
    pub error: ChannelError,
}

/// What happened when the machine start fallback ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackOutcome {
    /// The start action succeeded; the candidates were retried this many times.
    Started {
        /// Connection passes made after starting.
        attempts: u32,
    },
    /// The start action itself failed.
    StartFailed {
        /// Failure reported by the starter.
        reason: String,
    },
}

impl fmt::Display for FallbackOutcome {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { attempts } => write!(
                formatter,
                "machine started but no endpoint answered after {attempts} attempts"
            ),
            Self::StartFailed { reason } => write!(formatter, "machine start failed: {reason}"),
        }
    }
}

/// Errors raised while talking to the engine.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No candidate endpoint accepted a connection.
    #[error("{}", render_unreachable(.attempts, .fallback.as_ref()))]
    EndpointUnreachable {
        /// Every candidate tried, with its failure from the final pass.
        attempts: Vec<ConnectAttempt>,
        /// Outcome of the machine start fallback, when it ran.
        fallback: Option<FallbackOutcome>,
    },
    /// Channel I/O failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The event stream could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The daemon's response was not valid HTTP.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// A streaming request was answered with a non-success status.
    #[error("engine API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },
    /// The request body could not be encoded.
    #[error("failed to serialise request body: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl TransportError {
    /// Recovers a transport error that crossed an [`io::Read`] boundary.
    #[must_use]
    pub fn from_io(error: io::Error) -> Self {
        let wraps_ours = error.get_ref().is_some_and(|inner| {
            inner.is::<ProtocolError>() || inner.is::<Self>() || inner.is::<ChannelError>()
        });
        if !wraps_ours {
            return Self::Channel(ChannelError::from_io(error));
        }
        let Some(payload) = error.into_inner() else {
            return Self::Channel(ChannelError::broken("wrapped error without payload"));
        };
        let not_protocol = match payload.downcast::<ProtocolError>() {
            Ok(protocol) => return Self::Protocol(*protocol),
            Err(other) => other,
        };
        let not_transport = match not_protocol.downcast::<Self>() {
            Ok(transport) => return *transport,
            Err(other) => other,
        };
        match not_transport.downcast::<ChannelError>() {
            Ok(channel) => Self::Channel(*channel),
            Err(other) => Self::Channel(ChannelError::Broken(io::Error::other(other))),
        }
    }

    /// Converts a decode failure, recovering channel and protocol errors
    /// raised by the body reader.
    #[must_use]
    pub fn from_decode(error: DecodeError) -> Self {
        match error {
            DecodeError::Io(io_error) => Self::from_io(io_error),
            other => Self::Decode(other),
        }
    }
}

fn render_unreachable(attempts: &[ConnectAttempt], fallback: Option<&FallbackOutcome>) -> String {
    let mut message = if attempts.is_empty() {
        String::from("no engine endpoint candidates to try")
    } else {
        format!(
            "no engine endpoint reachable ({} candidates tried)",
            attempts.len()
        )
    };
    for attempt in attempts {
        message.push_str(&format!("; {attempt}"));
    }
    if let Some(outcome) = fallback {
        message.push_str(&format!("; {outcome}"));
    }
    message
}
