//! Duplex byte channels to the engine daemon.
//!
//! Every transport the engine listens on (Unix domain sockets, Windows named
//! pipes and TCP) is wrapped behind [`ChannelIo`] so the HTTP layer can treat
//! them all as a plain socket. The concrete variant is chosen once, when the
//! resolver connects, and boxed into a [`Channel`].

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use berth_config::LogTarget;
use strum::Display;
use thiserror::Error;
use tracing::debug;

use crate::descriptor::ChannelDescriptor;

pub mod pipe;
pub mod tcp;
#[cfg(unix)]
pub mod unix;

pub use self::pipe::{NamedPipeChannel, PipeHandle, PipeRead};
pub use self::tcp::{SecureStream, SecureWrapper, TcpChannel};
#[cfg(unix)]
pub use self::unix::UnixSocketChannel;

const CHANNEL_TARGET: &str = LogTarget::Channel.as_str();

/// Failure classes reported by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ChannelErrorKind {
    /// Nothing accepted the connection.
    Refused,
    /// The operation did not finish in time.
    Timeout,
    /// The peer reset the connection.
    Reset,
    /// The channel was closed or ended unexpectedly.
    Broken,
}

/// Errors raised by channel I/O.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Nothing accepted the connection.
    #[error("connection refused: {0}")]
    Refused(#[source] io::Error),
    /// The operation did not finish in time.
    #[error("timed out: {0}")]
    Timeout(#[source] io::Error),
    /// The peer reset the connection.
    #[error("connection reset: {0}")]
    Reset(#[source] io::Error),
    /// The channel was closed or ended unexpectedly.
    #[error("channel broken: {0}")]
    Broken(#[source] io::Error),
}

impl ChannelError {
    /// Classifies an I/O error, recovering a wrapped [`ChannelError`].
    #[must_use]
    pub fn from_io(error: io::Error) -> Self {
        if error
            .get_ref()
            .is_some_and(|inner| inner.is::<Self>())
        {
            if let Some(inner) = error.into_inner() {
                return match inner.downcast::<Self>() {
                    Ok(channel) => *channel,
                    Err(other) => Self::Broken(io::Error::other(other)),
                };
            }
            return Self::broken("channel error without payload");
        }
        match error.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::NotFound
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::PermissionDenied => Self::Refused(error),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout(error),
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                Self::Reset(error)
            }
            _ => Self::Broken(error),
        }
    }

    /// Builds a [`ChannelError::Broken`] from a message.
    #[must_use]
    pub fn broken(message: &str) -> Self {
        Self::Broken(io::Error::new(io::ErrorKind::BrokenPipe, message.to_owned()))
    }

    /// Returns the failure class.
    #[must_use]
    pub const fn kind(&self) -> ChannelErrorKind {
        match self {
            Self::Refused(_) => ChannelErrorKind::Refused,
            Self::Timeout(_) => ChannelErrorKind::Timeout,
            Self::Reset(_) => ChannelErrorKind::Reset,
            Self::Broken(_) => ChannelErrorKind::Broken,
        }
    }
}

impl From<ChannelError> for io::Error {
    fn from(error: ChannelError) -> Self {
        let kind = match error.kind() {
            ChannelErrorKind::Refused => io::ErrorKind::ConnectionRefused,
            ChannelErrorKind::Timeout => io::ErrorKind::TimedOut,
            ChannelErrorKind::Reset => io::ErrorKind::ConnectionReset,
            ChannelErrorKind::Broken => io::ErrorKind::BrokenPipe,
        };
        Self::new(kind, error)
    }
}

/// Transport-specific half of a [`Channel`].
///
/// Implementations block on `read` and `write`. `close` must be idempotent and
/// must make a read blocked on another thread return promptly.
pub trait ChannelIo: Send {
    /// Reads into `buf`, returning 0 at end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] when the underlying handle fails.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError>;

    /// Writes part of `buf`, returning the number of bytes accepted.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] when the underlying handle fails.
    fn write(&mut self, buf: &[u8]) -> Result<usize, ChannelError>;

    /// Returns the handle that interrupts this channel.
    fn closer(&self) -> ChannelCloser;
}

struct CloserState {
    closed: AtomicBool,
    interrupt: Box<dyn Fn() + Send + Sync>,
}

/// Thread-safe handle that closes a channel from anywhere.
///
/// Closing marks the channel closed and interrupts the OS handle, so a read
/// blocked on another thread fails with [`ChannelError::Broken`].
#[derive(Clone)]
pub struct ChannelCloser {
    state: Arc<CloserState>,
}

impl ChannelCloser {
    /// Creates a closer that runs `interrupt` the first time it closes.
    pub fn new(interrupt: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            state: Arc::new(CloserState {
                closed: AtomicBool::new(false),
                interrupt: Box::new(interrupt),
            }),
        }
    }

    /// Closes the channel; later calls do nothing.
    pub fn close(&self) {
        if !self.state.closed.swap(true, Ordering::AcqRel) {
            (self.state.interrupt)();
        }
    }

    /// Returns whether the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ChannelCloser {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ChannelCloser")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Connected channel to one engine endpoint.
///
/// The channel owns its OS handle and closes it on drop. It implements
/// [`Read`] and [`Write`]; errors crossing those traits carry the original
/// [`ChannelError`], which [`ChannelError::from_io`] recovers.
pub struct Channel {
    descriptor: ChannelDescriptor,
    io: Box<dyn ChannelIo>,
    closer: ChannelCloser,
}

impl Channel {
    /// Wraps a connected transport.
    #[must_use]
    pub fn from_io(descriptor: ChannelDescriptor, io: Box<dyn ChannelIo>) -> Self {
        let closer = io.closer();
        Self {
            descriptor,
            io,
            closer,
        }
    }

    /// Returns the candidate this channel was opened from.
    #[must_use]
    pub const fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    /// Returns a handle that can close this channel from another thread.
    #[must_use]
    pub fn closer(&self) -> ChannelCloser {
        self.closer.clone()
    }

    /// Returns whether the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    /// Reads into `buf`, returning 0 at end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Broken`] once the channel is closed, or the
    /// transport's own error.
    pub fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::broken("channel closed"));
        }
        match self.io.read(buf) {
            Ok(0) if self.is_closed() && !buf.is_empty() => {
                Err(ChannelError::broken("channel closed during read"))
            }
            Err(_) if self.is_closed() => Err(ChannelError::broken("channel closed during read")),
            other => other,
        }
    }

    /// Writes the whole of `buf`.
    ///
    /// # Errors
    ///
    /// Returns the transport error, or [`ChannelError::Broken`] when the
    /// transport stops accepting bytes.
    pub fn write_all_bytes(&mut self, mut buf: &[u8]) -> Result<(), ChannelError> {
        while !buf.is_empty() {
            if self.is_closed() {
                return Err(ChannelError::broken("channel closed"));
            }
            let written = self.io.write(buf)?;
            if written == 0 {
                return Err(ChannelError::broken("channel accepted no bytes"));
            }
            buf = buf.get(written..).unwrap_or_default();
        }
        Ok(())
    }

    /// Closes the channel. Calling this more than once has no further effect.
    pub fn close(&self) {
        if !self.closer.is_closed() {
            debug!(target: CHANNEL_TARGET, endpoint = %self.descriptor.endpoint, "closing channel");
        }
        self.closer.close();
    }
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_some(buf).map_err(io::Error::from)
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(ChannelError::broken("channel closed").into());
        }
        self.io.write(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Channel")
            .field("descriptor", &self.descriptor)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
