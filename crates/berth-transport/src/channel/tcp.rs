//! TCP channels with optional TLS delegation.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use super::{CHANNEL_TARGET, ChannelCloser, ChannelError, ChannelIo};

/// Byte stream produced by a [`SecureWrapper`].
pub trait SecureStream: Read + Write + Send {}

impl<T: Read + Write + Send> SecureStream for T {}

/// Caller-provided TLS layer for TCP endpoints.
///
/// The transport never negotiates TLS itself; it hands the connected socket to
/// the wrapper and speaks HTTP over whatever stream comes back.
pub trait SecureWrapper: Send + Sync {
    /// Wraps a connected socket for `host`.
    ///
    /// # Errors
    ///
    /// Returns the handshake failure.
    fn wrap(&self, stream: TcpStream, host: &str) -> io::Result<Box<dyn SecureStream>>;
}

/// Channel over a TCP connection.
pub struct TcpChannel {
    stream: Box<dyn SecureStream>,
    closer: ChannelCloser,
}

impl TcpChannel {
    /// Connects to `host:port`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] when the host does not resolve, the
    /// connection fails, or the secure wrapper rejects the stream.
    pub fn connect(
        host: &str,
        port: u16,
        timeout: Duration,
        secure: Option<&dyn SecureWrapper>,
    ) -> Result<Self, ChannelError> {
        let address = resolve_address(host, port).map_err(ChannelError::from_io)?;
        let stream = TcpStream::connect_timeout(&address, timeout).map_err(ChannelError::from_io)?;
        let control = stream.try_clone().map_err(ChannelError::from_io)?;
        let closer = ChannelCloser::new(move || {
            if let Err(error) = control.shutdown(Shutdown::Both) {
                debug!(target: CHANNEL_TARGET, %error, "tcp shutdown failed");
            }
        });
        let stream: Box<dyn SecureStream> = match secure {
            Some(wrapper) => wrapper
                .wrap(stream, host)
                .map_err(ChannelError::from_io)?,
            None => Box::new(stream),
        };
        Ok(Self { stream, closer })
    }
}

fn resolve_address(host: &str, port: u16) -> io::Result<SocketAddr> {
    let mut addrs = (host, port).to_socket_addrs()?;
    addrs
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved address"))
}

impl ChannelIo for TcpChannel {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        self.stream.read(buf).map_err(ChannelError::from_io)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, ChannelError> {
        self.stream.write(buf).map_err(ChannelError::from_io)
    }

    fn closer(&self) -> ChannelCloser {
        self.closer.clone()
    }
}

impl fmt::Debug for TcpChannel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TcpChannel")
            .field("closer", &self.closer)
            .finish_non_exhaustive()
    }
}
