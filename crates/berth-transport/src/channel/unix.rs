//! Unix domain socket channels.

use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Weak};
use std::time::Duration;

use camino::Utf8Path;
use socket2::{Domain, SockAddr, Socket, Type};
use tracing::debug;

use super::{CHANNEL_TARGET, ChannelCloser, ChannelError, ChannelIo};

/// Pass-through channel over a connected Unix domain socket.
pub struct UnixSocketChannel {
    stream: Arc<UnixStream>,
    closer: ChannelCloser,
}

impl UnixSocketChannel {
    /// Connects to the socket at `path`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] when the socket is missing, refuses the
    /// connection or does not answer in time.
    pub fn connect(path: &Utf8Path, timeout: Duration) -> Result<Self, ChannelError> {
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None).map_err(ChannelError::from_io)?;
        let address = SockAddr::unix(path.as_std_path()).map_err(ChannelError::from_io)?;
        socket
            .connect_timeout(&address, timeout)
            .map_err(ChannelError::from_io)?;
        Ok(Self::from_stream(UnixStream::from(OwnedFd::from(socket))))
    }

    /// Wraps an already connected stream.
    #[must_use]
    pub fn from_stream(stream: UnixStream) -> Self {
        let stream = Arc::new(stream);
        let handle: Weak<UnixStream> = Arc::downgrade(&stream);
        let closer = ChannelCloser::new(move || {
            if let Some(stream) = handle.upgrade() {
                if let Err(error) = stream.shutdown(Shutdown::Both) {
                    debug!(target: CHANNEL_TARGET, %error, "unix socket shutdown failed");
                }
            }
        });
        Self { stream, closer }
    }
}

impl ChannelIo for UnixSocketChannel {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        (&*self.stream).read(buf).map_err(ChannelError::from_io)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, ChannelError> {
        (&*self.stream).write(buf).map_err(ChannelError::from_io)
    }

    fn closer(&self) -> ChannelCloser {
        self.closer.clone()
    }
}
