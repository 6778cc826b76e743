//! Demultiplexing of attach and log streams.
//!
//! Containers started without a TTY share one connection for stdout and
//! stderr. Each payload is preceded by an eight byte header: the stream
//! number, three zero bytes, and the payload length as a big-endian `u32`.

use std::io::{self, Read};

use strum::Display;
use thiserror::Error;

/// Length of a frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 8;

/// Standard stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StdStream {
    /// Data written to the container's standard input (echoed back).
    Stdin,
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl StdStream {
    fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// One payload from a multiplexed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFrame {
    /// Stream the payload was written to.
    pub stream: StdStream,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl LogFrame {
    /// Payload as text, replacing invalid UTF-8 sequences.
    #[must_use]
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Errors ending a multiplexed sequence.
#[derive(Debug, Error)]
pub enum MultiplexError {
    /// The stream ended inside a header or payload.
    #[error("multiplexed stream truncated: expected {expected} bytes, received {received}")]
    Truncated {
        /// Bytes the frame required.
        expected: usize,
        /// Bytes available before end-of-stream.
        received: usize,
    },
    /// The header named a stream other than stdin, stdout or stderr.
    #[error("unknown stream marker {0} in multiplexed header")]
    UnknownStream(u8),
    /// Reading the underlying stream failed.
    #[error("failed to read multiplexed stream: {0}")]
    Io(#[source] io::Error),
}

/// Iterator over the frames of a multiplexed stream.
pub struct MultiplexedReader<R> {
    reader: R,
    finished: bool,
}

impl<R: Read> MultiplexedReader<R> {
    /// Wraps a raw attach or logs body.
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }

    fn read_frame(&mut self) -> Result<Option<LogFrame>, MultiplexError> {
        let mut header = [0_u8; FRAME_HEADER_LEN];
        let received = read_full(&mut self.reader, &mut header)?;
        if received == 0 {
            return Ok(None);
        }
        if received < FRAME_HEADER_LEN {
            return Err(MultiplexError::Truncated {
                expected: FRAME_HEADER_LEN,
                received,
            });
        }

        let [marker, _, _, _, size @ ..] = header;
        let stream = StdStream::from_marker(marker).ok_or(MultiplexError::UnknownStream(marker))?;
        #[expect(
            clippy::big_endian_bytes,
            reason = "the frame length is big-endian on the wire"
        )]
        let length = u32::from_be_bytes(size);

        // The buffer grows with the bytes that arrive, not the declared length.
        let mut payload = Vec::new();
        (&mut self.reader)
            .take(u64::from(length))
            .read_to_end(&mut payload)
            .map_err(MultiplexError::Io)?;
        let expected = usize::try_from(length).unwrap_or(usize::MAX);
        if payload.len() < expected {
            return Err(MultiplexError::Truncated {
                expected,
                received: payload.len(),
            });
        }
        Ok(Some(LogFrame { stream, payload }))
    }
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize, MultiplexError> {
    let mut filled = 0;
    while let Some(rest) = buf.get_mut(filled..).filter(|rest| !rest.is_empty()) {
        match reader.read(rest) {
            Ok(0) => break,
            Ok(count) => filled += count,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(MultiplexError::Io(error)),
        }
    }
    Ok(filled)
}

impl<R: Read> Iterator for MultiplexedReader<R> {
    type Item = Result<LogFrame, MultiplexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(error) => {
                self.finished = true;
                Some(Err(error))
            }
        }
    }
}
