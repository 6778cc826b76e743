use std::borrow::BorrowMut;
use std::io::{self, Read};

use super::connection::{Connection, MAX_LINE_LEN};
use super::headers::HeaderMap;
use super::request::{Method, Request};
use super::ProtocolError;
use crate::channel::ChannelError;
use crate::error::TransportError;

/// How the end of a response body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// The response has no body.
    Empty,
    /// The body is exactly this many bytes.
    Length(u64),
    /// The body uses chunked transfer coding.
    Chunked,
    /// The body runs until the channel closes.
    UntilClose,
}

impl Framing {
    /// Chooses the framing for a response to `request`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidContentLength`] when the length header
    /// is not a number.
    pub fn for_response(
        request: &Request,
        status: u16,
        headers: &HeaderMap,
    ) -> Result<Self, ProtocolError> {
        if status == 101 && request.is_upgrade() {
            return Ok(Self::UntilClose);
        }
        if request.method() == Method::Head
            || (100..200).contains(&status)
            || status == 204
            || status == 304
        {
            return Ok(Self::Empty);
        }
        if headers.has_token("Transfer-Encoding", "chunked") {
            return Ok(Self::Chunked);
        }
        if let Some(value) = headers.get("Content-Length") {
            let length = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ProtocolError::InvalidContentLength(value.to_owned()))?;
            return Ok(Self::Length(length));
        }
        Ok(Self::UntilClose)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Length { remaining: u64 },
    ChunkSize,
    ChunkData { remaining: u64 },
    ChunkEnd,
    UntilClose,
    Done,
}

/// Readable response body.
///
/// Yields the body bytes in wire order and reports end-of-stream once the
/// framing says the body is complete. Errors carry a [`ChannelError`] or
/// [`ProtocolError`] that [`TransportError::from_io`] recovers.
#[derive(Debug)]
pub struct BodyReader<C> {
    connection: C,
    framing: Framing,
    state: State,
}

impl<C: BorrowMut<Connection>> BodyReader<C> {
    pub(crate) fn new(connection: C, framing: Framing) -> Self {
        let state = match framing {
            Framing::Empty | Framing::Length(0) => State::Done,
            Framing::Length(remaining) => State::Length { remaining },
            Framing::Chunked => State::ChunkSize,
            Framing::UntilClose => State::UntilClose,
        };
        Self {
            connection,
            framing,
            state,
        }
    }

    /// Returns the framing in use.
    #[must_use]
    pub const fn framing(&self) -> Framing {
        self.framing
    }

    /// Returns whether the whole body has been read.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Returns the connection, keeping any bytes read past the body buffered.
    pub fn into_inner(self) -> C {
        self.connection
    }

    /// Returns the connection the body is read from.
    pub fn connection(&self) -> &Connection {
        self.connection.borrow()
    }

    fn read_framed(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            match self.state {
                State::Done => return Ok(0),
                State::UntilClose => {
                    let count = self.connection.borrow_mut().read_into(buf)?;
                    if count == 0 {
                        self.state = State::Done;
                    }
                    return Ok(count);
                }
                State::Length { remaining } => {
                    let count = self.read_limited(buf, remaining)?;
                    let left = remaining - count as u64;
                    self.state = if left == 0 {
                        State::Done
                    } else {
                        State::Length { remaining: left }
                    };
                    return Ok(count);
                }
                State::ChunkSize => {
                    let line = self.next_line()?;
                    let size = parse_chunk_size(&line)?;
                    if size == 0 {
                        self.consume_trailers()?;
                        self.state = State::Done;
                        return Ok(0);
                    }
                    self.state = State::ChunkData { remaining: size };
                }
                State::ChunkData { remaining } => {
                    let count = self.read_limited(buf, remaining)?;
                    let left = remaining - count as u64;
                    self.state = if left == 0 {
                        State::ChunkEnd
                    } else {
                        State::ChunkData { remaining: left }
                    };
                    return Ok(count);
                }
                State::ChunkEnd => {
                    if !self.next_line()?.is_empty() {
                        return Err(ProtocolError::MissingChunkTerminator.into());
                    }
                    self.state = State::ChunkSize;
                }
            }
        }
    }

    fn read_limited(&mut self, buf: &mut [u8], remaining: u64) -> Result<usize, TransportError> {
        let limit = usize::try_from(remaining).map_or(buf.len(), |left| left.min(buf.len()));
        let target = buf.get_mut(..limit).unwrap_or_default();
        if target.is_empty() {
            return Ok(0);
        }
        let count = self.connection.borrow_mut().read_into(target)?;
        if count == 0 {
            return Err(ChannelError::Broken(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("body ended with {remaining} bytes outstanding"),
            ))
            .into());
        }
        Ok(count)
    }

    fn next_line(&mut self) -> Result<Vec<u8>, TransportError> {
        self.connection
            .borrow_mut()
            .read_line(MAX_LINE_LEN)?
            .ok_or_else(|| ChannelError::broken("body ended inside chunk framing").into())
    }

    fn consume_trailers(&mut self) -> Result<(), TransportError> {
        while !self.next_line()?.is_empty() {}
        Ok(())
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ProtocolError> {
    let text = String::from_utf8_lossy(line);
    let size = text.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(size, 16).map_err(|_| ProtocolError::InvalidChunkSize(text.into_owned()))
}

impl<C: BorrowMut<Connection>> Read for BodyReader<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.read_framed(buf).map_err(|error| match error {
            TransportError::Channel(channel) => io::Error::from(channel),
            TransportError::Protocol(protocol) => io::Error::new(io::ErrorKind::InvalidData, protocol),
            other => io::Error::other(other),
        })
    }
}
