use std::borrow::BorrowMut;

use tracing::debug;

use super::body::{BodyReader, Framing};
use super::headers::HeaderMap;
use super::request::Request;
use super::response::RawResponse;
use super::{HTTP_TARGET, ProtocolError};
use crate::channel::{Channel, ChannelCloser, ChannelError};
use crate::error::TransportError;

/// Longest accepted status, header or chunk-size line.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Most headers accepted in one response head.
pub const MAX_HEADERS: usize = 256;

const READ_CHUNK: usize = 8 * 1024;

/// HTTP connection owning one channel and its read buffer.
///
/// Bytes read past the end of a response body stay buffered for the next
/// read. A connection is `Send` but serves one request at a time.
#[derive(Debug)]
pub struct Connection {
    channel: Channel,
    buffer: Vec<u8>,
    start: usize,
}

impl Connection {
    /// Wraps a connected channel.
    #[must_use]
    pub const fn new(channel: Channel) -> Self {
        Self {
            channel,
            buffer: Vec::new(),
            start: 0,
        }
    }

    /// Returns the underlying channel.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Returns a handle that closes the channel from another thread.
    #[must_use]
    pub fn closer(&self) -> ChannelCloser {
        self.channel.closer()
    }

    /// Bytes read from the channel but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        self.buffer.get(self.start..).unwrap_or_default()
    }

    /// Writes `request` to the channel.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Protocol`] when the request cannot be written
    /// as HTTP/1.1 and [`TransportError::Channel`] when the write fails.
    pub fn send(&mut self, request: &Request, user_agent: &str) -> Result<(), TransportError> {
        let host = self.channel.descriptor().endpoint.host_header();
        let bytes = request.to_bytes(&host, user_agent)?;
        debug!(
            target: HTTP_TARGET,
            method = %request.method(),
            path = request.path(),
            endpoint = %self.channel.descriptor().endpoint,
            "sending request"
        );
        self.channel.write_all_bytes(&bytes)?;
        Ok(())
    }

    /// Reads the response to `request`, borrowing the connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Protocol`] for a malformed head and
    /// [`TransportError::Channel`] when the channel fails.
    pub fn read_response(
        &mut self,
        request: &Request,
    ) -> Result<RawResponse<&mut Self>, TransportError> {
        response_for(self, request)
    }

    /// Reads the response to `request`, moving the connection into the body.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::read_response`].
    pub fn into_response(self, request: &Request) -> Result<RawResponse<Self>, TransportError> {
        response_for(self, request)
    }

    /// Reads and parses a response head.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Protocol`] for a malformed head and
    /// [`TransportError::Channel`] when the channel fails.
    pub fn read_head(&mut self) -> Result<(u16, String, HeaderMap), TransportError> {
        let status_line = self
            .read_line(MAX_LINE_LEN)?
            .ok_or(ProtocolError::IncompleteHead)?;
        let (status, reason) = parse_status_line(&status_line)?;

        let mut headers = HeaderMap::new();
        loop {
            let line = self
                .read_line(MAX_LINE_LEN)?
                .ok_or(ProtocolError::IncompleteHead)?;
            if line.is_empty() {
                break;
            }
            if headers.len() >= MAX_HEADERS {
                return Err(ProtocolError::TooManyHeaders { limit: MAX_HEADERS }.into());
            }
            let text = String::from_utf8_lossy(&line);
            let Some((name, value)) = text.split_once(':') else {
                return Err(ProtocolError::MalformedHeader(text.into_owned()).into());
            };
            let name = name.trim();
            if name.is_empty() {
                return Err(ProtocolError::MalformedHeader(text.into_owned()).into());
            }
            headers.insert(name, value.trim());
        }
        debug!(target: HTTP_TARGET, status, headers = headers.len(), "response head parsed");
        Ok((status, reason, headers))
    }

    /// Reads one CRLF or LF terminated line without its terminator.
    ///
    /// Returns `None` when the channel ends first.
    pub(crate) fn read_line(&mut self, limit: usize) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            let pending = self.buffered();
            if let Some(position) = pending.iter().position(|byte| *byte == b'\n') {
                let raw = pending.get(..position).unwrap_or_default();
                let line = raw.strip_suffix(b"\r").unwrap_or(raw).to_vec();
                self.start += position + 1;
                if line.len() > limit {
                    return Err(ProtocolError::LineTooLong { limit }.into());
                }
                return Ok(Some(line));
            }
            if pending.len() > limit {
                return Err(ProtocolError::LineTooLong { limit }.into());
            }
            if self.fill()? == 0 {
                return Ok(None);
            }
        }
    }

    /// Copies buffered bytes into `buf`, reading the channel when empty.
    pub(crate) fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.buffered().is_empty() && self.fill()? == 0 {
            return Ok(0);
        }
        let pending = self.buffered();
        let count = pending.len().min(buf.len());
        if let (Some(target), Some(source)) = (buf.get_mut(..count), pending.get(..count)) {
            target.copy_from_slice(source);
        }
        self.start += count;
        Ok(count)
    }

    fn fill(&mut self) -> Result<usize, ChannelError> {
        if self.start > 0 {
            self.buffer.drain(..self.start);
            self.start = 0;
        }
        let filled = self.buffer.len();
        self.buffer.resize(filled + READ_CHUNK, 0);
        let result = self
            .channel
            .read_some(self.buffer.get_mut(filled..).unwrap_or_default());
        let read = *result.as_ref().unwrap_or(&0);
        self.buffer.truncate(filled + read);
        result
    }
}

fn response_for<C: BorrowMut<Connection>>(
    mut connection: C,
    request: &Request,
) -> Result<RawResponse<C>, TransportError> {
    let (status, reason, headers) = connection.borrow_mut().read_head()?;
    let framing = Framing::for_response(request, status, &headers)?;
    debug!(target: HTTP_TARGET, status, ?framing, "response body framing selected");
    let body = BodyReader::new(connection, framing);
    Ok(RawResponse::new(status, reason, headers, body))
}

fn parse_status_line(line: &[u8]) -> Result<(u16, String), ProtocolError> {
    let text = String::from_utf8_lossy(line);
    let malformed = || ProtocolError::MalformedStatusLine(text.clone().into_owned());
    let mut parts = text.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(malformed());
    }
    let code = parts.next().unwrap_or_default();
    if code.len() != 3 || !code.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(malformed());
    }
    let status = code.parse::<u16>().map_err(|_| malformed())?;
    let reason = parts.next().unwrap_or_default().trim().to_owned();
    Ok((status, reason))
}
