//! Minimal HTTP/1.1 framing over a [`Channel`](crate::channel::Channel).
//!
//! Only what the engine API needs is implemented: request serialization,
//! response head parsing and the three body framings (content length,
//! chunked, until close). Connection reuse is left to the caller.

use berth_config::LogTarget;
use thiserror::Error;

mod body;
mod connection;
mod headers;
mod request;
mod response;

pub use self::body::{BodyReader, Framing};
pub use self::connection::{Connection, MAX_HEADERS, MAX_LINE_LEN};
pub use self::headers::HeaderMap;
pub use self::request::{Method, Request};
pub use self::response::RawResponse;

pub(crate) const HTTP_TARGET: &str = LogTarget::Http.as_str();

/// Violations of the HTTP framing rules.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The status line is not `HTTP/1.x <code> <reason>`.
    #[error("malformed status line '{0}'")]
    MalformedStatusLine(String),
    /// A header line has no colon.
    #[error("malformed header line '{0}'")]
    MalformedHeader(String),
    /// A head or chunk line exceeded the length limit.
    #[error("line longer than {limit} bytes")]
    LineTooLong {
        /// Maximum accepted line length.
        limit: usize,
    },
    /// The response carried more headers than allowed.
    #[error("more than {limit} response headers")]
    TooManyHeaders {
        /// Maximum accepted header count.
        limit: usize,
    },
    /// The channel ended before the blank line closing the head.
    #[error("connection closed inside the response head")]
    IncompleteHead,
    /// `Content-Length` is not a non-negative integer.
    #[error("invalid Content-Length '{0}'")]
    InvalidContentLength(String),
    /// A chunk size line is not hexadecimal.
    #[error("invalid chunk size '{0}'")]
    InvalidChunkSize(String),
    /// Chunk data was not followed by CRLF.
    #[error("chunk data not terminated by CRLF")]
    MissingChunkTerminator,
    /// The request target is empty, relative, or holds whitespace or control
    /// characters.
    #[error("invalid request target '{0}'")]
    InvalidRequestTarget(String),
    /// A header name is not a token, or a value holds CR, LF or NUL.
    #[error("invalid request header '{0}'")]
    InvalidRequestHeader(String),
}
