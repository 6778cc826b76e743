use std::borrow::BorrowMut;
use std::io::Read;

use berth_stream::DecodeError;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::body::BodyReader;
use super::connection::Connection;
use super::headers::HeaderMap;
use crate::error::TransportError;

/// Largest error body read when building [`TransportError::Api`].
pub(crate) const MAX_ERROR_BODY: u64 = 64 * 1024;

/// Response whose body has not been read yet.
///
/// Non-success statuses are returned as-is; callers decide what they mean.
#[derive(Debug)]
pub struct RawResponse<C = Connection> {
    status: u16,
    reason: String,
    headers: HeaderMap,
    body: BodyReader<C>,
}

impl<C: BorrowMut<Connection>> RawResponse<C> {
    pub(crate) const fn new(
        status: u16,
        reason: String,
        headers: HeaderMap,
        body: BodyReader<C>,
    ) -> Self {
        Self {
            status,
            reason,
            headers,
            body,
        }
    }

    /// Returns the status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Returns the reason phrase.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns the response headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Returns the body reader.
    pub const fn body(&mut self) -> &mut BodyReader<C> {
        &mut self.body
    }

    /// Consumes the response, returning the body reader.
    pub fn into_body(self) -> BodyReader<C> {
        self.body
    }

    /// Reads the whole body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Channel`] or [`TransportError::Protocol`] when
    /// the body cannot be read.
    pub fn bytes(mut self) -> Result<Vec<u8>, TransportError> {
        let mut bytes = Vec::new();
        self.body
            .read_to_end(&mut bytes)
            .map_err(TransportError::from_io)?;
        Ok(bytes)
    }

    /// Reads the whole body as text, replacing invalid UTF-8.
    ///
    /// # Errors
    ///
    /// Same as [`RawResponse::bytes`].
    pub fn text(self) -> Result<String, TransportError> {
        let bytes = self.bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads the whole body as one JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Decode`] when the body is not valid JSON for
    /// `T`, or the errors of [`RawResponse::bytes`].
    pub fn json<T: DeserializeOwned>(self) -> Result<T, TransportError> {
        let bytes = self.bytes()?;
        serde_json::from_slice(&bytes)
            .map_err(|error| TransportError::Decode(DecodeError::Malformed(error)))
    }

    /// Returns the response unchanged when it succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Api`] carrying the daemon's message for any
    /// non-2xx status.
    pub fn error_for_status(self) -> Result<Self, TransportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_api_error())
        }
    }

    /// Drains a bounded prefix of the body into [`TransportError::Api`].
    ///
    /// The daemon's `message` field is used when the body is JSON; otherwise
    /// the body text, or the reason phrase for an empty body.
    pub(crate) fn into_api_error(self) -> TransportError {
        let status = self.status;
        let reason = self.reason.clone();
        let mut bytes = Vec::new();
        let mut limited = self.body.take(MAX_ERROR_BODY);
        if let Err(error) = limited.read_to_end(&mut bytes) {
            tracing::debug!(target: super::HTTP_TARGET, %error, "error body truncated");
        }
        TransportError::Api {
            status,
            message: api_message(&bytes, &reason),
        }
    }
}

fn api_message(body: &[u8], reason: &str) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(body) {
        if let Some(message) = fields.get("message").and_then(Value::as_str) {
            return message.to_owned();
        }
    }
    let text = String::from_utf8_lossy(body).trim().to_owned();
    if text.is_empty() {
        reason.to_owned()
    } else {
        text
    }
}
