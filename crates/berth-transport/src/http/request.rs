use serde::Serialize;
use strum::{Display, EnumString};

use super::ProtocolError;
use crate::error::TransportError;

/// HTTP methods used by the engine API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Method {
    /// `GET`
    Get,
    /// `HEAD`
    Head,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
}

/// Request to send over a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    upgrade: bool,
}

impl Request {
    /// Creates a request for `path`, which should include any query string.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            upgrade: false,
        }
    }

    /// Creates a `GET` request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// Creates a `POST` request.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a raw body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets a JSON body and its content type.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Serialize`] when `value` cannot be encoded.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, TransportError> {
        let body = serde_json::to_vec(value).map_err(TransportError::Serialize)?;
        Ok(self.header("Content-Type", "application/json").body(body))
    }

    /// Asks the daemon to upgrade the connection to a raw stream.
    #[must_use]
    pub const fn upgrade(mut self) -> Self {
        self.upgrade = true;
        self
    }

    /// Returns the method.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Returns the request target.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns whether the request asks for a connection upgrade.
    #[must_use]
    pub const fn is_upgrade(&self) -> bool {
        self.upgrade
    }

    /// Returns whether a header named `name` was set, ignoring case.
    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }

    /// Serializes the request for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidRequestTarget`] when the path would
    /// break the request line, and [`ProtocolError::InvalidRequestHeader`] when
    /// a header would break the head.
    pub fn to_bytes(&self, host: &str, user_agent: &str) -> Result<Vec<u8>, ProtocolError> {
        if !is_request_target(&self.path) {
            return Err(ProtocolError::InvalidRequestTarget(self.path.clone()));
        }
        check_header("Host", host)?;
        check_header("User-Agent", user_agent)?;
        for (name, value) in &self.headers {
            check_header(name, value)?;
        }

        let mut head = format!("{} {} HTTP/1.1\r\nHost: {host}\r\n", self.method, self.path);
        if !self.has_header("User-Agent") {
            head.push_str(&format!("User-Agent: {user_agent}\r\n"));
        }
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        if let Some(body) = &self.body {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        if self.upgrade {
            head.push_str("Connection: Upgrade\r\nUpgrade: tcp\r\n");
        }
        head.push_str("\r\n");

        let mut bytes = head.into_bytes();
        if let Some(body) = &self.body {
            bytes.extend_from_slice(body);
        }
        Ok(bytes)
    }
}

fn is_request_target(path: &str) -> bool {
    path.starts_with('/') && !path.chars().any(|c| c.is_whitespace() || c.is_control())
}

fn check_header(name: &str, value: &str) -> Result<(), ProtocolError> {
    let name_ok = !name.is_empty()
        && name
            .bytes()
            .all(|byte| byte.is_ascii_graphic() && byte != b':');
    let value_ok = !value.bytes().any(|byte| matches!(byte, b'\r' | b'\n' | 0));
    if name_ok && value_ok {
        Ok(())
    } else {
        Err(ProtocolError::InvalidRequestHeader(name.to_owned()))
    }
}
