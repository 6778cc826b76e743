//! Request facade used by the resource layer.
//!
//! Each call resolves nothing new: the candidate list is fixed when the
//! [`Client`] is built, and every request opens a fresh connection, sends
//! `Connection: close`, and hands the body back to the caller.

use berth_config::{Config, EnvSource, LogTarget};
use berth_stream::{
    JsonStreamDecoder, LogFrame, MultiplexError, MultiplexedReader, ProgressObserver,
    ProgressSummary, ProgressTracker, decode,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::channel::ChannelCloser;
use crate::descriptor::ChannelDescriptor;
use crate::error::TransportError;
use crate::http::{BodyReader, Connection, RawResponse, Request};
use crate::resolver::{Connector, resolve};

const CLIENT_TARGET: &str = LogTarget::Client.as_str();

/// Default `User-Agent` header value.
pub const DEFAULT_USER_AGENT: &str = concat!("berth/", env!("CARGO_PKG_VERSION"));

/// Entry point for issuing engine API requests.
pub struct Client {
    candidates: Vec<ChannelDescriptor>,
    connector: Connector,
    user_agent: String,
}

impl Client {
    /// Creates a client over a fixed candidate list.
    #[must_use]
    pub fn new(candidates: Vec<ChannelDescriptor>, connector: Connector) -> Self {
        Self {
            candidates,
            connector,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }

    /// Resolves candidates from `config` and `env` and uses the system
    /// transports.
    #[must_use]
    pub fn from_config(config: &Config, env: &dyn EnvSource) -> Self {
        Self::new(resolve(config.host(), env), Connector::from_config(config))
    }

    /// Overrides the `User-Agent` header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Returns the candidates in trial order.
    #[must_use]
    pub fn candidates(&self) -> &[ChannelDescriptor] {
        &self.candidates
    }

    /// Opens a connection to the first reachable candidate.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::EndpointUnreachable`] when nothing answers.
    pub fn connect(&self) -> Result<Connection, TransportError> {
        self.connector
            .connect(&self.candidates)
            .map(Connection::new)
    }

    /// Sends `request` on a new connection and returns the response head.
    ///
    /// Non-success statuses are returned, not raised.
    ///
    /// # Errors
    ///
    /// Returns connection, channel and protocol errors.
    pub fn issue_request(&self, request: Request) -> Result<RawResponse, TransportError> {
        let request = if request.is_upgrade() || request.has_header("Connection") {
            request
        } else {
            request.header("Connection", "close")
        };
        let mut connection = self.connect()?;
        connection.send(&request, &self.user_agent)?;
        let response = connection.into_response(&request)?;
        debug!(
            target: CLIENT_TARGET,
            method = %request.method(),
            path = request.path(),
            status = response.status(),
            "engine responded"
        );
        Ok(response)
    }

    /// Sends `request` and returns the body as a lazy stream of JSON events.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Api`] for a non-success status, plus the
    /// errors of [`Client::issue_request`].
    pub fn issue_streaming_request(&self, request: Request) -> Result<EventStream, TransportError> {
        let body = self.issue_raw_stream(request)?;
        Ok(EventStream::new(body))
    }

    /// Sends `request` and returns the body reader of a successful response.
    ///
    /// # Errors
    ///
    /// Same as [`Client::issue_streaming_request`].
    pub fn issue_raw_stream(
        &self,
        request: Request,
    ) -> Result<BodyReader<Connection>, TransportError> {
        let response = self.issue_request(request)?;
        if !response.is_success() {
            let error = response.into_api_error();
            warn!(target: CLIENT_TARGET, %error, "streaming request rejected");
            return Err(error);
        }
        Ok(response.into_body())
    }

    /// Streams a progress request through a [`ProgressTracker`].
    ///
    /// Engine-reported errors are forwarded to `observer` and returned in the
    /// summary; transport and decode errors end the stream and are returned.
    ///
    /// # Errors
    ///
    /// Returns the first transport or decode error.
    pub fn stream_progress<O: ProgressObserver>(
        &self,
        request: Request,
        observer: O,
    ) -> Result<ProgressSummary, TransportError> {
        let events = self.issue_streaming_request(request)?;
        let mut tracked = ProgressTracker::new(observer).track(events);
        for record in tracked.by_ref() {
            record?;
        }
        Ok(tracked.into_summary())
    }

    /// Streams container output, demultiplexing it unless the container has a
    /// TTY.
    ///
    /// # Errors
    ///
    /// Same as [`Client::issue_raw_stream`].
    pub fn stream_logs(&self, request: Request, tty: bool) -> Result<LogStream, TransportError> {
        let body = self.issue_raw_stream(request)?;
        if tty {
            Ok(LogStream::raw(body))
        } else {
            Ok(LogStream::multiplexed(body))
        }
    }
}

/// Lazy sequence of JSON events from a streaming response.
///
/// Dropping the stream closes the connection.
pub struct EventStream {
    decoder: JsonStreamDecoder<BodyReader<Connection>>,
    closer: ChannelCloser,
}

impl EventStream {
    /// Decodes events from a response body.
    #[must_use]
    pub fn new(body: BodyReader<Connection>) -> Self {
        let closer = body.connection().closer();
        Self {
            decoder: decode(body),
            closer,
        }
    }

    /// Returns a handle that aborts the stream from another thread.
    #[must_use]
    pub fn closer(&self) -> ChannelCloser {
        self.closer.clone()
    }
}

impl Iterator for EventStream {
    type Item = Result<Value, TransportError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder
            .next()
            .map(|item| item.map_err(TransportError::from_decode))
    }
}

/// Container output returned by [`Client::stream_logs`].
///
/// The stream is fused: once it ends or yields an error, every later call
/// returns `None`.
pub struct LogStream {
    source: LogSource,
    finished: bool,
}

enum LogSource {
    Raw(BodyReader<Connection>),
    Multiplexed(MultiplexedReader<BodyReader<Connection>>),
}

impl LogStream {
    fn raw(body: BodyReader<Connection>) -> Self {
        Self {
            source: LogSource::Raw(body),
            finished: false,
        }
    }

    fn multiplexed(body: BodyReader<Connection>) -> Self {
        Self {
            source: LogSource::Multiplexed(MultiplexedReader::new(body)),
            finished: false,
        }
    }

    /// Returns whether the output is an undivided TTY stream.
    #[must_use]
    pub const fn is_raw(&self) -> bool {
        matches!(self.source, LogSource::Raw(_))
    }

    /// Returns the next frame; raw streams report every chunk as stdout.
    ///
    /// # Errors
    ///
    /// Returns the framing or transport error that ended the stream.
    pub fn next_frame(&mut self) -> Option<Result<LogFrame, TransportError>> {
        if self.finished {
            return None;
        }
        let item = match &mut self.source {
            LogSource::Raw(body) => read_raw_frame(body),
            LogSource::Multiplexed(frames) => frames.next().map(|frame| {
                frame.map_err(|error| match error {
                    MultiplexError::Io(io_error) => TransportError::from_io(io_error),
                    other => TransportError::Channel(crate::channel::ChannelError::Broken(
                        std::io::Error::new(std::io::ErrorKind::InvalidData, other),
                    )),
                })
            }),
        };
        if !matches!(item, Some(Ok(_))) {
            self.finished = true;
        }
        item
    }
}

fn read_raw_frame(body: &mut BodyReader<Connection>) -> Option<Result<LogFrame, TransportError>> {
    let mut buf = vec![0_u8; 8 * 1024];
    match std::io::Read::read(body, &mut buf) {
        Ok(0) => None,
        Ok(count) => {
            buf.truncate(count);
            Some(Ok(LogFrame {
                stream: berth_stream::StdStream::Stdout,
                payload: buf,
            }))
        }
        Err(error) => Some(Err(TransportError::from_io(error))),
    }
}

impl Iterator for LogStream {
    type Item = Result<LogFrame, TransportError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame()
    }
}
