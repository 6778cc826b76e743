//! Engine transport: endpoint discovery, local channels and HTTP framing.
//!
//! The crate lets the resource layer talk HTTP/1.1 to a Docker or Podman
//! daemon over whatever the daemon listens on: a Unix domain socket, a
//! Windows named pipe, or TCP with a caller-supplied TLS wrapper.
//!
//! # Architecture
//!
//! Data flows through four layers:
//!
//! 1. [`resolver::resolve`] builds ordered [`ChannelDescriptor`]s from an
//!    explicit address, the environment and platform defaults.
//! 2. [`resolver::Connector`] opens the first reachable candidate as a
//!    [`Channel`], starting a local engine (Podman machine or the rootless
//!    `podman.socket` unit) as a last resort.
//! 3. [`http::Connection`] frames requests and parses responses over the
//!    channel, exposing the body as a [`std::io::Read`].
//! 4. [`Client`] ties these together; streaming bodies are decoded lazily by
//!    `berth-stream`.
//!
//! # Example
//!
//! ```rust,no_run
//! use berth_config::{Config, ProcessEnv};
//! use berth_transport::{Client, Request};
//! use ortho_config::OrthoConfig;
//!
//! let config = Config::load_from_iter(std::env::args_os()).expect("valid configuration");
//! let client = Client::from_config(&config, &ProcessEnv);
//! let response = client.issue_request(Request::get("/_ping")).expect("engine reachable");
//! assert!(response.is_success());
//! ```

pub mod channel;
pub mod client;
pub mod descriptor;
pub mod error;
pub mod http;
pub mod resolver;

#[cfg(test)]
mod tests;

pub use self::channel::{Channel, ChannelCloser, ChannelError, ChannelErrorKind, ChannelIo};
pub use self::client::{Client, EventStream, LogStream};
pub use self::descriptor::{ChannelDescriptor, DescriptorSource};
pub use self::error::{ConnectAttempt, FallbackOutcome, TransportError};
pub use self::http::{HeaderMap, Method, ProtocolError, RawResponse, Request};
pub use self::resolver::{
    Connector, MachineStarter, PodmanMachine, PodmanSocketUnit, SystemOpener, resolve,
};
