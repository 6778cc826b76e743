//! Incremental decoding of engine response bodies.
//!
//! Container engines answer pull, push, build and log requests with bodies
//! that never finish quickly: a chunked stream of concatenated JSON values, or
//! for non-TTY logs a sequence of multiplexed stdout/stderr frames. This crate
//! turns such a byte stream into a lazy sequence of values while the response
//! is still arriving.
//!
//! - [`JsonStreamDecoder`] yields one parsed JSON value per pull, reading
//!   more bytes only when the buffered data holds no complete value.
//! - [`MultiplexedReader`] splits an attach/logs stream into [`LogFrame`]s.
//! - [`ProgressTracker`] collapses repeated per-layer progress updates into
//!   log-ready [`ProgressRecord`]s and an aggregate [`ProgressSummary`].
//!
//! # Example
//!
//! ```rust
//! use berth_stream::{ProgressRecord, ProgressTracker, decode};
//!
//! let body = br#"{"status":"Pulling fs layer","id":"a1"}{"status":"Pulling fs layer","id":"a1"}"#;
//! let mut lines = Vec::new();
//! let mut tracker = ProgressTracker::new(|record: &ProgressRecord| lines.push(record.line.clone()));
//! for event in decode(&body[..]) {
//!     let event = event.expect("valid event");
//!     tracker.observe(&event);
//! }
//! let summary = tracker.finish();
//! assert_eq!(summary.forwarded, 1);
//! assert_eq!(summary.suppressed, 1);
//! ```

pub mod decoder;
pub mod multiplex;
pub mod progress;

#[cfg(test)]
mod tests;

pub use self::decoder::{DecodeError, DecodedEvent, JsonStreamDecoder, decode, decode_as};
pub use self::multiplex::{LogFrame, MultiplexError, MultiplexedReader, StdStream};
pub use self::progress::{
    LayerState, ProgressKind, ProgressObserver, ProgressRecord, ProgressSummary, ProgressTracker,
    TracingObserver, Tracked,
};
