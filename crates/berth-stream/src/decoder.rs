//! Lazy decoding of concatenated JSON values from a byte stream.
//!
//! The engine writes progress and event streams as JSON values back to back,
//! usually one per line but with no guarantee that a value arrives in a single
//! read. [`JsonStreamDecoder`] keeps a growable buffer and a cursor: each pull
//! tries to parse one value at the cursor and only reads from the underlying
//! stream when the buffered bytes hold no complete value.

use std::io::{self, Read};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::{Deserializer, Value};
use thiserror::Error;
use tracing::debug;

const DECODER_TARGET: &str = "berth::stream::decoder";

/// Size of each read issued against the underlying stream.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Untyped event produced by [`decode`].
pub type DecodedEvent = Value;

/// Errors ending a decoded sequence.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The stream ended part-way through a value.
    #[error("stream ended inside a JSON value ({pending} bytes pending)")]
    Truncated {
        /// Bytes of the incomplete value left in the buffer.
        pending: usize,
    },
    /// The buffered bytes are not valid JSON.
    #[error("malformed JSON in event stream: {0}")]
    Malformed(#[source] serde_json::Error),
    /// Reading the underlying stream failed.
    #[error("failed to read event stream: {0}")]
    Io(#[source] io::Error),
}

/// Iterator over the JSON values of a byte stream.
///
/// The sequence is single-pass and fused: after it ends, or after the first
/// error, every further pull returns `None`.
pub struct JsonStreamDecoder<R, T = DecodedEvent> {
    reader: R,
    buffer: Vec<u8>,
    offset: usize,
    chunk_size: usize,
    eof: bool,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

/// Decodes `reader` into untyped JSON values.
pub fn decode<R: Read>(reader: R) -> JsonStreamDecoder<R> {
    JsonStreamDecoder::new(reader)
}

/// Decodes `reader` into values of type `T`.
pub fn decode_as<T: DeserializeOwned, R: Read>(reader: R) -> JsonStreamDecoder<R, T> {
    JsonStreamDecoder::new(reader)
}

enum Step<T> {
    Emit(T, usize),
    NeedMore,
    End,
    Fail(DecodeError),
}

impl<R: Read, T: DeserializeOwned> JsonStreamDecoder<R, T> {
    /// Wraps `reader` using [`DEFAULT_CHUNK_SIZE`] reads.
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            offset: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            eof: false,
            finished: false,
            _marker: PhantomData,
        }
    }

    /// Overrides the read size; zero is treated as one byte.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Bytes read from the stream but not yet consumed by a decoded value.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        self.buffer.get(self.offset..).unwrap_or_default()
    }

    /// Returns the underlying reader, discarding any buffered bytes.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn step(&self) -> Step<T> {
        let pending = self.pending();
        let start = pending
            .iter()
            .position(|byte| !byte.is_ascii_whitespace())
            .unwrap_or(pending.len());
        let value_bytes = pending.get(start..).unwrap_or_default();
        if value_bytes.is_empty() {
            return if self.eof { Step::End } else { Step::NeedMore };
        }

        let mut stream = Deserializer::from_slice(value_bytes).into_iter::<T>();
        match stream.next() {
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                // A number at the very end of the buffer may continue in the
                // next chunk.
                if !self.eof && consumed == value_bytes.len() && starts_number(value_bytes) {
                    return Step::NeedMore;
                }
                Step::Emit(value, start + consumed)
            }
            Some(Err(error)) if error.is_eof() => {
                if self.eof {
                    Step::Fail(DecodeError::Truncated {
                        pending: value_bytes.len(),
                    })
                } else {
                    Step::NeedMore
                }
            }
            Some(Err(error)) => Step::Fail(DecodeError::Malformed(error)),
            None => {
                if self.eof {
                    Step::End
                } else {
                    Step::NeedMore
                }
            }
        }
    }

    fn fill(&mut self) -> Result<(), DecodeError> {
        if self.offset > 0 {
            self.buffer.drain(..self.offset);
            self.offset = 0;
        }
        let filled = self.buffer.len();
        self.buffer.resize(filled + self.chunk_size, 0);
        let read = loop {
            let target = self.buffer.get_mut(filled..).unwrap_or_default();
            match self.reader.read(target) {
                Ok(count) => break count,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    self.buffer.truncate(filled);
                    return Err(DecodeError::Io(error));
                }
            }
        };
        self.buffer.truncate(filled + read);
        if read == 0 {
            self.eof = true;
        }
        Ok(())
    }
}

fn starts_number(bytes: &[u8]) -> bool {
    bytes
        .first()
        .is_some_and(|byte| *byte == b'-' || byte.is_ascii_digit())
}

impl<R: Read, T: DeserializeOwned> Iterator for JsonStreamDecoder<R, T> {
    type Item = Result<T, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            match self.step() {
                Step::Emit(value, consumed) => {
                    self.offset += consumed;
                    return Some(Ok(value));
                }
                Step::NeedMore => {
                    if let Err(error) = self.fill() {
                        return Some(Err(self.fail(error)));
                    }
                }
                Step::End => {
                    self.finished = true;
                    self.buffer.clear();
                    self.offset = 0;
                    return None;
                }
                Step::Fail(error) => return Some(Err(self.fail(error))),
            }
        }
    }
}

impl<R, T> JsonStreamDecoder<R, T> {
    fn fail(&mut self, error: DecodeError) -> DecodeError {
        debug!(target: DECODER_TARGET, error = %error, "event stream decoding stopped");
        self.finished = true;
        self.buffer.clear();
        self.offset = 0;
        error
    }
}

impl<R, T> std::iter::FusedIterator for JsonStreamDecoder<R, T>
where
    R: Read,
    T: DeserializeOwned,
{
}
