//! Shared test support and crate-level behaviour tests.

use std::io::{self, Cursor, Read};
use std::sync::{Arc, Mutex};

use berth_config::EngineEndpoint;

use crate::channel::{Channel, ChannelCloser, ChannelError, ChannelIo};
use crate::descriptor::{ChannelDescriptor, DescriptorSource};
use crate::http::Connection;

#[cfg(unix)]
mod streaming;

/// In-memory channel replaying a fixed input and recording writes.
pub(crate) struct MemoryIo {
    input: Cursor<Vec<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
    write_limit: usize,
    closer: ChannelCloser,
}

impl MemoryIo {
    pub(crate) fn new(input: Vec<u8>) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let io = Self {
            input: Cursor::new(input),
            written: Arc::clone(&written),
            write_limit: usize::MAX,
            closer: ChannelCloser::new(|| {}),
        };
        (io, written)
    }

    pub(crate) const fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = limit;
        self
    }
}

impl ChannelIo for MemoryIo {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        self.input.read(buf).map_err(ChannelError::from_io)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, ChannelError> {
        let count = buf.len().min(self.write_limit);
        self.written
            .lock()
            .map_err(|_| ChannelError::Broken(io::Error::other("poisoned write log")))?
            .extend_from_slice(&buf[..count]);
        Ok(count)
    }

    fn closer(&self) -> ChannelCloser {
        self.closer.clone()
    }
}

pub(crate) fn descriptor() -> ChannelDescriptor {
    ChannelDescriptor::new(
        EngineEndpoint::unix("/var/run/docker.sock"),
        0,
        DescriptorSource::PlatformDefault,
    )
}

pub(crate) fn memory_connection(wire: Vec<u8>) -> (Connection, Arc<Mutex<Vec<u8>>>) {
    let (io, written) = MemoryIo::new(wire);
    let channel = Channel::from_io(descriptor(), Box::new(io));
    (Connection::new(channel), written)
}
