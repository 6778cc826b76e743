//! Named pipe channels.
//!
//! [`NamedPipeChannel`] gives socket semantics to a lower-level
//! [`PipeHandle`]. A broken or disconnected pipe is a clean end-of-stream. A
//! read that returns no bytes without that signal is retried with a short
//! backoff, since only an explicit closure means the peer is gone.

use std::io;
use std::thread;
use std::time::Duration;

use tracing::debug;

use super::{CHANNEL_TARGET, ChannelCloser, ChannelError, ChannelIo};

/// Consecutive empty reads tolerated before the pipe is treated as broken.
pub const MAX_EMPTY_READS: u32 = 50;

/// Pause between empty reads.
pub const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(10);

/// Interval between attempts to open a busy pipe.
pub const PIPE_BUSY_RETRY: Duration = Duration::from_millis(100);

/// Outcome of one read from a [`PipeHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeRead {
    /// This many bytes were read.
    Data(usize),
    /// The peer closed its end of the pipe.
    Closed,
    /// The read returned no bytes and no closure signal.
    Empty,
}

/// Platform pipe primitive driven by [`NamedPipeChannel`].
pub trait PipeHandle: Send {
    /// Performs one blocking read.
    ///
    /// # Errors
    ///
    /// Returns the OS error for failures other than peer closure.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<PipeRead>;

    /// Performs one blocking write.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the write fails.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Returns a function that cancels I/O pending on this handle.
    fn canceller(&self) -> Box<dyn Fn() + Send + Sync>;
}

/// Socket-like channel over a named pipe.
pub struct NamedPipeChannel<H> {
    handle: H,
    closer: ChannelCloser,
    max_empty_reads: u32,
    empty_read_backoff: Duration,
}

impl<H: PipeHandle> NamedPipeChannel<H> {
    /// Wraps an opened pipe handle.
    pub fn new(handle: H) -> Self {
        let cancel = handle.canceller();
        Self {
            handle,
            closer: ChannelCloser::new(cancel),
            max_empty_reads: MAX_EMPTY_READS,
            empty_read_backoff: EMPTY_READ_BACKOFF,
        }
    }

    /// Overrides the empty-read tolerance.
    #[must_use]
    pub const fn with_empty_read_policy(mut self, max_empty_reads: u32, backoff: Duration) -> Self {
        self.max_empty_reads = max_empty_reads;
        self.empty_read_backoff = backoff;
        self
    }
}

impl<H: PipeHandle> ChannelIo for NamedPipeChannel<H> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut empty_reads = 0_u32;
        loop {
            match self.handle.read(buf).map_err(ChannelError::from_io)? {
                PipeRead::Data(count) => return Ok(count),
                PipeRead::Closed => {
                    debug!(target: CHANNEL_TARGET, "named pipe closed by peer");
                    return Ok(0);
                }
                PipeRead::Empty => {
                    if self.closer.is_closed() {
                        return Err(ChannelError::broken("named pipe closed during read"));
                    }
                    empty_reads += 1;
                    if empty_reads > self.max_empty_reads {
                        return Err(ChannelError::broken(
                            "named pipe returned no data without closing",
                        ));
                    }
                    thread::sleep(self.empty_read_backoff);
                }
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, ChannelError> {
        self.handle.write(buf).map_err(ChannelError::from_io)
    }

    fn closer(&self) -> ChannelCloser {
        self.closer.clone()
    }
}

#[cfg(windows)]
pub use self::windows::FilePipe;

#[cfg(windows)]
mod windows {
    use std::ffi::c_void;
    use std::fs::{File, OpenOptions};
    use std::io::{self, Read, Write};
    use std::os::windows::io::AsRawHandle;
    use std::sync::{Arc, Weak};
    use std::thread;
    use std::time::{Duration, Instant};

    use tracing::debug;

    use super::{PIPE_BUSY_RETRY, PipeHandle, PipeRead};
    use crate::channel::{CHANNEL_TARGET, ChannelError};

    const ERROR_BROKEN_PIPE: i32 = 109;
    const ERROR_PIPE_BUSY: i32 = 231;
    const ERROR_PIPE_NOT_CONNECTED: i32 = 233;

    #[link(name = "kernel32")]
    unsafe extern "system" {
        fn CancelIoEx(handle: *mut c_void, overlapped: *mut c_void) -> i32;
    }

    /// Named pipe opened through the filesystem API.
    pub struct FilePipe {
        file: Arc<File>,
    }

    impl FilePipe {
        /// Opens `path` for reading and writing.
        ///
        /// A busy pipe is retried until `timeout` elapses; a missing pipe
        /// fails at once.
        ///
        /// # Errors
        ///
        /// Returns [`ChannelError::Refused`] for a missing pipe and
        /// [`ChannelError::Timeout`] when the pipe stays busy.
        pub fn open(path: &str, timeout: Duration) -> Result<Self, ChannelError> {
            let deadline = Instant::now() + timeout;
            loop {
                match OpenOptions::new().read(true).write(true).open(path) {
                    Ok(file) => {
                        return Ok(Self {
                            file: Arc::new(file),
                        });
                    }
                    Err(error) if error.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                        if Instant::now() >= deadline {
                            return Err(ChannelError::Timeout(error));
                        }
                        debug!(target: CHANNEL_TARGET, path, "named pipe busy; retrying");
                        thread::sleep(PIPE_BUSY_RETRY);
                    }
                    Err(error) => return Err(ChannelError::from_io(error)),
                }
            }
        }
    }

    impl PipeHandle for FilePipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<PipeRead> {
            match (&*self.file).read(buf) {
                Ok(0) => Ok(PipeRead::Empty),
                Ok(count) => Ok(PipeRead::Data(count)),
                Err(error)
                    if matches!(
                        error.raw_os_error(),
                        Some(ERROR_BROKEN_PIPE | ERROR_PIPE_NOT_CONNECTED)
                    ) =>
                {
                    Ok(PipeRead::Closed)
                }
                Err(error) => Err(error),
            }
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            (&*self.file).write(buf)
        }

        fn canceller(&self) -> Box<dyn Fn() + Send + Sync> {
            let file: Weak<File> = Arc::downgrade(&self.file);
            Box::new(move || {
                if let Some(file) = file.upgrade() {
                    // SAFETY: the handle stays valid while `file` is alive and a
                    // null overlapped pointer cancels every pending operation.
                    let cancelled =
                        unsafe { CancelIoEx(file.as_raw_handle(), std::ptr::null_mut()) };
                    if cancelled == 0 {
                        debug!(target: CHANNEL_TARGET, error = %io::Error::last_os_error(), "pipe cancellation failed");
                    }
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use rstest::rstest;

    use super::*;
    use crate::channel::ChannelErrorKind;

    /// Pipe handle replaying a fixed script of read outcomes.
    struct ScriptedPipe {
        reads: VecDeque<io::Result<Vec<u8>>>,
        closed_after_script: bool,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl ScriptedPipe {
        fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                reads: reads.into(),
                closed_after_script: true,
                written: Arc::default(),
            }
        }
    }

    impl PipeHandle for ScriptedPipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<PipeRead> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) if bytes.is_empty() => Ok(PipeRead::Empty),
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(PipeRead::Data(bytes.len()))
                }
                Some(Err(error)) => Err(error),
                None if self.closed_after_script => Ok(PipeRead::Closed),
                None => Ok(PipeRead::Empty),
            }
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn canceller(&self) -> Box<dyn Fn() + Send + Sync> {
            Box::new(|| {})
        }
    }

    #[test]
    fn empty_reads_are_retried_until_data_arrives() {
        let pipe = ScriptedPipe::new(vec![Ok(Vec::new()), Ok(Vec::new()), Ok(b"ok".to_vec())]);
        let mut channel = NamedPipeChannel::new(pipe).with_empty_read_policy(5, Duration::ZERO);
        let mut buf = [0_u8; 8];
        assert_eq!(channel.read(&mut buf).expect("read"), 2);
        assert_eq!(&buf[..2], b"ok");
        assert_eq!(channel.read(&mut buf).expect("eof"), 0);
    }

    #[test]
    fn endless_empty_reads_break_the_channel() {
        let mut pipe = ScriptedPipe::new(Vec::new());
        pipe.closed_after_script = false;
        let mut channel = NamedPipeChannel::new(pipe).with_empty_read_policy(3, Duration::ZERO);
        let error = channel.read(&mut [0_u8; 8]).expect_err("broken");
        assert_eq!(error.kind(), ChannelErrorKind::Broken);
    }

    #[rstest]
    #[case::reset(io::ErrorKind::ConnectionReset, ChannelErrorKind::Reset)]
    #[case::aborted_io(io::ErrorKind::Interrupted, ChannelErrorKind::Broken)]
    fn read_failures_are_classified(
        #[case] kind: io::ErrorKind,
        #[case] expected: ChannelErrorKind,
    ) {
        let pipe = ScriptedPipe::new(vec![Err(io::Error::new(kind, "pipe failure"))]);
        let mut channel = NamedPipeChannel::new(pipe);
        let error = channel.read(&mut [0_u8; 8]).expect_err("read fails");
        assert_eq!(error.kind(), expected);
    }

    #[test]
    fn closing_stops_empty_read_retries() {
        let mut pipe = ScriptedPipe::new(Vec::new());
        pipe.closed_after_script = false;
        let mut channel = NamedPipeChannel::new(pipe);
        channel.closer().close();
        let error = channel.read(&mut [0_u8; 8]).expect_err("closed");
        assert_eq!(error.kind(), ChannelErrorKind::Broken);
    }

    #[test]
    fn writes_pass_through() {
        let pipe = ScriptedPipe::new(Vec::new());
        let written = Arc::clone(&pipe.written);
        let mut channel = NamedPipeChannel::new(pipe);
        assert_eq!(channel.write(b"HEAD / HTTP/1.1").expect("write"), 15);
        assert_eq!(written.lock().expect("lock").as_slice(), b"HEAD / HTTP/1.1");
    }
}
