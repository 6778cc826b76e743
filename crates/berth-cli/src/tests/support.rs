//! Fake engine serving canned HTTP responses on a Unix socket.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};

/// Accepts one connection, records the request head and writes `response`.
pub(super) struct FakeEngine {
    socket: PathBuf,
    handle: Option<JoinHandle<Result<String>>>,
}

impl FakeEngine {
    pub(super) fn spawn(socket: PathBuf, response: Vec<u8>) -> Result<Self> {
        let listener = UnixListener::bind(&socket).context("bind fake engine")?;
        let handle = thread::spawn(move || -> Result<String> {
            let (stream, _) = listener.accept().context("accept client")?;
            let mut reader = BufReader::new(stream.try_clone().context("clone stream")?);
            let mut head = String::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).context("read request")? == 0 || line == "\r\n" {
                    break;
                }
                head.push_str(&line);
            }
            let mut writer = stream;
            writer.write_all(&response).context("write response")?;
            writer.flush().context("flush response")?;
            Ok(head)
        });
        Ok(Self {
            socket,
            handle: Some(handle),
        })
    }

    pub(super) fn address(&self) -> String {
        format!("unix://{}", self.socket.display())
    }

    /// Waits for the engine thread and returns the request head it saw.
    pub(super) fn request_head(&mut self) -> Result<String> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("request head already taken"))?;
        handle
            .join()
            .map_err(|_| anyhow!("fake engine thread panicked"))?
    }
}

pub(super) fn json_response(status: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

pub(super) fn chunked_response(events: &[String]) -> Vec<u8> {
    let mut wire =
        b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n"
            .to_vec();
    for event in events {
        let payload = format!("{event}\r\n");
        wire.extend_from_slice(format!("{:x}\r\n{payload}\r\n", payload.len()).as_bytes());
    }
    wire.extend_from_slice(b"0\r\n\r\n");
    wire
}

pub(super) fn multiplexed_response(frames: &[(u8, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (stream, text) in frames {
        let length = u32::try_from(text.len()).unwrap_or(u32::MAX);
        body.extend_from_slice(&[*stream, 0, 0, 0]);
        body.extend_from_slice(&length.to_be_bytes());
        body.extend_from_slice(text.as_bytes());
    }
    let mut wire = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/vnd.docker.multiplexed-stream\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    wire.extend_from_slice(&body);
    wire
}
