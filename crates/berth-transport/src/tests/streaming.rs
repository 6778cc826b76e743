//! End-to-end client tests against a scripted engine on a Unix socket.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixListener;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use berth_config::EngineEndpoint;
use berth_stream::{ProgressRecord, StdStream};
use serde_json::json;
use tempfile::TempDir;

use crate::client::Client;
use crate::descriptor::{ChannelDescriptor, DescriptorSource};
use crate::error::TransportError;
use crate::http::Request;
use crate::resolver::{Connector, SystemOpener};

struct ScriptedEngine {
    _dir: TempDir,
    client: Client,
    server: JoinHandle<Result<String>>,
}

/// Serves one connection: reads the request head, then writes `chunks` with a
/// short pause between them. With `hold_open` the server keeps the socket
/// until the client shuts it down.
fn scripted_engine(chunks: Vec<Vec<u8>>, hold_open: bool) -> Result<ScriptedEngine> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let path = dir.path().join("engine.sock");
    let listener = UnixListener::bind(&path).context("bind engine socket")?;
    let server = thread::spawn(move || -> Result<String> {
        let (stream, _) = listener.accept().context("accept client")?;
        let mut reader = BufReader::new(stream.try_clone().context("clone stream")?);
        let mut head = String::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).context("read request line")? == 0 {
                break;
            }
            head.push_str(&line);
            if line == "\r\n" {
                break;
            }
        }
        let mut writer = stream;
        for chunk in chunks {
            writer.write_all(&chunk).context("write chunk")?;
            writer.flush().context("flush chunk")?;
            thread::sleep(Duration::from_millis(5));
        }
        if hold_open {
            let mut rest = Vec::new();
            reader.read_to_end(&mut rest).context("wait for client close")?;
        }
        Ok(head)
    });

    let endpoint = EngineEndpoint::unix(
        camino::Utf8PathBuf::from_path_buf(path)
            .map_err(|path| anyhow::anyhow!("non UTF-8 socket path {}", path.display()))?,
    );
    let candidates = vec![ChannelDescriptor::new(endpoint, 0, DescriptorSource::Override)];
    let connector = Connector::new(Box::new(SystemOpener::new()))
        .with_connect_timeout(Duration::from_secs(1));
    Ok(ScriptedEngine {
        _dir: dir,
        client: Client::new(candidates, connector).with_user_agent("berth-test"),
        server,
    })
}

fn chunk(payload: &str) -> Vec<u8> {
    format!("{:x}\r\n{payload}\r\n", payload.len()).into_bytes()
}

fn chunked_head() -> Vec<u8> {
    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n"
        .to_vec()
}

#[test]
fn pull_progress_is_deduplicated_across_chunks() -> Result<()> {
    let update = json!({"status": "Downloading", "id": "a", "progressDetail": {"current": 5, "total": 10}})
        .to_string();
    let mut chunks = vec![chunked_head()];
    // The first update is split across two chunks.
    let (left, right) = update.split_at(7);
    chunks.push(chunk(left));
    chunks.push(chunk(&format!("{right}\r\n")));
    for _ in 0..4 {
        chunks.push(chunk(&format!("{update}\r\n")));
    }
    chunks.push(chunk(
        &json!({"status": "Status: Downloaded newer image for alpine:latest"}).to_string(),
    ));
    chunks.push(b"0\r\n\r\n".to_vec());

    let engine = scripted_engine(chunks, false)?;
    let mut lines = Vec::new();
    let summary = engine.client.stream_progress(
        Request::post("/images/create?fromImage=alpine&tag=latest"),
        |record: &ProgressRecord| lines.push(record.line.clone()),
    )?;
    let head = engine
        .server
        .join()
        .map_err(|_| anyhow::anyhow!("server thread panicked"))??;

    assert!(head.starts_with("POST /images/create?fromImage=alpine&tag=latest HTTP/1.1\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert!(head.contains("User-Agent: berth-test\r\n"));
    assert_eq!(summary.forwarded, 2);
    assert_eq!(summary.suppressed, 4);
    assert!(!summary.is_failed());
    assert_eq!(
        lines,
        ["a: Downloading", "Status: Downloaded newer image for alpine:latest"]
    );
    Ok(())
}

#[test]
fn engine_errors_mark_the_push_failed() -> Result<()> {
    let error_event = json!({
        "errorDetail": {"message": "denied: requested access to the resource is denied"},
        "error": "denied: requested access to the resource is denied",
    });
    let chunks = vec![
        chunked_head(),
        chunk(&json!({"status": "The push refers to repository [docker.io/library/app]"}).to_string()),
        chunk(&error_event.to_string()),
        b"0\r\n\r\n".to_vec(),
    ];
    let engine = scripted_engine(chunks, false)?;
    let summary = engine
        .client
        .stream_progress(Request::post("/images/app/push"), |_: &ProgressRecord| {})?;
    assert!(summary.is_failed());
    assert_eq!(
        summary.error.as_deref(),
        Some("denied: requested access to the resource is denied")
    );
    Ok(())
}

#[test]
fn rejected_streaming_requests_surface_the_api_message() -> Result<()> {
    let body = json!({"message": "pull access denied for nope"}).to_string();
    let response = format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let engine = scripted_engine(vec![response.into_bytes()], false)?;
    let Err(error) = engine
        .client
        .issue_streaming_request(Request::post("/images/create?fromImage=nope"))
    else {
        anyhow::bail!("expected the request to be rejected");
    };
    match error {
        TransportError::Api { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "pull access denied for nope");
        }
        other => anyhow::bail!("expected Api error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn truncated_stream_reports_broken_channel() -> Result<()> {
    let chunks = vec![
        chunked_head(),
        chunk(&json!({"status": "Pulling fs layer", "id": "b"}).to_string()),
    ];
    let engine = scripted_engine(chunks, false)?;
    let items: Vec<_> = engine
        .client
        .issue_streaming_request(Request::post("/images/create?fromImage=busybox"))?
        .collect();
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(matches!(items[1], Err(TransportError::Channel(_))), "{:?}", items[1]);
    Ok(())
}

#[test]
fn closer_aborts_an_idle_event_stream() -> Result<()> {
    let chunks = vec![
        chunked_head(),
        chunk(&json!({"Type": "container", "Action": "start"}).to_string()),
    ];
    let engine = scripted_engine(chunks, true)?;
    let mut events = engine
        .client
        .issue_streaming_request(Request::get("/events"))?;
    let first = events.next().context("first event")??;
    assert_eq!(first["Action"], "start");

    let closer = events.closer();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        closer.close();
    });
    let started = Instant::now();
    let next = events.next();
    canceller
        .join()
        .map_err(|_| anyhow::anyhow!("canceller panicked"))?;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(next, Some(Err(TransportError::Channel(_)))), "{next:?}");
    Ok(())
}

#[test]
fn logs_are_demultiplexed() -> Result<()> {
    let mut body = vec![1_u8, 0, 0, 0, 0, 0, 0, 6];
    body.extend_from_slice(b"ready\n");
    body.extend_from_slice(&[2, 0, 0, 0, 0, 0, 0, 5]);
    body.extend_from_slice(b"warn\n");
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/vnd.docker.multiplexed-stream\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(&body);

    let engine = scripted_engine(vec![response], false)?;
    let frames = engine
        .client
        .stream_logs(Request::get("/containers/web/logs?stdout=1&stderr=1"), false)?
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].stream, StdStream::Stdout);
    assert_eq!(frames[0].text(), "ready\n");
    assert_eq!(frames[1].stream, StdStream::Stderr);
    Ok(())
}
