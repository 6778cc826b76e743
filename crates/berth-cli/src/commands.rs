//! Subcommand implementations over the transport client.

use std::io::Write;
use std::process::ExitCode;

use berth_config::{ANONYMOUS_REGISTRY_AUTH, EnvSource, LogTarget, RegistryAuths};
use berth_stream::{ProgressRecord, ProgressSummary, StdStream};
use berth_transport::{Client, Method, Request};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde_json::Value;
use tracing::{info, warn};
use url::form_urlencoded;

use crate::cli::Command;
use crate::errors::AppError;

const COMMAND_TARGET: &str = LogTarget::Command.as_str();

/// Bytes escaped in an image name; `/` separates repository components.
const IMAGE_NAME: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Bytes escaped in a single path segment such as a container name.
const PATH_SEGMENT: &AsciiSet = &IMAGE_NAME.add(b'/');

pub(crate) fn execute<W: Write, E: Write>(
    command: Command,
    client: &Client,
    env: &dyn EnvSource,
    stdout: &mut W,
    stderr: &mut E,
) -> Result<ExitCode, AppError> {
    match command {
        Command::Ping => ping(client, stdout),
        Command::Version => version(client, stdout),
        Command::Candidates => candidates(client, stdout),
        Command::Request { method, path, body } => {
            raw_request(client, &method, path, body.as_deref(), stdout)
        }
        Command::Pull { image } => {
            let reference = ImageReference::parse(&image);
            let request = Request::post(format!("/images/create?{}", reference.pull_query()));
            progress(client, request, stdout, stderr)
        }
        Command::Push { image } => {
            let reference = ImageReference::parse(&image);
            let query = form_urlencoded::Serializer::new(String::new())
                .append_pair("tag", reference.tag_or_latest())
                .finish();
            let path = format!(
                "/images/{}/push?{query}",
                utf8_percent_encode(reference.name, IMAGE_NAME)
            );
            let auth = registry_auth(env, &image)?;
            let request = Request::post(path).header("X-Registry-Auth", auth);
            progress(client, request, stdout, stderr)
        }
        Command::Logs {
            container,
            follow,
            tty,
        } => logs(client, &container, follow, tty, stdout, stderr),
    }
}

fn ping<W: Write>(client: &Client, stdout: &mut W) -> Result<ExitCode, AppError> {
    let text = client
        .issue_request(Request::get("/_ping"))?
        .error_for_status()?
        .text()?;
    if text.trim() != "OK" {
        return Err(AppError::UnexpectedPing(text));
    }
    writeln!(stdout, "OK")?;
    Ok(ExitCode::SUCCESS)
}

fn version<W: Write>(client: &Client, stdout: &mut W) -> Result<ExitCode, AppError> {
    let document: Value = client
        .issue_request(Request::get("/version"))?
        .error_for_status()?
        .json()?;
    serde_json::to_writer_pretty(&mut *stdout, &document).map_err(AppError::Render)?;
    writeln!(stdout)?;
    Ok(ExitCode::SUCCESS)
}

fn candidates<W: Write>(client: &Client, stdout: &mut W) -> Result<ExitCode, AppError> {
    for descriptor in client.candidates() {
        writeln!(stdout, "{}\t{descriptor}", descriptor.priority)?;
    }
    Ok(ExitCode::SUCCESS)
}

fn raw_request<W: Write>(
    client: &Client,
    method: &str,
    path: String,
    body: Option<&str>,
    stdout: &mut W,
) -> Result<ExitCode, AppError> {
    let method = method
        .parse::<Method>()
        .map_err(|_| AppError::UnknownMethod(method.to_owned()))?;
    let path = if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    };
    let mut request = Request::new(method, path);
    if let Some(text) = body {
        let value: Value = serde_json::from_str(text).map_err(AppError::InvalidBody)?;
        request = request.json(&value)?;
    }
    let response = client.issue_request(request)?;
    let status = response.status();
    writeln!(stdout, "{status} {}", response.reason())?;
    let body = response.text()?;
    if !body.is_empty() {
        writeln!(stdout, "{}", body.trim_end())?;
    }
    Ok(if (200..300).contains(&status) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn progress<W: Write, E: Write>(
    client: &Client,
    request: Request,
    stdout: &mut W,
    stderr: &mut E,
) -> Result<ExitCode, AppError> {
    let mut write_error = None;
    let summary: ProgressSummary = client.stream_progress(request, |record: &ProgressRecord| {
        if write_error.is_none() {
            if let Err(error) = writeln!(stdout, "{}", record.line) {
                write_error = Some(error);
            }
        }
    })?;
    if let Some(error) = write_error {
        return Err(AppError::Output(error));
    }
    info!(
        target: COMMAND_TARGET,
        forwarded = summary.forwarded,
        suppressed = summary.suppressed,
        "progress stream finished"
    );
    match summary.error {
        Some(message) => {
            warn!(target: COMMAND_TARGET, %message, "engine reported failure");
            writeln!(stderr, "{}", AppError::Engine(message))?;
            Ok(ExitCode::FAILURE)
        }
        None => Ok(ExitCode::SUCCESS),
    }
}

fn logs<W: Write, E: Write>(
    client: &Client,
    container: &str,
    follow: bool,
    tty: bool,
    stdout: &mut W,
    stderr: &mut E,
) -> Result<ExitCode, AppError> {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("stdout", "1")
        .append_pair("stderr", "1")
        .append_pair("follow", if follow { "1" } else { "0" })
        .finish();
    let request = Request::get(format!(
        "/containers/{}/logs?{query}",
        utf8_percent_encode(container, PATH_SEGMENT)
    ));
    for frame in client.stream_logs(request, tty)? {
        let frame = frame?;
        match frame.stream {
            StdStream::Stderr => {
                stderr.write_all(&frame.payload)?;
                stderr.flush()?;
            }
            StdStream::Stdout | StdStream::Stdin => {
                stdout.write_all(&frame.payload)?;
                stdout.flush()?;
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Reads stored credentials for the registry `image` lives on.
///
/// An unreadable credentials file is logged and the push goes out
/// anonymously; a stored entry that cannot be decoded is an error.
fn registry_auth(env: &dyn EnvSource, image: &str) -> Result<String, AppError> {
    let auths = match RegistryAuths::load(env) {
        Ok(auths) => auths,
        Err(error) => {
            warn!(target: COMMAND_TARGET, %error, "ignoring registry credentials");
            return Ok(ANONYMOUS_REGISTRY_AUTH.to_owned());
        }
    };
    Ok(auths.header_for_image(image)?)
}

/// Image reference split into name, tag and digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ImageReference<'a> {
    pub(crate) name: &'a str,
    pub(crate) tag: Option<&'a str>,
    pub(crate) digest: Option<&'a str>,
}

impl<'a> ImageReference<'a> {
    pub(crate) fn parse(image: &'a str) -> Self {
        let (named, digest) = match image.split_once('@') {
            Some((named, digest)) => (named, Some(digest)),
            None => (image, None),
        };
        match named.rsplit_once(':') {
            // A colon before the last slash belongs to a registry port.
            Some((name, tag)) if !tag.contains('/') => Self {
                name,
                tag: Some(tag),
                digest,
            },
            _ => Self {
                name: named,
                tag: None,
                digest,
            },
        }
    }

    pub(crate) fn tag_or_latest(&self) -> &'a str {
        self.tag.unwrap_or("latest")
    }

    /// Query for `/images/create`; a digest pins the pull and drops the tag.
    pub(crate) fn pull_query(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        match self.digest {
            Some(digest) => query.append_pair("fromImage", &format!("{}@{digest}", self.name)),
            None => query
                .append_pair("fromImage", self.name)
                .append_pair("tag", self.tag_or_latest()),
        };
        query.finish()
    }
}
