//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use berth_config::{OrthoError, RegistryAuthError};
use berth_transport::TransportError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<OrthoError>),
    #[error(transparent)]
    RegistryAuth(#[from] RegistryAuthError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unknown HTTP method '{0}'")]
    UnknownMethod(String),
    #[error("request body is not valid JSON: {0}")]
    InvalidBody(serde_json::Error),
    #[error("failed to render engine response: {0}")]
    Render(serde_json::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
    #[error("engine reported an error: {0}")]
    Engine(String),
    #[error("engine answered /_ping with {0:?}")]
    UnexpectedPing(String),
}
