//! Runtime of the `berth` operator binary.
//!
//! The binary is a thin shell over `berth-transport`. Leading configuration
//! flags are split off for `ortho_config`, clap parses the subcommand, then
//! telemetry is installed, the engine candidates resolved and one subcommand
//! run. The configuration loader, the environment used for endpoint discovery
//! and the output streams are injected so tests can drive the runtime
//! in-process.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use berth_config::{EnvSource, LogTarget, ProcessEnv};
use berth_transport::Client;
use clap::Parser;
use clap::error::ErrorKind;
use tracing::debug;

mod cli;
mod commands;
mod config;
mod errors;
pub mod telemetry;

use cli::Cli;
use config::{ConfigLoader, OrthoConfigLoader, split_config_arguments};
use errors::AppError;

const CLI_TARGET: &str = LogTarget::Cli.as_str();

/// Runs the CLI against the process environment.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, &OrthoConfigLoader, &ProcessEnv, stdout, stderr)
}

/// Runs the CLI with a custom configuration loader and environment.
pub(crate) fn run_with_loader<I, L, W, E>(
    args: I,
    loader: &L,
    env: &dyn EnvSource,
    stdout: &mut W,
    stderr: &mut E,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    L: ConfigLoader,
    W: Write,
    E: Write,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);
    let cli = match Cli::try_parse_from(&split.command_arguments) {
        Ok(cli) => cli,
        Err(error) => return report_usage(error, stdout, stderr),
    };
    let result = loader
        .load(&split.config_arguments)
        .and_then(|config| {
            telemetry::initialise(&config)?;
            let client = Client::from_config(&config, env);
            debug!(
                target: CLI_TARGET,
                candidates = client.candidates().len(),
                command = ?cli.command,
                "running command"
            );
            commands::execute(cli.command, &client, env, stdout, stderr)
        });
    match result {
        Ok(code) => code,
        Err(error) => {
            if let Err(write_error) = writeln!(stderr, "berth: {error}") {
                debug!(target: CLI_TARGET, %write_error, "could not report failure");
            }
            ExitCode::FAILURE
        }
    }
}

fn report_usage<W: Write, E: Write>(
    error: clap::Error,
    stdout: &mut W,
    stderr: &mut E,
) -> ExitCode {
    let code = u8::try_from(error.exit_code()).map_or(ExitCode::FAILURE, ExitCode::from);
    let written = match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            stdout.write_all(error.render().to_string().as_bytes())
        }
        _ => write!(stderr, "{}", AppError::CliUsage(error)),
    };
    if let Err(write_error) = written {
        debug!(target: CLI_TARGET, %write_error, "could not write usage");
    }
    code
}

#[cfg(test)]
mod tests;
