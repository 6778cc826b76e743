//! Configuration loading for the `berth` binary.
//!
//! Configuration flags lead the command line. They are split off and handed
//! to `ortho_config`, which layers them over `berth.toml` and the `BERTH_*`
//! variables; clap only sees the subcommand that follows.

use std::ffi::{OsStr, OsString};

use berth_config::Config;
use ortho_config::OrthoConfig;

use crate::errors::AppError;

/// Flags recognised by the configuration loader that take a value.
///
/// Keep in step with the fields of [`Config`].
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--host",
    "--log-filter",
    "--log-format",
    "--connect-timeout-ms",
    "--machine-start-attempts",
    "--machine-start-backoff-ms",
];

/// Flags recognised by the configuration loader that take no value.
pub(crate) const CONFIG_CLI_SWITCHES: &[&str] = &["--no-machine-start"];

/// Help text listing the configuration flags, shown after clap's help.
pub(crate) const CONFIG_HELP: &str = "\
Configuration (before the subcommand; also BERTH_* variables or berth.toml):
      --host <ADDRESS>             Only engine address to try (unix://, npipe://, tcp://)
      --log-filter <FILTER>        tracing filter, for example berth::http=debug
      --log-format <FORMAT>        compact or json
      --connect-timeout-ms <MS>    Bound on each connection attempt
      --no-machine-start           Never start a local engine when none answers
      --config-path <PATH>         Read this file instead of berth.toml";

pub(crate) trait ConfigLoader {
    /// Loads configuration from the leading configuration arguments.
    ///
    /// `args` holds the program name followed by configuration flags only;
    /// flags after the subcommand are never seen here.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

/// Loads through `ortho_config`: defaults, file, environment, flags.
pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    if !text.starts_with("--") {
        return FlagAction::Stop;
    }
    let (flag, inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        return FlagAction::Include {
            needs_value: !inline_value,
        };
    }
    if CONFIG_CLI_SWITCHES.contains(&flag) && !inline_value {
        return FlagAction::Include { needs_value: false };
    }
    FlagAction::Stop
}

/// Command line divided between the configuration loader and clap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    /// Program name followed by the leading configuration flags.
    pub(crate) config_arguments: Vec<OsString>,
    /// Program name followed by everything from the subcommand on.
    pub(crate) command_arguments: Vec<OsString>,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let mut remaining = args.iter();
    let program: Vec<OsString> = remaining.next().cloned().into_iter().collect();
    let mut config_arguments = program.clone();
    let mut command_arguments = program;

    while let Some(argument) = remaining.as_slice().first() {
        match classify(argument) {
            FlagAction::Include { needs_value } => {
                config_arguments.push(argument.clone());
                remaining.next();
                if needs_value {
                    if let Some(value) = remaining.next() {
                        config_arguments.push(value.clone());
                    }
                }
            }
            FlagAction::Stop => break,
        }
    }
    command_arguments.extend(remaining.cloned());

    ConfigArgumentSplit {
        config_arguments,
        command_arguments,
    }
}
