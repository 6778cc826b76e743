//! Command-line surface of the `berth` binary.

use clap::{Parser, Subcommand};

use crate::config::CONFIG_HELP;

/// Talks to a local Docker or Podman engine.
#[derive(Parser, Debug)]
#[command(
    name = "berth",
    version,
    disable_help_subcommand = true,
    after_help = CONFIG_HELP
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Checks that the engine answers `/_ping`.
    Ping,
    /// Prints the engine version document.
    Version,
    /// Lists the endpoints that would be tried, in order.
    Candidates,
    /// Sends a raw API request and prints the status and body.
    Request {
        /// HTTP method, for example `GET`.
        method: String,
        /// Request path including any query string.
        path: String,
        /// JSON request body.
        #[arg(long, value_name = "JSON")]
        body: Option<String>,
    },
    /// Pulls an image, printing de-duplicated progress.
    Pull {
        /// Image reference such as `alpine:3.20`.
        image: String,
    },
    /// Pushes an image, printing de-duplicated progress.
    Push {
        /// Image reference such as `registry.local/app:1.0`.
        image: String,
    },
    /// Prints container output.
    Logs {
        /// Container name or id.
        container: String,
        /// Keep streaming new output.
        #[arg(long)]
        follow: bool,
        /// The container runs with a TTY, so output is not multiplexed.
        #[arg(long)]
        tty: bool,
    },
}
