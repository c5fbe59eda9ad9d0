//! Command-line front end for the `aiosmtp` client.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;

use cli::{Cli, Command};
use error::CliResult;

/// Run a parsed command line.
pub async fn run(cli: Cli) -> CliResult<()> {
    logging::init(cli.verbose);
    match cli.command {
        Command::Send(ref args) => commands::send(args).await,
        Command::Check(ref args) => commands::check(args).await,
    }
}
