use std::process::ExitCode;

use aiosmtp_cli::cli::Cli;
use clap::Parser;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match aiosmtp_cli::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("aiosmtp: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
