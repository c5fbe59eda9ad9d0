//! Command-line arguments.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "aiosmtp")]
#[command(version)]
#[command(about = "Send mail and probe SMTP servers", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG wins.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Send a message.
    Send(SendArgs),
    /// Connect, greet the server and print what it supports.
    Check(CheckArgs),
}

/// Where and how to connect. Flags override the profile file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// YAML profile holding connection defaults.
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// SMTP server host name or address.
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Server port (default 25, 465 with --tls, 587 with --starttls).
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Connect over TLS from the start (SMTPS).
    #[arg(long, conflicts_with = "starttls")]
    pub tls: bool,

    /// Upgrade the connection with STARTTLS.
    #[arg(long)]
    pub starttls: bool,

    /// Skip certificate verification.
    #[arg(long)]
    pub insecure: bool,

    /// Extra CA certificates (PEM).
    #[arg(long, value_name = "PEM")]
    pub cert_bundle: Option<String>,

    /// Client certificate chain (PEM).
    #[arg(long, value_name = "PEM")]
    pub client_cert: Option<String>,

    /// Private key for --client-cert (PEM).
    #[arg(long, value_name = "PEM", requires = "client_cert")]
    pub client_key: Option<String>,

    /// Connect and command timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Name announced with EHLO/HELO.
    #[arg(long)]
    pub source_address: Option<String>,

    #[arg(short, long)]
    pub username: Option<String>,

    #[arg(long, env = "AIOSMTP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Sender mailbox. Taken from the From header with --file.
    #[arg(short, long)]
    pub from: Option<String>,

    /// Recipient mailbox; repeat for several.
    #[arg(short, long)]
    pub to: Vec<String>,

    #[arg(long)]
    pub cc: Vec<String>,

    #[arg(long)]
    pub bcc: Vec<String>,

    #[arg(short, long, default_value = "")]
    pub subject: String,

    /// Plain-text body.
    #[arg(short, long, conflicts_with = "file")]
    pub body: Option<String>,

    /// HTML body, sent alongside the text one.
    #[arg(long, conflicts_with = "file")]
    pub html: Option<String>,

    /// Send a ready-made RFC 5322 message instead of building one.
    #[arg(long, value_name = "EML")]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}
