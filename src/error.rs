use std::path::PathBuf;

use aiosmtp::SmtpError;

/// Errors surfaced by the command-line front end.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid profile {path}: {source}")]
    Profile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Smtp(#[from] SmtpError),
}

pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Process exit code: 2 for bad invocations, 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) | Self::Profile { .. } => 2,
            Self::Smtp(e) if e.kind == aiosmtp::SmtpErrorKind::Config => 2,
            _ => 1,
        }
    }
}
