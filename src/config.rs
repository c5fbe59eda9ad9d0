//! Connection profiles: YAML defaults merged with command-line flags.
//!
//! ```yaml
//! host: smtp.example.com
//! starttls: true
//! username: alice
//! timeout: 30
//! ```

use std::path::Path;

use aiosmtp::types::DEFAULT_TIMEOUT_SECS;
use aiosmtp::{SmtpAuthMethod, SmtpConfig, SmtpCredentials};
use serde::{Deserialize, Serialize};

use crate::cli::ConnectionArgs;
use crate::error::{CliError, CliResult};

/// Saved connection settings. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientProfile {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: bool,
    pub starttls: bool,
    pub insecure: bool,
    pub cert_bundle: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    /// Seconds.
    pub timeout: Option<f64>,
    pub source_address: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Force one mechanism instead of negotiating.
    pub auth_method: Option<SmtpAuthMethod>,
    pub oauth2_token: Option<String>,
}

impl ClientProfile {
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| CliError::Profile {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }
}

/// Client settings and credentials after merging.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub config: SmtpConfig,
    pub credentials: Option<SmtpCredentials>,
}

/// Load the profile named by `--profile`, if any, and lay the flags on top.
pub fn resolve(args: &ConnectionArgs) -> CliResult<Resolved> {
    let profile = match args.profile {
        Some(ref path) => ClientProfile::load(path)?,
        None => ClientProfile::default(),
    };
    merge(profile, args)
}

/// Flags win over the profile. `--insecure` applies when either sets it.
pub fn merge(profile: ClientProfile, args: &ConnectionArgs) -> CliResult<Resolved> {
    // A TLS mode given on the command line replaces the profile's.
    let (use_tls, start_tls) = if args.tls || args.starttls {
        (args.tls, args.starttls)
    } else {
        (profile.tls, profile.starttls)
    };

    let config = SmtpConfig {
        hostname: args
            .host
            .clone()
            .or(profile.host)
            .unwrap_or_else(|| "localhost".into()),
        port: args.port.or(profile.port),
        source_address: args.source_address.clone().or(profile.source_address),
        timeout_secs: Some(
            args.timeout
                .or(profile.timeout)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        ),
        use_tls,
        start_tls,
        validate_certs: !(args.insecure || profile.insecure),
        client_cert: args.client_cert.clone().or(profile.client_cert),
        client_key: args.client_key.clone().or(profile.client_key),
        cert_bundle: args.cert_bundle.clone().or(profile.cert_bundle),
        tls_config: None,
    };
    config.validate()?;

    let username = args.username.clone().or(profile.username);
    let password = args.password.clone().or(profile.password);
    let credentials = match username {
        Some(username) => Some(SmtpCredentials {
            username,
            password: password.unwrap_or_default(),
            method: profile.auth_method,
            oauth2_token: profile.oauth2_token,
        }),
        None if password.is_some() => {
            return Err(CliError::usage("a password was given without a username"))
        }
        None => None,
    };

    Ok(Resolved {
        config,
        credentials,
    })
}
