//! Client configuration, per-call overrides, credentials and results.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SmtpError, SmtpResult};
use crate::response::SmtpResponse;

/// Plain SMTP submission/relay port.
pub const SMTP_PORT: u16 = 25;
/// Implicit TLS (SMTPS) port.
pub const SMTP_TLS_PORT: u16 = 465;
/// Message submission port, normally used with STARTTLS.
pub const SMTP_STARTTLS_PORT: u16 = 587;
/// Default connect / command timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 60.0;

// ─── Timeout ────────────────────────────────────────────────────────

/// Timeout override for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Use the timeout saved on the client.
    #[default]
    Default,
    /// Wait indefinitely.
    Never,
    After(Duration),
}

impl Timeout {
    /// Resolve against the client's saved timeout.
    pub fn resolve(self, saved: Option<Duration>) -> Option<Duration> {
        match self {
            Self::Default => saved,
            Self::Never => None,
            Self::After(d) => Some(d),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::After(d)
    }
}

// ─── Configuration ──────────────────────────────────────────────────

/// Connection settings saved on a client and reused by every `connect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// Hostname or IP of the SMTP server.
    pub hostname: String,
    /// Server port; resolved at connect time when unset.
    pub port: Option<u16>,
    /// Name sent with EHLO/HELO. Defaults to the local hostname.
    pub source_address: Option<String>,
    /// Connect and per-command timeout in seconds. `None` waits forever.
    pub timeout_secs: Option<f64>,
    /// Connect over TLS from the start (SMTPS).
    pub use_tls: bool,
    /// Upgrade with STARTTLS right after the greeting.
    pub start_tls: bool,
    /// Verify the server certificate chain and hostname.
    pub validate_certs: bool,
    /// PEM client certificate chain, for mutual TLS.
    pub client_cert: Option<String>,
    /// PEM private key matching `client_cert`.
    pub client_key: Option<String>,
    /// Extra CA certificates (PEM) trusted on top of the webpki roots.
    pub cert_bundle: Option<String>,
    /// Fully prepared TLS configuration. Replaces every other TLS option.
    #[serde(skip)]
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".into(),
            port: None,
            source_address: None,
            timeout_secs: Some(DEFAULT_TIMEOUT_SECS),
            use_tls: false,
            start_tls: false,
            validate_certs: true,
            client_cert: None,
            client_key: None,
            cert_bundle: None,
            tls_config: None,
        }
    }
}

impl SmtpConfig {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port: Some(port),
            ..Default::default()
        }
    }

    /// Reject mutually exclusive or nonsensical settings.
    pub fn validate(&self) -> SmtpResult<()> {
        if self.use_tls && self.start_tls {
            return Err(SmtpError::config(
                "The start_tls and use_tls options are not compatible.",
            ));
        }
        if self.tls_config.is_some() && self.client_cert.is_some() {
            return Err(SmtpError::config(
                "Either a TLS context or a certificate/key must be provided",
            ));
        }
        if self.hostname.trim().is_empty() {
            return Err(SmtpError::config("A hostname is required"));
        }
        if let Some(secs) = self.timeout_secs {
            if !secs.is_finite() || secs < 0.0 {
                return Err(SmtpError::config(format!("Invalid timeout: {}", secs)));
            }
        }
        Ok(())
    }

    /// Explicit port, or the conventional one for the TLS mode.
    pub fn effective_port(&self) -> u16 {
        match self.port {
            Some(port) => port,
            None if self.use_tls => SMTP_TLS_PORT,
            None if self.start_tls => SMTP_STARTTLS_PORT,
            None => SMTP_PORT,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout_secs = timeout.map(|d| d.as_secs_f64());
    }

    /// Merge the overrides given to `connect_with`.
    pub fn apply(&mut self, opts: ConnectOptions) {
        if let Some(hostname) = opts.hostname {
            self.hostname = hostname;
        }
        if let Some(port) = opts.port {
            self.port = Some(port);
        }
        if let Some(source) = opts.source_address {
            self.source_address = Some(source);
        }
        match opts.timeout {
            Timeout::Default => {}
            Timeout::Never => self.timeout_secs = None,
            Timeout::After(d) => self.timeout_secs = Some(d.as_secs_f64()),
        }
        if let Some(use_tls) = opts.use_tls {
            self.use_tls = use_tls;
        }
        if let Some(start_tls) = opts.start_tls {
            self.start_tls = start_tls;
        }
        if let Some(validate) = opts.validate_certs {
            self.validate_certs = validate;
        }
        if let Some(cert) = opts.client_cert {
            self.client_cert = Some(cert);
        }
        if let Some(key) = opts.client_key {
            self.client_key = Some(key);
        }
        if let Some(bundle) = opts.cert_bundle {
            self.cert_bundle = Some(bundle);
        }
        if let Some(tls) = opts.tls_config {
            self.tls_config = Some(tls);
        }
    }
}

/// Overrides accepted by `connect_with`. Every field left unset keeps the
/// value already saved on the client; set fields are saved for later
/// connects as well.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub source_address: Option<String>,
    pub timeout: Timeout,
    pub use_tls: Option<bool>,
    pub start_tls: Option<bool>,
    pub validate_certs: Option<bool>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub cert_bundle: Option<String>,
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
}

/// Overrides for a single STARTTLS upgrade. Unlike [`ConnectOptions`],
/// these are not saved on the client.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// SNI / verification name; defaults to the configured hostname.
    pub server_hostname: Option<String>,
    pub validate_certs: Option<bool>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub cert_bundle: Option<String>,
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
    pub timeout: Timeout,
}

impl TlsOptions {
    /// Layer these overrides on a copy of the saved configuration.
    pub(crate) fn merged(&self, saved: &SmtpConfig) -> SmtpResult<SmtpConfig> {
        if self.tls_config.is_some() && (self.client_cert.is_some() || self.client_key.is_some())
        {
            return Err(SmtpError::config(
                "Either a TLS context or a certificate/key must be provided",
            ));
        }
        let mut cfg = saved.clone();
        if let Some(validate) = self.validate_certs {
            cfg.validate_certs = validate;
        }
        if let Some(ref cert) = self.client_cert {
            cfg.client_cert = Some(cert.clone());
            cfg.tls_config = None;
        }
        if let Some(ref key) = self.client_key {
            cfg.client_key = Some(key.clone());
        }
        if let Some(ref bundle) = self.cert_bundle {
            cfg.cert_bundle = Some(bundle.clone());
        }
        if let Some(ref tls) = self.tls_config {
            cfg.tls_config = Some(Arc::clone(tls));
            cfg.client_cert = None;
            cfg.client_key = None;
        }
        Ok(cfg)
    }
}

// ─── Authentication ─────────────────────────────────────────────────

/// Supported authentication mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmtpAuthMethod {
    CramMd5,
    Plain,
    Login,
    XOAuth2,
}

impl SmtpAuthMethod {
    /// Mechanisms tried by `login`, strongest first.
    pub const PREFERENCE: [SmtpAuthMethod; 3] = [Self::CramMd5, Self::Plain, Self::Login];

    /// Lower-case name as advertised in EHLO.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::CramMd5 => "cram-md5",
            Self::Plain => "plain",
            Self::Login => "login",
            Self::XOAuth2 => "xoauth2",
        }
    }
}

impl fmt::Display for SmtpAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "PLAIN"),
            Self::Login => write!(f, "LOGIN"),
            Self::CramMd5 => write!(f, "CRAM-MD5"),
            Self::XOAuth2 => write!(f, "XOAUTH2"),
        }
    }
}

/// Credentials for SMTP authentication.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: String,
    /// Force a mechanism instead of negotiating one.
    pub method: Option<SmtpAuthMethod>,
    /// For XOAUTH2: the access token.
    pub oauth2_token: Option<String>,
}

impl SmtpCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }
}

impl fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("method", &self.method)
            .field("oauth2_token", &self.oauth2_token.as_ref().map(|_| "***"))
            .finish()
    }
}

// ─── Results ────────────────────────────────────────────────────────

/// Outcome of a mail transaction that was accepted for at least one
/// recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    /// Recipients the server refused, with the refusing reply.
    pub refused: BTreeMap<String, SmtpResponse>,
    /// The final reply to the message data.
    pub response: SmtpResponse,
}

impl SendResult {
    pub fn all_accepted(&self) -> bool {
        self.refused.is_empty()
    }
}
