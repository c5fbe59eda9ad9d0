//! SMTP error type.
//!
//! Errors are a single struct tagged with a [`SmtpErrorKind`]. Kinds that
//! stem from a server reply carry its code; envelope refusals also carry
//! the refused address.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::response::SmtpResponse;

/// Kinds of SMTP errors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmtpErrorKind {
    /// The connection is closed, or was lost mid-command.
    ServerDisconnected,
    /// TCP connect failed or the server refused us in its greeting.
    Connect,
    /// Timed out connecting or waiting for the greeting.
    ConnectTimeout,
    /// Timed out waiting for a command reply.
    Timeout,
    /// Unexpected (or malformed) server reply.
    Response,
    /// HELO / EHLO rejected.
    Helo,
    /// DATA rejected, either before or after the payload.
    Data,
    /// MAIL FROM rejected.
    SenderRefused,
    /// RCPT TO rejected for one recipient.
    RecipientRefused,
    /// RCPT TO rejected for every recipient.
    RecipientsRefused,
    /// AUTH exchange rejected.
    Authentication,
    /// The server lacks a required extension.
    NotSupported,
    /// Invalid or conflicting client settings.
    Config,
    /// TLS setup or handshake failed.
    Tls,
    /// The message could not be prepared for sending.
    Message,
}

impl fmt::Display for SmtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Top-level error type for the SMTP crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpError {
    pub kind: SmtpErrorKind,
    pub message: String,
    /// The SMTP reply code, if the error came from a reply.
    pub code: Option<u16>,
    /// Sender or recipient address for envelope refusals.
    pub address: Option<String>,
    /// Individual refusals behind a `RecipientsRefused` error.
    pub refused: Vec<SmtpError>,
}

pub type SmtpResult<T> = Result<T, SmtpError>;

impl SmtpError {
    pub fn new(kind: SmtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
            address: None,
            refused: Vec::new(),
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ServerDisconnected, msg)
    }

    pub fn connect(msg: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::Connect, msg)
    }

    pub fn connect_timeout(msg: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConnectTimeout, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::Timeout, msg)
    }

    /// A reply with an unexpected code.
    pub fn response(code: u16, msg: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::Response, msg).with_code(code)
    }

    /// A reply that could not be parsed at all.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::Response, msg)
    }

    pub fn helo(reply: &SmtpResponse) -> Self {
        Self::new(SmtpErrorKind::Helo, reply.message.clone()).with_code(reply.code)
    }

    pub fn data(reply: &SmtpResponse) -> Self {
        Self::new(SmtpErrorKind::Data, reply.message.clone()).with_code(reply.code)
    }

    pub fn sender_refused(reply: &SmtpResponse, sender: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::SenderRefused, reply.message.clone())
            .with_code(reply.code)
            .with_address(sender)
    }

    pub fn recipient_refused(reply: &SmtpResponse, recipient: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::RecipientRefused, reply.message.clone())
            .with_code(reply.code)
            .with_address(recipient)
    }

    pub fn recipients_refused(refused: Vec<SmtpError>) -> Self {
        let mut err = Self::new(
            SmtpErrorKind::RecipientsRefused,
            format!("All {} recipient(s) were refused", refused.len()),
        );
        err.refused = refused;
        err
    }

    pub fn auth(reply: &SmtpResponse) -> Self {
        Self::new(SmtpErrorKind::Authentication, reply.message.clone()).with_code(reply.code)
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::NotSupported, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::Config, msg)
    }

    pub fn tls(msg: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::Tls, msg)
    }

    pub fn message(msg: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::Message, msg)
    }

    // ── Classification ───────────────────────────────────────────

    /// Errors raised because of a server reply code.
    pub fn is_response(&self) -> bool {
        matches!(
            self.kind,
            SmtpErrorKind::Response
                | SmtpErrorKind::Helo
                | SmtpErrorKind::Data
                | SmtpErrorKind::SenderRefused
                | SmtpErrorKind::RecipientRefused
                | SmtpErrorKind::Authentication
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind,
            SmtpErrorKind::Timeout | SmtpErrorKind::ConnectTimeout
        )
    }

    pub fn is_connect(&self) -> bool {
        matches!(
            self.kind,
            SmtpErrorKind::Connect | SmtpErrorKind::ConnectTimeout
        )
    }

    pub fn is_disconnected(&self) -> bool {
        self.kind == SmtpErrorKind::ServerDisconnected
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, &self.address) {
            (Some(code), Some(addr)) => {
                write!(f, "[SMTP {}] {} ({}): {}", code, self.kind, addr, self.message)
            }
            (Some(code), None) => write!(f, "[SMTP {}] {}: {}", code, self.kind, self.message),
            (None, _) => write!(f, "[SMTP] {}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for SmtpError {}

impl From<std::io::Error> for SmtpError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout(format!("I/O timeout: {}", e)),
            _ => Self::disconnected(format!("Connection lost: {}", e)),
        }
    }
}
