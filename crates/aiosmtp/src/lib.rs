//! **aiosmtp**: asynchronous SMTP/ESMTP client.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |---|---|
//! | [`client`] | `SmtpClient`: session state, STARTTLS, `sendmail`, message sending |
//! | [`commands`] | HELO, EHLO, HELP, RSET, NOOP, VRFY, EXPN, QUIT, MAIL, RCPT, DATA |
//! | [`auth`] | AUTH PLAIN, LOGIN, CRAM-MD5, XOAUTH2 and the `login` negotiator |
//! | [`connection`] | TCP/TLS connect, greeting, timed command exchange |
//! | [`protocol`] | Reply framing and DATA transparency |
//! | [`tls`] | rustls client configuration |
//! | [`esmtp`] | EHLO extension parsing |
//! | [`email`] | Address helpers, raw message header extraction |
//! | [`message`] | MIME message builder |
//! | [`api`] | One-shot `send` / `send_raw` |
//! | [`response`], [`status`], [`error`], [`types`] | Replies, codes, errors, settings |
//!
//! ```no_run
//! use aiosmtp::{SmtpClient, SmtpConfig, SendOptions};
//!
//! # async fn demo() -> aiosmtp::SmtpResult<()> {
//! let mut client = SmtpClient::new(SmtpConfig::new("mail.example.com", 587));
//! client.connect().await?;
//! client.starttls(Default::default()).await?;
//! client.login("user", "secret").await?;
//! client
//!     .sendmail(
//!         "me@example.com",
//!         &["you@example.com"],
//!         b"Subject: hi\r\n\r\nhello\r\n",
//!         &SendOptions::default(),
//!     )
//!     .await?;
//! client.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod client;
pub mod commands;
pub mod connection;
pub mod email;
pub mod error;
pub mod esmtp;
pub mod message;
pub mod protocol;
pub mod response;
pub mod status;
pub mod tls;
pub mod types;

pub use client::{SendOptions, SharedSmtpClient, SmtpClient};
pub use connection::TlsInfo;
pub use error::{SmtpError, SmtpErrorKind, SmtpResult};
pub use esmtp::EsmtpExtensions;
pub use message::{Attachment, EmailAddress, EmailMessage, MessageBuilder, MessagePriority, TransferEncoding};
pub use response::SmtpResponse;
pub use status::SmtpStatus;
pub use types::{
    ConnectOptions, SendResult, SmtpAuthMethod, SmtpConfig, SmtpCredentials, Timeout, TlsOptions,
    SMTP_PORT, SMTP_STARTTLS_PORT, SMTP_TLS_PORT,
};
