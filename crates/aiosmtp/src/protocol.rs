//! Low-level SMTP command/reply codec (RFC 5321 §4.1, §4.2, §4.5.2).
//!
//! Handles:
//! - plain or TLS transport behind one stream type
//! - sending commands terminated with `\r\n`
//! - reading single and multi-line replies with a per-line size cap
//! - transparency (dot-stuffing) and termination of DATA payloads

use std::io;
use std::net::SocketAddr;

use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::error::{SmtpError, SmtpResult};
use crate::response::{ReplyBuilder, SmtpResponse};
use crate::status::SmtpStatus;

/// Longest reply line accepted from a server, in bytes.
pub const MAX_LINE_LENGTH: usize = 8192;

// ─── Stream Abstraction ─────────────────────────────────────────────

/// Plain-text or TLS socket, so the rest of the client is transport-agnostic.
pub(crate) enum SmtpStream {
    Plain(BufReader<TcpStream>),
    Tls(BufReader<TlsStream<TcpStream>>),
}

impl SmtpStream {
    /// Read one line (up to `MAX_LINE_LENGTH` bytes) into `buf`.
    async fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        let limit = MAX_LINE_LENGTH as u64;
        match self {
            Self::Plain(r) => AsyncReadExt::take(&mut *r, limit).read_until(b'\n', buf).await,
            Self::Tls(r) => AsyncReadExt::take(&mut *r, limit).read_until(b'\n', buf).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Plain(r) => r.get_mut().write_all(data).await,
            Self::Tls(r) => r.get_mut().write_all(data).await,
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(r) => r.get_mut().flush().await,
            Self::Tls(r) => r.get_mut().flush().await,
        }
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain(r) => r.get_ref(),
            Self::Tls(r) => r.get_ref().get_ref().0,
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().local_addr()
    }

    /// TLS session details: (protocol version, cipher suite).
    pub fn tls_session(&self) -> Option<(String, String)> {
        match self {
            Self::Plain(_) => None,
            Self::Tls(r) => {
                let conn = r.get_ref().get_ref().1;
                let version = conn.protocol_version().map(|v| format!("{:?}", v))?;
                let suite = conn
                    .negotiated_cipher_suite()
                    .map(|s| format!("{:?}", s.suite()))?;
                Some((version, suite))
            }
        }
    }

    /// Recover the raw socket for a STARTTLS upgrade.
    pub fn into_plain(self) -> SmtpResult<TcpStream> {
        match self {
            Self::Plain(r) => Ok(r.into_inner()),
            Self::Tls(_) => Err(SmtpError::tls("Connection already using TLS")),
        }
    }
}

// ─── Codec ──────────────────────────────────────────────────────────

/// Command/reply exchange over an [`SmtpStream`].
pub(crate) struct SmtpCodec {
    stream: SmtpStream,
    reply: ReplyBuilder,
}

impl SmtpCodec {
    pub fn new(stream: SmtpStream) -> Self {
        Self {
            stream,
            reply: ReplyBuilder::default(),
        }
    }

    pub fn stream(&self) -> &SmtpStream {
        &self.stream
    }

    pub fn into_stream(self) -> SmtpStream {
        self.stream
    }

    /// Send one command line. `args` are joined with single spaces.
    /// When `redact` is set only the verb is logged.
    pub async fn send_command(&mut self, args: &[&str], redact: bool) -> SmtpResult<()> {
        let line = args.join(" ");
        if redact {
            debug!("C: {} ***", args.first().copied().unwrap_or_default());
        } else {
            debug!("C: {}", line);
        }
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Send an already encoded DATA payload (see [`encode_data`]).
    pub async fn send_data(&mut self, payload: &[u8]) -> SmtpResult<()> {
        debug!("C: <{} bytes of message data>", payload.len());
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read a complete reply, possibly spanning several lines.
    pub async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        self.reply = ReplyBuilder::default();
        let mut buf = Vec::with_capacity(128);
        loop {
            buf.clear();
            let n = self.stream.read_line(&mut buf).await?;
            if n == 0 {
                return Err(SmtpError::disconnected("Connection lost"));
            }
            if !buf.ends_with(b"\n") {
                if buf.len() >= MAX_LINE_LENGTH {
                    return Err(SmtpError::response(
                        SmtpStatus::UnrecognizedCommand.code(),
                        "Response too long",
                    ));
                }
                return Err(SmtpError::disconnected("Connection lost mid-reply"));
            }
            debug!("S: {}", String::from_utf8_lossy(&buf).trim_end());
            if let Some(reply) = self.reply.push(&buf)? {
                return Ok(reply);
            }
        }
    }
}

/// Reject command arguments that would end the line early. A CR or LF
/// inside an argument would put a second command on the wire.
pub(crate) fn check_command_args(args: &[&str]) -> SmtpResult<()> {
    if args.iter().any(|a| a.contains(['\r', '\n'])) {
        return Err(SmtpError::config(
            "Command arguments must not contain CR or LF characters",
        ));
    }
    Ok(())
}

// ─── DATA transparency ──────────────────────────────────────────────

/// Prepare message data for the DATA phase: lone CR or LF become CRLF,
/// lines starting with `.` get an extra `.`, and the payload is closed
/// with `CRLF.CRLF`.
pub fn encode_data(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 32 + 5);
    let mut at_line_start = true;
    let mut i = 0;

    while i < message.len() {
        let b = message[i];
        match b {
            b'\r' => {
                out.extend_from_slice(b"\r\n");
                if message.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                at_line_start = true;
            }
            b'\n' => {
                out.extend_from_slice(b"\r\n");
                at_line_start = true;
            }
            _ => {
                if at_line_start && b == b'.' {
                    out.push(b'.');
                }
                out.push(b);
                at_line_start = false;
            }
        }
        i += 1;
    }

    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}
