//! SMTP replies and reply-line parsing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SmtpError, SmtpResult};
use crate::status::SmtpStatus;

/// A complete (possibly multi-line) server reply.
///
/// `message` holds the text of every line, without code or separator,
/// joined by `\n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpResponse {
    pub code: u16,
    pub message: String,
}

impl SmtpResponse {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn has_status(&self, status: SmtpStatus) -> bool {
        self.code == status.code()
    }

    /// Whether this is a positive completion (2xx).
    pub fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Whether this is a positive intermediate (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Whether this is a transient negative (4xx).
    pub fn is_transient_negative(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// Whether this is a permanent negative (5xx).
    pub fn is_permanent_negative(&self) -> bool {
        (500..600).contains(&self.code)
    }

    pub fn is_error(&self) -> bool {
        self.code >= 400
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.message.split('\n')
    }

    /// Enhanced status code (RFC 3463, e.g. `2.1.0`) leading the first line.
    pub fn enhanced_code(&self) -> Option<&str> {
        let first = self.message.split_whitespace().next()?;
        let segments: Vec<&str> = first.split('.').collect();
        let valid = segments.len() == 3
            && matches!(segments[0], "2" | "4" | "5")
            && segments
                .iter()
                .all(|s| !s.is_empty() && s.len() <= 3 && s.bytes().all(|b| b.is_ascii_digit()));
        valid.then_some(first)
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

/// One parsed reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReplyLine {
    pub code: u16,
    /// `false` for `NNN-` continuation lines.
    pub last: bool,
    pub text: String,
}

/// Parse a single reply line (trailing CRLF allowed).
pub(crate) fn parse_line(raw: &[u8]) -> SmtpResult<ReplyLine> {
    let line = strip_eol(raw);
    let malformed = || {
        SmtpError::malformed(format!(
            "Malformed SMTP response line: {}",
            String::from_utf8_lossy(line)
        ))
    };

    if line.len() < 3 || !line[..3].iter().all(u8::is_ascii_digit) {
        return Err(malformed());
    }
    let code = std::str::from_utf8(&line[..3])
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(malformed)?;

    let last = line.get(3) != Some(&b'-');
    let text = line
        .get(4..)
        .map(|t| String::from_utf8_lossy(t).trim().to_string())
        .unwrap_or_default();

    Ok(ReplyLine { code, last, text })
}

/// Collects reply lines until the final one arrives.
#[derive(Debug, Default)]
pub(crate) struct ReplyBuilder {
    code: Option<u16>,
    lines: Vec<String>,
}

impl ReplyBuilder {
    /// Feed one raw line; returns the finished reply after the last line.
    pub fn push(&mut self, raw: &[u8]) -> SmtpResult<Option<SmtpResponse>> {
        let line = parse_line(raw)?;
        self.code = Some(line.code);
        self.lines.push(line.text);
        if !line.last {
            return Ok(None);
        }
        let code = self.code.take().unwrap_or_default();
        let message = std::mem::take(&mut self.lines).join("\n");
        Ok(Some(SmtpResponse::new(code, message.trim())))
    }
}

/// Parse a whole reply held in memory (e.g. captured wire text).
pub fn parse_reply(raw: &str) -> SmtpResult<SmtpResponse> {
    let mut builder = ReplyBuilder::default();
    for line in raw.split_inclusive('\n') {
        if strip_eol(line.as_bytes()).is_empty() {
            continue;
        }
        if let Some(reply) = builder.push(line.as_bytes())? {
            return Ok(reply);
        }
    }
    Err(SmtpError::malformed(format!(
        "Incomplete SMTP response: {}",
        raw.trim_end()
    )))
}

fn strip_eol(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    &raw[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SmtpErrorKind;

    #[test]
    fn parse_single_line() {
        let r = parse_reply("250 OK\r\n").unwrap();
        assert_eq!(r.code, 250);
        assert_eq!(r.message, "OK");
        assert!(r.is_positive());
        assert!(r.has_status(SmtpStatus::Completed));
    }

    #[test]
    fn parse_multiline_joins_with_newlines() {
        let raw = "250-mail.example.com\r\n250-SIZE 35882577\r\n250-8BITMIME\r\n250 STARTTLS\r\n";
        let r = parse_reply(raw).unwrap();
        assert_eq!(r.code, 250);
        assert_eq!(r.message, "mail.example.com\nSIZE 35882577\n8BITMIME\nSTARTTLS");
        assert_eq!(r.lines().count(), 4);
    }

    #[test]
    fn parse_code_only_line() {
        let r = parse_reply("354\r\n").unwrap();
        assert_eq!(r.code, 354);
        assert_eq!(r.message, "");
        assert!(r.is_intermediate());
    }

    #[test]
    fn gibberish_is_malformed() {
        let err = parse_reply("sdfjlfwqejflqw\r\n").unwrap_err();
        assert_eq!(err.kind, SmtpErrorKind::Response);
        assert_eq!(err.code, None);
        assert!(err.message.starts_with("Malformed SMTP response line"));
    }

    #[test]
    fn incomplete_multiline_is_error() {
        let err = parse_reply("250-first\r\n250-second\r\n").unwrap_err();
        assert!(err.message.contains("Incomplete"));
    }

    #[test]
    fn builder_waits_for_last_line() {
        let mut b = ReplyBuilder::default();
        assert_eq!(b.push(b"220-hello\r\n").unwrap(), None);
        let r = b.push(b"220 ready\r\n").unwrap().unwrap();
        assert_eq!(r, SmtpResponse::new(220, "hello\nready"));
        // Builder is reusable for the next reply.
        let r = b.push(b"221 bye\r\n").unwrap().unwrap();
        assert_eq!(r, SmtpResponse::new(221, "bye"));
    }

    #[test]
    fn reply_classes() {
        assert!(SmtpResponse::new(421, "x").is_transient_negative());
        assert!(SmtpResponse::new(550, "x").is_permanent_negative());
        assert!(SmtpResponse::new(550, "x").is_error());
        assert!(!SmtpResponse::new(354, "x").is_error());
    }

    #[test]
    fn enhanced_code_extraction() {
        assert_eq!(
            SmtpResponse::new(250, "2.1.0 Sender OK").enhanced_code(),
            Some("2.1.0")
        );
        assert_eq!(
            SmtpResponse::new(550, "5.1.1 No such user").enhanced_code(),
            Some("5.1.1")
        );
        assert_eq!(SmtpResponse::new(250, "OK").enhanced_code(), None);
        assert_eq!(SmtpResponse::new(250, "1.2.3 nope").enhanced_code(), None);
    }

    #[test]
    fn display() {
        assert_eq!(SmtpResponse::new(250, "OK").to_string(), "250 OK");
    }
}
