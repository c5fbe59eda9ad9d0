//! Structured messages and their RFC 5322 / MIME rendering.
//!
//! [`EmailMessage`] describes a message by its parts; [`build_message`]
//! turns it into the text handed to DATA. The body is a tree:
//!
//! ```text
//! multipart/mixed            (only with file attachments)
//! └─ multipart/related       (only with inline images)
//!    └─ multipart/alternative (only with both text and HTML)
//!       ├─ text/plain
//!       └─ text/html
//! ```
//!
//! Levels that would hold a single child are collapsed.

use std::fmt;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::email::{parse_address, split_mailboxes};
use crate::error::{SmtpError, SmtpResult};

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

// ─── Enums ──────────────────────────────────────────────────────────

/// Priority / importance header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MessagePriority {
    High,
    #[default]
    Normal,
    Low,
}

impl MessagePriority {
    fn importance(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "1 (Highest)"),
            Self::Normal => write!(f, "3 (Normal)"),
            Self::Low => write!(f, "5 (Lowest)"),
        }
    }
}

/// Content-Transfer-Encoding of text parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransferEncoding {
    SevenBit,
    #[default]
    QuotedPrintable,
    Base64,
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Base64 => write!(f, "base64"),
        }
    }
}

// ─── Email Address ──────────────────────────────────────────────────

/// A mailbox: address plus optional display name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailAddress {
    pub name: Option<String>,
    pub address: String,
}

impl EmailAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    pub fn with_name(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }

    /// Parse `Name <addr>`, `"Name" <addr>` or a bare address.
    pub fn parse(input: &str) -> SmtpResult<Self> {
        let input = input.trim();
        let address = parse_address(input);
        if address.is_empty() || !address.contains('@') || address.contains(char::is_whitespace) {
            return Err(SmtpError::message(format!("Invalid email address: {}", input)));
        }
        let name = input
            .rfind('<')
            .map(|lt| input[..lt].trim().trim_matches('"').trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        Ok(Self { name, address })
    }

    /// Parse a comma separated list.
    pub fn parse_list(input: &str) -> SmtpResult<Vec<Self>> {
        split_mailboxes(input).iter().map(|m| Self::parse(m)).collect()
    }

    /// RFC 5322 mailbox form used in headers.
    pub fn to_mailbox(&self) -> String {
        match self.name {
            Some(ref n) if !n.is_ascii() => format!("{} <{}>", encode_header_value(n), self.address),
            Some(ref n) => format!("\"{}\" <{}>", n.replace('\\', "\\\\").replace('"', "\\\""), self.address),
            None => self.address.clone(),
        }
    }

    /// Minimal shape check: non-empty local part and domain.
    pub fn is_valid(&self) -> bool {
        match self.address.rsplit_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && !domain.is_empty() && !domain.contains(char::is_whitespace)
            }
            None => false,
        }
    }

    pub fn domain(&self) -> Option<&str> {
        self.address.rsplit_once('@').map(|(_, d)| d)
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_mailbox())
    }
}

// ─── Attachment ─────────────────────────────────────────────────────

/// A file attachment or inline image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    /// Base64-encoded content.
    pub data_base64: String,
    /// Content-ID referenced from HTML as `cid:…`.
    pub content_id: Option<String>,
    pub inline: bool,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, data: &[u8]) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data_base64: B64.encode(data),
            content_id: None,
            inline: false,
        }
    }

    pub fn inline_image(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: &[u8],
        cid: impl Into<String>,
    ) -> Self {
        Self {
            content_id: Some(cid.into()),
            inline: true,
            ..Self::new(filename, content_type, data)
        }
    }

    pub fn decode_data(&self) -> SmtpResult<Vec<u8>> {
        B64.decode(&self.data_base64)
            .map_err(|e| SmtpError::message(format!("Base64 decode error: {}", e)))
    }
}

// ─── Email Message ──────────────────────────────────────────────────

/// A message described by parts rather than raw text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailMessage {
    /// Message-ID without angle brackets.
    pub id: String,
    pub from: EmailAddress,
    pub reply_to: Option<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    /// Envelope-only recipients; never rendered.
    pub bcc: Vec<EmailAddress>,
    pub subject: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub attachments: Vec<Attachment>,
    /// Extra headers, rendered in order after the standard ones.
    pub custom_headers: Vec<(String, String)>,
    pub priority: MessagePriority,
    /// Date header; send time when unset.
    pub date: Option<DateTime<Utc>>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    /// Disposition-Notification-To.
    pub read_receipt_to: Option<EmailAddress>,
    pub charset: String,
    pub transfer_encoding: TransferEncoding,
}

impl Default for EmailMessage {
    fn default() -> Self {
        Self {
            id: format!("{}@aiosmtp", uuid::Uuid::new_v4().simple()),
            from: EmailAddress::new(""),
            reply_to: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            text_body: None,
            html_body: None,
            attachments: Vec::new(),
            custom_headers: Vec::new(),
            priority: MessagePriority::Normal,
            date: None,
            in_reply_to: None,
            references: Vec::new(),
            read_receipt_to: None,
            charset: "UTF-8".into(),
            transfer_encoding: TransferEncoding::QuotedPrintable,
        }
    }
}

impl EmailMessage {
    /// MAIL FROM address.
    pub fn envelope_sender(&self) -> String {
        self.from.address.clone()
    }

    /// RCPT TO addresses: To, then Cc, then Bcc.
    pub fn envelope_recipients(&self) -> Vec<String> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(|a| a.address.clone())
            .collect()
    }

    pub fn validate(&self) -> SmtpResult<()> {
        if self.from.address.is_empty() {
            return Err(SmtpError::message("From address is required"));
        }
        if !self.from.is_valid() {
            return Err(SmtpError::message(format!(
                "Invalid From address: {}",
                self.from.address
            )));
        }
        if self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty() {
            return Err(SmtpError::message("At least one recipient is required"));
        }
        if let Some(bad) = self.to.iter().chain(&self.cc).chain(&self.bcc).find(|a| !a.is_valid()) {
            return Err(SmtpError::message(format!(
                "Invalid recipient address: {}",
                bad.address
            )));
        }
        if self.text_body.is_none() && self.html_body.is_none() {
            return Err(SmtpError::message(
                "Message must have at least a text or HTML body",
            ));
        }
        for (name, value) in &self.custom_headers {
            if name.is_empty() || name.contains([':', ' ', '\r', '\n']) || value.contains(['\r', '\n']) {
                return Err(SmtpError::message(format!("Invalid header: {}", name)));
            }
        }
        self.check_header_fields()
    }

    /// Every value that ends up in a header line must stay on that line.
    fn check_header_fields(&self) -> SmtpResult<()> {
        let addresses = std::iter::once(&self.from)
            .chain(&self.reply_to)
            .chain(&self.to)
            .chain(&self.cc)
            .chain(&self.bcc)
            .chain(&self.read_receipt_to);
        for addr in addresses {
            single_line("address", &addr.address)?;
            if let Some(ref name) = addr.name {
                single_line("display name", name)?;
            }
        }
        single_line("Subject", &self.subject)?;
        single_line("Message-ID", &self.id)?;
        single_line("charset", &self.charset)?;
        if let Some(ref id) = self.in_reply_to {
            single_line("In-Reply-To", id)?;
        }
        for id in &self.references {
            single_line("References", id)?;
        }
        for att in &self.attachments {
            single_line("attachment filename", &att.filename)?;
            single_line("attachment content type", &att.content_type)?;
            if let Some(ref cid) = att.content_id {
                single_line("attachment Content-ID", cid)?;
            }
        }
        Ok(())
    }
}

fn single_line(field: &str, value: &str) -> SmtpResult<()> {
    if value.contains(['\r', '\n']) {
        return Err(SmtpError::message(format!(
            "Line break in {}: {:?}",
            field, value
        )));
    }
    Ok(())
}

// ─── Rendering ──────────────────────────────────────────────────────

enum Part<'a> {
    Text { subtype: &'static str, body: &'a str },
    File(&'a Attachment),
    Multipart { subtype: &'static str, parts: Vec<Part<'a>> },
}

impl<'a> Part<'a> {
    /// Wrap `parts` in a multipart, or return the lone part as is.
    fn wrap(subtype: &'static str, mut parts: Vec<Part<'a>>) -> Part<'a> {
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Part::Multipart { subtype, parts }
        }
    }
}

fn body_tree(msg: &EmailMessage) -> Part<'_> {
    let mut alternatives = Vec::new();
    if let Some(ref text) = msg.text_body {
        alternatives.push(Part::Text { subtype: "plain", body: text });
    }
    if let Some(ref html) = msg.html_body {
        alternatives.push(Part::Text { subtype: "html", body: html });
    }
    if alternatives.is_empty() {
        alternatives.push(Part::Text { subtype: "plain", body: "" });
    }

    let mut related = vec![Part::wrap("alternative", alternatives)];
    related.extend(msg.attachments.iter().filter(|a| a.inline).map(Part::File));

    let mut mixed = vec![Part::wrap("related", related)];
    mixed.extend(msg.attachments.iter().filter(|a| !a.inline).map(Part::File));

    Part::wrap("mixed", mixed)
}

/// Render `msg` as RFC 5322 text with CRLF line endings.
pub fn build_message(msg: &EmailMessage) -> SmtpResult<String> {
    msg.validate()?;

    let mut out = String::with_capacity(1024);
    let date = msg.date.unwrap_or_else(Utc::now);

    write_header(&mut out, "Message-ID", &format!("<{}>", msg.id));
    write_header(&mut out, "Date", &date.format("%a, %d %b %Y %H:%M:%S %z").to_string());
    write_header(&mut out, "From", &msg.from.to_mailbox());
    if let Some(ref reply_to) = msg.reply_to {
        write_header(&mut out, "Reply-To", &reply_to.to_mailbox());
    }
    if !msg.to.is_empty() {
        write_header(&mut out, "To", &mailbox_list(&msg.to));
    }
    if !msg.cc.is_empty() {
        write_header(&mut out, "Cc", &mailbox_list(&msg.cc));
    }
    write_header(&mut out, "Subject", &encode_header_value(&msg.subject));
    write_header(&mut out, "MIME-Version", "1.0");

    if msg.priority != MessagePriority::Normal {
        write_header(&mut out, "X-Priority", &msg.priority.to_string());
        write_header(&mut out, "Importance", msg.priority.importance());
    }
    if let Some(ref irt) = msg.in_reply_to {
        write_header(&mut out, "In-Reply-To", &format!("<{}>", irt));
    }
    if !msg.references.is_empty() {
        let refs: Vec<String> = msg.references.iter().map(|r| format!("<{}>", r)).collect();
        write_header(&mut out, "References", &refs.join(" "));
    }
    if let Some(ref rr) = msg.read_receipt_to {
        write_header(&mut out, "Disposition-Notification-To", &rr.to_mailbox());
    }
    for (name, value) in &msg.custom_headers {
        write_header(&mut out, name, &encode_header_value(value));
    }

    write_part(&mut out, &body_tree(msg), msg);
    Ok(out)
}

fn write_part(out: &mut String, part: &Part<'_>, msg: &EmailMessage) {
    match part {
        Part::Text { subtype, body } => {
            write_header(out, "Content-Type", &format!("text/{}; charset=\"{}\"", subtype, msg.charset));
            write_header(out, "Content-Transfer-Encoding", &msg.transfer_encoding.to_string());
            out.push_str("\r\n");
            out.push_str(&encode_body(body, msg.transfer_encoding));
            if !out.ends_with("\r\n") {
                out.push_str("\r\n");
            }
        }
        Part::File(att) => {
            let disposition = if att.inline { "inline" } else { "attachment" };
            let filename = encode_header_value(&att.filename);
            write_header(out, "Content-Type", &format!("{}; name=\"{}\"", att.content_type, filename));
            write_header(out, "Content-Disposition", &format!("{}; filename=\"{}\"", disposition, filename));
            write_header(out, "Content-Transfer-Encoding", "base64");
            if let Some(ref cid) = att.content_id {
                write_header(out, "Content-ID", &format!("<{}>", cid));
            }
            out.push_str("\r\n");
            push_wrapped(out, &att.data_base64);
        }
        Part::Multipart { subtype, parts } => {
            let boundary = format!("----=_{}_{}", subtype, uuid::Uuid::new_v4().simple());
            write_header(
                out,
                "Content-Type",
                &format!("multipart/{}; boundary=\"{}\"", subtype, boundary),
            );
            out.push_str("\r\n");
            out.push_str("This is a multi-part message in MIME format.\r\n");
            for child in parts {
                out.push_str(&format!("\r\n--{}\r\n", boundary));
                write_part(out, child, msg);
            }
            out.push_str(&format!("\r\n--{}--\r\n", boundary));
        }
    }
}

fn mailbox_list(addrs: &[EmailAddress]) -> String {
    addrs.iter().map(EmailAddress::to_mailbox).collect::<Vec<_>>().join(", ")
}

fn write_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

/// Base64 text in 76-column lines.
fn push_wrapped(out: &mut String, b64: &str) {
    let mut rest = b64;
    while !rest.is_empty() {
        let (line, tail) = rest.split_at(rest.len().min(76));
        out.push_str(line);
        out.push_str("\r\n");
        rest = tail;
    }
}

/// RFC 2047 `B` encoding for values containing non-ASCII characters.
pub fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }
    format!("=?UTF-8?B?{}?=", B64.encode(value.as_bytes()))
}

/// Apply the transfer encoding to a text body.
pub fn encode_body(text: &str, encoding: TransferEncoding) -> String {
    match encoding {
        TransferEncoding::SevenBit => text.to_string(),
        TransferEncoding::QuotedPrintable => quoted_printable::encode_to_str(text.as_bytes()),
        TransferEncoding::Base64 => {
            let mut out = String::new();
            push_wrapped(&mut out, &B64.encode(text.as_bytes()));
            out
        }
    }
}

// ─── Builder ────────────────────────────────────────────────────────

/// Fluent construction of an [`EmailMessage`].
#[derive(Debug, Default)]
pub struct MessageBuilder {
    msg: EmailMessage,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from(mut self, addr: EmailAddress) -> Self {
        self.msg.from = addr;
        self
    }

    /// Like [`from`](Self::from), parsing a mailbox string.
    pub fn from_mailbox(mut self, addr: &str) -> SmtpResult<Self> {
        self.msg.from = EmailAddress::parse(addr)?;
        Ok(self)
    }

    pub fn reply_to(mut self, addr: EmailAddress) -> Self {
        self.msg.reply_to = Some(addr);
        self
    }

    pub fn to(mut self, addr: EmailAddress) -> Self {
        self.msg.to.push(addr);
        self
    }

    /// Add every mailbox of a comma separated list to To.
    pub fn to_mailboxes(mut self, list: &str) -> SmtpResult<Self> {
        self.msg.to.extend(EmailAddress::parse_list(list)?);
        Ok(self)
    }

    pub fn cc(mut self, addr: EmailAddress) -> Self {
        self.msg.cc.push(addr);
        self
    }

    pub fn bcc(mut self, addr: EmailAddress) -> Self {
        self.msg.bcc.push(addr);
        self
    }

    pub fn subject(mut self, s: impl Into<String>) -> Self {
        self.msg.subject = s.into();
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.msg.text_body = Some(body.into());
        self
    }

    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.msg.html_body = Some(body.into());
        self
    }

    pub fn attachment(mut self, att: Attachment) -> Self {
        self.msg.attachments.push(att);
        self
    }

    pub fn priority(mut self, p: MessagePriority) -> Self {
        self.msg.priority = p;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.msg.custom_headers.push((name.into(), value.into()));
        self
    }

    pub fn in_reply_to(mut self, msg_id: impl Into<String>) -> Self {
        self.msg.in_reply_to = Some(msg_id.into());
        self
    }

    pub fn reference(mut self, msg_id: impl Into<String>) -> Self {
        self.msg.references.push(msg_id.into());
        self
    }

    pub fn read_receipt(mut self, addr: EmailAddress) -> Self {
        self.msg.read_receipt_to = Some(addr);
        self
    }

    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.msg.date = Some(date);
        self
    }

    pub fn transfer_encoding(mut self, enc: TransferEncoding) -> Self {
        self.msg.transfer_encoding = enc;
        self
    }

    pub fn build(self) -> SmtpResult<EmailMessage> {
        self.msg.validate()?;
        Ok(self.msg)
    }

    /// Skip validation; for messages still being edited.
    pub fn build_draft(self) -> EmailMessage {
        self.msg
    }
}
