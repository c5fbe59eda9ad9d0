//! Address helpers and raw RFC 5322 message handling.
//!
//! Used to derive the SMTP envelope (MAIL FROM / RCPT TO) from message
//! headers when the caller does not provide one.

use crate::error::{SmtpError, SmtpResult};

/// Extract the bare address from a mailbox such as `"Name" <a@b.com>` or
/// `a@b.com (comment)`.
pub fn parse_address(mailbox: &str) -> String {
    let mailbox = mailbox.trim();
    if let Some(lt) = find_unquoted(mailbox, '<') {
        if let Some(gt) = mailbox[lt..].find('>') {
            return mailbox[lt + 1..lt + gt].trim().to_string();
        }
    }
    strip_comments(mailbox).trim().trim_matches('"').trim().to_string()
}

/// Format an address for the envelope: `<a@b.com>`.
pub fn quote_address(address: &str) -> String {
    format!("<{}>", parse_address(address))
}

/// Bare addresses of a comma separated address list.
pub fn split_addresses(value: &str) -> Vec<String> {
    split_mailboxes(value)
        .iter()
        .map(|m| parse_address(m))
        .filter(|a| !a.is_empty())
        .collect()
}

/// Split a header value holding a comma separated mailbox list, keeping
/// each mailbox as written. Commas inside quotes, angle brackets or
/// comments do not split.
pub fn split_mailboxes(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut angle = 0u32;
    let mut paren = 0u32;
    let mut escaped = false;

    for ch in value.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' if paren == 0 => in_quotes = !in_quotes,
            '<' if !in_quotes && paren == 0 => angle += 1,
            '>' if !in_quotes && paren == 0 => angle = angle.saturating_sub(1),
            '(' if !in_quotes => paren += 1,
            ')' if !in_quotes => paren = paren.saturating_sub(1),
            ',' if !in_quotes && angle == 0 && paren == 0 => {
                push_mailbox(&mut out, &current);
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    push_mailbox(&mut out, &current);
    out
}

fn push_mailbox(out: &mut Vec<String>, mailbox: &str) {
    let mailbox = mailbox.trim();
    if !mailbox.is_empty() {
        out.push(mailbox.to_string());
    }
}

fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    for (i, ch) in s.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c == needle && !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

fn strip_comments(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0u32;
    for ch in s.chars() {
        match ch {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}

// ─── Raw messages ───────────────────────────────────────────────────

/// A message split into its header fields and body, as received from the
/// caller. Folded header lines are kept verbatim so the message can be
/// re-serialised unchanged apart from removed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// `(name, value)` pairs; values keep folding whitespace.
    headers: Vec<(String, String)>,
    body: String,
}

impl RawMessage {
    pub fn parse(raw: &str) -> Self {
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut rest = raw;

        loop {
            let (line, remainder) = match rest.find('\n') {
                Some(i) => (&rest[..i], &rest[i + 1..]),
                None => (rest, ""),
            };
            let line = line.strip_suffix('\r').unwrap_or(line);

            if line.is_empty() {
                rest = remainder;
                break;
            }
            if line.starts_with([' ', '\t']) {
                match headers.last_mut() {
                    Some((_, value)) => {
                        value.push_str("\r\n");
                        value.push_str(line);
                    }
                    // A leading continuation line means there is no header block.
                    None => break,
                }
            } else if let Some(colon) = line.find(':') {
                let name = line[..colon].trim().to_string();
                let value = line[colon + 1..].trim_start().to_string();
                headers.push((name, value));
            } else {
                // Not a header: treat everything from here as body.
                break;
            }

            rest = remainder;
            if rest.is_empty() {
                break;
            }
        }

        Self {
            headers,
            body: rest.to_string(),
        }
    }

    /// Unfolded values of every field named `name` (case-insensitive).
    pub fn get_all(&self, name: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| unfold(v))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.get_all(name).into_iter().next()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn remove(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// The `Resent-` block in effect, if any.
    fn resent(&self) -> SmtpResult<bool> {
        let count = self.get_all("Resent-Date").len();
        if count > 1 {
            return Err(SmtpError::message(
                "Message has more than one 'Resent-' header block",
            ));
        }
        Ok(count == 1)
    }

    /// Envelope sender per RFC 5322 §3.6.2 / §3.6.6: Sender is preferred over
    /// From, using the Resent- variants for resent messages.
    pub fn extract_sender(&self) -> SmtpResult<Option<String>> {
        let (sender_field, from_field) = if self.resent()? {
            ("Resent-Sender", "Resent-From")
        } else {
            ("Sender", "From")
        };
        let value = if self.contains(sender_field) {
            self.get(sender_field)
        } else {
            self.get(from_field)
        };
        Ok(value.and_then(|v| split_addresses(&v).into_iter().next()))
    }

    /// Envelope recipients from To, Cc and Bcc (or their Resent- variants).
    pub fn extract_recipients(&self) -> SmtpResult<Vec<String>> {
        let fields: [&str; 3] = if self.resent()? {
            ["Resent-To", "Resent-Cc", "Resent-Bcc"]
        } else {
            ["To", "Cc", "Bcc"]
        };
        Ok(fields
            .iter()
            .flat_map(|field| self.get_all(field))
            .flat_map(|value| split_addresses(&value))
            .collect())
    }

    /// Serialise with CRLF line endings.
    pub fn to_wire(&self) -> String {
        let mut out = String::with_capacity(self.body.len() + 64 * self.headers.len());
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&normalize_line_endings(&self.body));
        out
    }
}

fn unfold(value: &str) -> String {
    value
        .split("\r\n")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Convert lone `\r` and `\n` to CRLF.
pub fn normalize_line_endings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 32);
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\r\n");
            }
            '\n' => out.push_str("\r\n"),
            c => out.push(c),
        }
    }
    out
}
