//! EHLO reply parsing (RFC 1869 service extensions).

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Pre-RFC 2554 servers advertise `AUTH=LOGIN PLAIN`.
    static ref OLDSTYLE_AUTH: Regex = Regex::new(r"(?i)^auth=(?P<auth>.*)").unwrap();
    static ref EXTENSION: Regex = Regex::new(r"^(?P<ext>[A-Za-z0-9][A-Za-z0-9\-]*) ?").unwrap();
}

/// Extensions and auth mechanisms advertised in an EHLO reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EsmtpExtensions {
    /// Lower-cased keyword → raw parameter string.
    pub extensions: HashMap<String, String>,
    /// Lower-cased auth mechanism names, in advertised order.
    pub auth_methods: Vec<String>,
}

impl EsmtpExtensions {
    pub fn supports(&self, extension: &str) -> bool {
        self.extensions.contains_key(&extension.to_lowercase())
    }

    pub fn param(&self, extension: &str) -> Option<&str> {
        self.extensions
            .get(&extension.to_lowercase())
            .map(String::as_str)
    }

    /// Maximum message size from the SIZE extension, if advertised.
    pub fn max_size(&self) -> Option<u64> {
        self.param("size").and_then(|p| p.trim().parse().ok())
    }
}

/// Parse the message text of an EHLO reply. The first line is the
/// server greeting and is ignored.
pub fn parse_esmtp_extensions(message: &str) -> EsmtpExtensions {
    let mut parsed = EsmtpExtensions::default();

    for line in message.split('\n').skip(1) {
        if let Some(caps) = OLDSTYLE_AUTH.captures(line) {
            for method in caps["auth"].split_whitespace().map(str::to_lowercase) {
                if !parsed.auth_methods.contains(&method) {
                    parsed.auth_methods.push(method);
                }
            }
        }

        if let Some(caps) = EXTENSION.captures(line) {
            let ext = &caps["ext"];
            let params = line[ext.len()..].trim().to_string();
            let keyword = ext.to_lowercase();
            if keyword == "auth" && !params.starts_with('=') {
                parsed
                    .auth_methods
                    .extend(params.split_whitespace().map(str::to_lowercase));
            }
            parsed.extensions.insert(keyword, params);
        }
    }

    parsed
}
