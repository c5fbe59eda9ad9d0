//! SMTP authentication (RFC 4954).
//!
//! Supports PLAIN, LOGIN, CRAM-MD5 and XOAUTH2. [`SmtpClient::login`]
//! negotiates among the mechanisms the server advertises.

use base64::Engine;
use hmac::{Hmac, Mac};
use log::{debug, info};

use crate::client::SmtpClient;
use crate::error::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::status::SmtpStatus;
use crate::types::{SmtpAuthMethod, SmtpCredentials, Timeout};

type HmacMd5 = Hmac<md5::Md5>;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

impl SmtpClient {
    /// Try each supported mechanism the server offers, strongest first,
    /// until one succeeds. Servers sometimes advertise mechanisms they
    /// then reject, so a failure moves on to the next one.
    pub async fn login(&mut self, username: &str, password: &str) -> SmtpResult<()> {
        self.ehlo_or_helo_if_needed().await?;
        if !self.supports_extension("auth") {
            return Err(SmtpError::not_supported(
                "SMTP AUTH extension not supported by server.",
            ));
        }

        let offered: Vec<SmtpAuthMethod> = SmtpAuthMethod::PREFERENCE
            .into_iter()
            .filter(|m| self.server_auth_methods().iter().any(|s| s == m.keyword()))
            .collect();

        let mut last_error = None;
        for method in offered {
            debug!("Trying AUTH {}", method);
            let attempt = match method {
                SmtpAuthMethod::CramMd5 => self.auth_crammd5(username, password, Timeout::Default).await,
                SmtpAuthMethod::Plain => self.auth_plain(username, password, Timeout::Default).await,
                SmtpAuthMethod::Login => self.auth_login(username, password, Timeout::Default).await,
                SmtpAuthMethod::XOAuth2 => continue,
            };
            match attempt {
                Ok(()) => return Ok(()),
                Err(e) if e.kind == SmtpErrorKind::Authentication => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SmtpError::not_supported("No suitable authentication method found.")
        }))
    }

    /// Authenticate with stored credentials: the forced mechanism if one is
    /// set, XOAUTH2 when a token is present, otherwise [`login`](Self::login).
    pub async fn authenticate(&mut self, creds: &SmtpCredentials) -> SmtpResult<()> {
        self.ehlo_or_helo_if_needed().await?;
        let timeout = Timeout::Default;
        match (creds.method, creds.oauth2_token.as_deref()) {
            (Some(SmtpAuthMethod::XOAuth2), None) => {
                Err(SmtpError::config("XOAUTH2 requires oauth2_token"))
            }
            (Some(SmtpAuthMethod::XOAuth2), Some(token)) | (None, Some(token)) => {
                self.auth_xoauth2(&creds.username, token, timeout).await
            }
            (Some(SmtpAuthMethod::Plain), _) => {
                self.auth_plain(&creds.username, &creds.password, timeout).await
            }
            (Some(SmtpAuthMethod::Login), _) => {
                self.auth_login(&creds.username, &creds.password, timeout).await
            }
            (Some(SmtpAuthMethod::CramMd5), _) => {
                self.auth_crammd5(&creds.username, &creds.password, timeout).await
            }
            (None, None) => self.login(&creds.username, &creds.password).await,
        }
    }

    /// AUTH PLAIN with the initial response: `\0user\0password`.
    pub async fn auth_plain(&mut self, username: &str, password: &str, timeout: Timeout) -> SmtpResult<()> {
        let payload = plain_payload(username, password);
        let reply = self
            .execute_command_redacted(&["AUTH", "PLAIN", payload.as_str()], timeout)
            .await?;
        if reply.code != SmtpStatus::AuthSuccessful {
            return Err(SmtpError::auth(&reply));
        }
        info!("Authenticated as {} (PLAIN)", username);
        Ok(())
    }

    /// AUTH LOGIN: username as the initial response, password on the 334
    /// prompt.
    pub async fn auth_login(&mut self, username: &str, password: &str, timeout: Timeout) -> SmtpResult<()> {
        let user = B64.encode(username.as_bytes());
        let reply = self
            .execute_command_redacted(&["AUTH", "LOGIN", user.as_str()], timeout)
            .await?;
        if reply.code != SmtpStatus::AuthContinue {
            return Err(SmtpError::auth(&reply));
        }

        let pass = B64.encode(password.as_bytes());
        let reply = self.execute_command_redacted(&[pass.as_str()], timeout).await?;
        if reply.code != SmtpStatus::AuthSuccessful {
            return Err(SmtpError::auth(&reply));
        }
        info!("Authenticated as {} (LOGIN)", username);
        Ok(())
    }

    /// AUTH CRAM-MD5 (RFC 2195): answer the server challenge with
    /// `user HEX(HMAC-MD5(password, challenge))`.
    pub async fn auth_crammd5(&mut self, username: &str, password: &str, timeout: Timeout) -> SmtpResult<()> {
        let reply = self
            .execute_command(&["AUTH", "CRAM-MD5"], timeout)
            .await?;
        if reply.code != SmtpStatus::AuthContinue {
            return Err(SmtpError::auth(&reply));
        }

        let answer = match crammd5_response(username, password, &reply.message) {
            Ok(answer) => answer,
            Err(e) => {
                // Cancel the exchange (RFC 4954) so the next command is read as one.
                let cancelled = self.execute_command(&["*"], timeout).await?;
                debug!("CRAM-MD5 exchange cancelled: {}", cancelled);
                return Err(e);
            }
        };
        let reply = self.execute_command_redacted(&[answer.as_str()], timeout).await?;
        if reply.code != SmtpStatus::AuthSuccessful {
            return Err(SmtpError::auth(&reply));
        }
        info!("Authenticated as {} (CRAM-MD5)", username);
        Ok(())
    }

    /// AUTH XOAUTH2 with an OAuth2 bearer token.
    pub async fn auth_xoauth2(&mut self, username: &str, token: &str, timeout: Timeout) -> SmtpResult<()> {
        let payload = xoauth2_payload(username, token);
        let mut reply = self
            .execute_command_redacted(&["AUTH", "XOAUTH2", payload.as_str()], timeout)
            .await?;
        if reply.code == SmtpStatus::AuthContinue {
            // The 334 carries a JSON error; an empty line ends the exchange.
            debug!("XOAUTH2 challenge: {}", reply.message);
            reply = self.execute_command(&[""], timeout).await?;
        }
        if reply.code != SmtpStatus::AuthSuccessful {
            return Err(SmtpError::auth(&reply));
        }
        info!("Authenticated as {} (XOAUTH2)", username);
        Ok(())
    }
}

// ── Payload helpers ─────────────────────────────────────────────────

/// Base64 of `\0username\0password`.
pub fn plain_payload(username: &str, password: &str) -> String {
    B64.encode(format!("\0{}\0{}", username, password).as_bytes())
}

/// Base64 of the XOAUTH2 SASL string.
pub fn xoauth2_payload(username: &str, token: &str) -> String {
    B64.encode(format!("user={}\x01auth=Bearer {}\x01\x01", username, token).as_bytes())
}

/// Hex HMAC-MD5 of `challenge` keyed with `password`.
pub fn crammd5_digest(password: &str, challenge: &[u8]) -> SmtpResult<String> {
    let mut mac = HmacMd5::new_from_slice(password.as_bytes())
        .map_err(|e| SmtpError::config(format!("Invalid CRAM-MD5 key: {}", e)))?;
    mac.update(challenge);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// The base64 line answering a base64 CRAM-MD5 challenge.
pub fn crammd5_response(username: &str, password: &str, challenge_b64: &str) -> SmtpResult<String> {
    let challenge = B64.decode(challenge_b64.trim().as_bytes()).map_err(|e| {
        SmtpError::new(
            SmtpErrorKind::Authentication,
            format!("Invalid CRAM-MD5 challenge: {}", e),
        )
    })?;
    let digest = crammd5_digest(password, &challenge)?;
    Ok(B64.encode(format!("{} {}", username, digest).as_bytes()))
}
