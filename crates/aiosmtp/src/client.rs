//! The SMTP client: a connection plus what the server told us about itself.
//!
//! Protocol commands live in `commands.rs` and authentication in `auth.rs`;
//! both extend [`SmtpClient`] with further `impl` blocks.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::connection::{is_transport_failure, SmtpConnection, TlsInfo};
use crate::email::RawMessage;
use crate::error::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::esmtp::EsmtpExtensions;
use crate::message::{build_message, EmailMessage};
use crate::response::SmtpResponse;
use crate::status::SmtpStatus;
use crate::tls;
use crate::types::{ConnectOptions, SendResult, SmtpConfig, Timeout, TlsOptions};

/// A client shared between tasks. The mutex serialises whole operations.
pub type SharedSmtpClient = Arc<tokio::sync::Mutex<SmtpClient>>;

/// What the server advertised during this session.
#[derive(Debug, Clone, Default)]
pub(crate) struct ServerState {
    pub last_ehlo_response: Option<SmtpResponse>,
    pub last_helo_response: Option<SmtpResponse>,
    pub extensions: EsmtpExtensions,
    pub supports_esmtp: bool,
}

/// Envelope options for [`SmtpClient::sendmail`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Extra MAIL FROM parameters, e.g. `RET=HDRS`.
    pub mail_options: Vec<String>,
    /// Extra RCPT TO parameters, e.g. `NOTIFY=FAILURE`.
    pub rcpt_options: Vec<String>,
    pub timeout: Timeout,
}

/// Asynchronous SMTP client.
///
/// One client drives one connection; every operation borrows it mutably,
/// so commands of a session never interleave. Share it through
/// [`SharedSmtpClient`] when several tasks need it.
#[derive(Debug)]
pub struct SmtpClient {
    pub(crate) conn: SmtpConnection,
    pub(crate) state: ServerState,
}

impl Default for SmtpClient {
    fn default() -> Self {
        Self::new(SmtpConfig::default())
    }
}

impl SmtpClient {
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            conn: SmtpConnection::new(config),
            state: ServerState::default(),
        }
    }

    pub fn into_shared(self) -> SharedSmtpClient {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn config(&self) -> &SmtpConfig {
        self.conn.config()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.conn.timeout()
    }

    /// Change the timeout used by later commands.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.conn.set_timeout(timeout);
    }

    pub fn source_address(&mut self) -> String {
        self.conn.source_address()
    }

    // ── Connection ──────────────────────────────────────────────

    /// Connect with the saved settings.
    pub async fn connect(&mut self) -> SmtpResult<SmtpResponse> {
        self.connect_with(ConnectOptions::default()).await
    }

    /// Connect, saving `opts` over the current settings first. Returns the
    /// server greeting. With `start_tls` set the session is upgraded before
    /// returning.
    pub async fn connect_with(&mut self, opts: ConnectOptions) -> SmtpResult<SmtpResponse> {
        self.state = ServerState::default();
        let greeting = self.conn.connect_with(opts).await?;

        if self.conn.config().start_tls {
            if let Err(e) = self.starttls(TlsOptions::default()).await {
                self.close();
                return Err(e);
            }
        }
        Ok(greeting)
    }

    /// Drop the connection and forget the server state.
    pub fn close(&mut self) {
        self.conn.close();
        self.state = ServerState::default();
    }

    /// End a session: QUIT when still connected, then close no matter what.
    /// Failures caused by the server going away are not reported.
    pub async fn shutdown(&mut self) -> SmtpResult<()> {
        let mut outcome = Ok(());
        if self.is_connected() {
            if let Err(e) = self.quit(Timeout::Default).await {
                if is_transport_failure(e.kind) || e.is_response() {
                    debug!("Ignoring error during shutdown: {}", e);
                } else {
                    outcome = Err(e);
                }
            }
        }
        self.close();
        outcome
    }

    /// Send a raw command and return the reply, whatever its code.
    pub async fn execute_command(
        &mut self,
        args: &[&str],
        timeout: Timeout,
    ) -> SmtpResult<SmtpResponse> {
        let result = self.conn.execute_command(args, timeout).await;
        self.sync_state();
        result
    }

    pub(crate) async fn execute_command_redacted(
        &mut self,
        args: &[&str],
        timeout: Timeout,
    ) -> SmtpResult<SmtpResponse> {
        let result = self.conn.execute_command_redacted(args, timeout).await;
        self.sync_state();
        result
    }

    pub(crate) async fn send_data(
        &mut self,
        message: &[u8],
        timeout: Timeout,
    ) -> SmtpResult<SmtpResponse> {
        let result = self.conn.send_data(message, timeout).await;
        self.sync_state();
        result
    }

    /// The connection may have closed itself (timeout, 421, lost peer).
    fn sync_state(&mut self) {
        if !self.conn.is_connected() {
            self.state = ServerState::default();
        }
    }

    // ── Transport info ──────────────────────────────────────────

    pub fn is_tls(&self) -> bool {
        self.conn.is_tls()
    }

    pub fn peer_addr(&self) -> SmtpResult<SocketAddr> {
        self.conn.peer_addr()
    }

    pub fn local_addr(&self) -> SmtpResult<SocketAddr> {
        self.conn.local_addr()
    }

    pub fn tls_info(&self) -> SmtpResult<Option<TlsInfo>> {
        self.conn.tls_info()
    }

    // ── Server state ────────────────────────────────────────────

    pub fn last_ehlo_response(&self) -> Option<&SmtpResponse> {
        self.state.last_ehlo_response.as_ref()
    }

    pub fn last_helo_response(&self) -> Option<&SmtpResponse> {
        self.state.last_helo_response.as_ref()
    }

    pub fn esmtp_extensions(&self) -> &EsmtpExtensions {
        &self.state.extensions
    }

    /// Lower-cased auth mechanisms from the last EHLO.
    pub fn server_auth_methods(&self) -> &[String] {
        &self.state.extensions.auth_methods
    }

    pub fn supports_esmtp(&self) -> bool {
        self.state.supports_esmtp
    }

    pub fn is_ehlo_or_helo_needed(&self) -> bool {
        self.state.last_ehlo_response.is_none() && self.state.last_helo_response.is_none()
    }

    pub fn supports_extension(&self, extension: &str) -> bool {
        self.state.extensions.supports(extension)
    }

    /// Greet the server unless that already happened this session: EHLO,
    /// falling back to HELO when EHLO is rejected.
    pub async fn ehlo_or_helo_if_needed(&mut self) -> SmtpResult<()> {
        if !self.is_ehlo_or_helo_needed() {
            return Ok(());
        }
        match self.ehlo(None, Timeout::Default).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind == SmtpErrorKind::Helo && self.is_connected() => {
                debug!("EHLO rejected ({}), trying HELO", e);
                match self.helo(None, Timeout::Default).await {
                    Ok(_) => Ok(()),
                    // The server hung up after refusing EHLO.
                    Err(helo_err) if is_transport_failure(helo_err.kind) => Err(e),
                    Err(helo_err) => Err(helo_err),
                }
            }
            Err(e) => Err(e),
        }
    }

    // ── STARTTLS ────────────────────────────────────────────────

    /// Upgrade the session with STARTTLS (RFC 3207). `opts` apply to this
    /// upgrade only. Everything learned from the server before the upgrade
    /// is discarded.
    pub async fn starttls(&mut self, opts: TlsOptions) -> SmtpResult<SmtpResponse> {
        let tls_config = opts.merged(self.conn.config())?;
        if self.conn.is_tls() {
            return Err(SmtpError::tls("Connection already using TLS"));
        }

        self.ehlo_or_helo_if_needed().await?;
        if !self.supports_extension("starttls") {
            return Err(SmtpError::not_supported(
                "SMTP STARTTLS extension not supported by server.",
            ));
        }

        // Load local TLS material before STARTTLS; failing here leaves the
        // plain session intact.
        let rustls_config = tls::client_config(&tls_config).await?;

        let reply = self.execute_command(&["STARTTLS"], opts.timeout).await?;
        if reply.code != SmtpStatus::Ready {
            return Err(SmtpError::response(reply.code, reply.message));
        }

        let server_hostname = opts
            .server_hostname
            .clone()
            .unwrap_or_else(|| tls_config.hostname.clone());
        if let Err(e) = self
            .conn
            .upgrade_tls(rustls_config, &server_hostname, opts.timeout)
            .await
        {
            self.close();
            return Err(e);
        }

        self.state = ServerState::default();
        Ok(reply)
    }

    // ── Mail transactions ───────────────────────────────────────

    /// Run a complete mail transaction: MAIL, RCPT for each recipient,
    /// DATA. Succeeds when at least one recipient was accepted; refused
    /// recipients are listed in the result.
    pub async fn sendmail<S: AsRef<str>>(
        &mut self,
        sender: &str,
        recipients: &[S],
        message: &[u8],
        opts: &SendOptions,
    ) -> SmtpResult<SendResult> {
        if recipients.is_empty() {
            return Err(SmtpError::recipients_refused(Vec::new()));
        }

        self.ehlo_or_helo_if_needed().await?;

        let mut mail_options = opts.mail_options.clone();
        let needs_utf8 = !sender.is_ascii() || recipients.iter().any(|r| !r.as_ref().is_ascii());
        if needs_utf8 {
            if !self.supports_extension("smtputf8") {
                return Err(SmtpError::not_supported(
                    "SMTPUTF8 extension not supported by server.",
                ));
            }
            mail_options.push("SMTPUTF8".into());
        }
        if !message.is_ascii() && self.supports_extension("8bitmime") {
            mail_options.push("BODY=8BITMIME".into());
        }
        if self.supports_extension("size") {
            mail_options.push(format!("SIZE={}", message.len()));
        }

        match self
            .transaction(sender, recipients, message, &mail_options, opts)
            .await
        {
            Ok(result) => Ok(result),
            Err(e) => {
                let resettable = e.is_response() || e.kind == SmtpErrorKind::RecipientsRefused;
                if resettable && self.is_connected() {
                    if let Err(rset_err) = self.rset(Timeout::Default).await {
                        debug!("RSET after failed transaction: {}", rset_err);
                    }
                }
                Err(e)
            }
        }
    }

    async fn transaction<S: AsRef<str>>(
        &mut self,
        sender: &str,
        recipients: &[S],
        message: &[u8],
        mail_options: &[String],
        opts: &SendOptions,
    ) -> SmtpResult<SendResult> {
        self.mail(sender, mail_options, opts.timeout).await?;

        let mut refused = BTreeMap::new();
        let mut errors = Vec::new();
        for rcpt in recipients {
            let rcpt = rcpt.as_ref();
            match self.rcpt(rcpt, &opts.rcpt_options, opts.timeout).await {
                Ok(_) => {}
                Err(e) if e.kind == SmtpErrorKind::RecipientRefused => {
                    warn!("Recipient {} refused: {}", rcpt, e);
                    refused.insert(
                        rcpt.to_string(),
                        SmtpResponse::new(e.code.unwrap_or_default(), e.message.clone()),
                    );
                    errors.push(e);
                }
                Err(e) => return Err(e),
            }
        }
        if errors.len() == recipients.len() {
            return Err(SmtpError::recipients_refused(errors));
        }

        let response = self.data(message, opts.timeout).await?;
        info!(
            "Message from {} accepted for {} of {} recipient(s)",
            sender,
            recipients.len() - refused.len(),
            recipients.len()
        );
        Ok(SendResult { refused, response })
    }

    /// Render and send a structured message. The envelope comes from the
    /// message's From, To, Cc and Bcc.
    pub async fn send_message(&mut self, message: &EmailMessage) -> SmtpResult<SendResult> {
        let rendered = build_message(message)?;
        let recipients = message.envelope_recipients();
        self.sendmail(
            &message.envelope_sender(),
            &recipients,
            rendered.as_bytes(),
            &SendOptions::default(),
        )
        .await
    }

    /// Send RFC 5322 text. A missing `sender` or `recipients` is taken from
    /// the message headers (honouring a `Resent-` block). Bcc headers are
    /// removed before sending.
    pub async fn send_raw_message(
        &mut self,
        raw: &str,
        sender: Option<&str>,
        recipients: Option<&[String]>,
        opts: &SendOptions,
    ) -> SmtpResult<SendResult> {
        let (sender, recipients, payload) = prepare_raw(raw, sender, recipients)?;
        self.sendmail(&sender, &recipients, payload.as_bytes(), opts)
            .await
    }
}

/// Work out the envelope of a raw message and strip its Bcc headers.
pub(crate) fn prepare_raw(
    raw: &str,
    sender: Option<&str>,
    recipients: Option<&[String]>,
) -> SmtpResult<(String, Vec<String>, String)> {
    let mut parsed = RawMessage::parse(raw);

    let sender = match sender {
        Some(s) => s.to_string(),
        None => parsed
            .extract_sender()?
            .ok_or_else(|| SmtpError::message("No From header provided in message"))?,
    };
    let recipients = match recipients {
        Some(r) => r.to_vec(),
        None => parsed.extract_recipients()?,
    };
    if recipients.is_empty() {
        return Err(SmtpError::message("No recipient headers provided in message"));
    }

    parsed.remove("Bcc");
    parsed.remove("Resent-Bcc");
    Ok((sender, recipients, parsed.to_wire()))
}
