//! Connection lifecycle: TCP/TLS setup, the server greeting, and the
//! timed command/reply exchange every higher layer goes through.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::error::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::protocol::{check_command_args, encode_data, SmtpCodec, SmtpStream};
use crate::response::SmtpResponse;
use crate::status::SmtpStatus;
use crate::tls;
use crate::types::{ConnectOptions, SmtpConfig, Timeout};

/// Negotiated TLS parameters of an encrypted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    pub protocol_version: String,
    pub cipher_suite: String,
}

/// One SMTP transport. Holds the saved settings across reconnects.
pub struct SmtpConnection {
    config: SmtpConfig,
    codec: Option<SmtpCodec>,
    local_hostname: Option<String>,
}

/// Run `fut` under an optional deadline. `None` waits forever.
async fn within<T, F>(limit: Option<Duration>, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    match limit {
        Some(d) => tokio::time::timeout(d, fut).await.ok(),
        None => Some(fut.await),
    }
}

impl SmtpConnection {
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config,
            codec: None,
            local_hostname: None,
        }
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.codec.is_some()
    }

    /// Saved timeout used by commands called without an override.
    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout()
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.config.set_timeout(timeout);
    }

    /// Name announced with EHLO/HELO: the configured one, else the local
    /// hostname (looked up once and cached).
    pub fn source_address(&mut self) -> String {
        if let Some(ref source) = self.config.source_address {
            return source.clone();
        }
        self.local_hostname
            .get_or_insert_with(|| {
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| "localhost".to_string())
            })
            .clone()
    }

    // ── Connect / close ─────────────────────────────────────────

    /// Merge `opts` into the saved settings, open the transport and read
    /// the greeting. STARTTLS-on-connect is left to the caller.
    pub async fn connect_with(&mut self, opts: ConnectOptions) -> SmtpResult<SmtpResponse> {
        if self.is_connected() {
            return Err(SmtpError::connect("Already connected"));
        }

        let mut config = self.config.clone();
        config.apply(opts);
        config.validate()?;
        // Resolved last, so a TLS mode given in `opts` picks the port.
        config.port = Some(config.effective_port());
        self.config = config;

        match self.open().await {
            Ok(greeting) => Ok(greeting),
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    async fn open(&mut self) -> SmtpResult<SmtpResponse> {
        let host = self.config.hostname.clone();
        let port = self.config.effective_port();
        let timeout = self.config.timeout();
        debug!("Connecting to SMTP server {}:{}…", host, port);

        let tcp = within(timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .ok_or_else(|| {
                SmtpError::connect_timeout(format!(
                    "Timed out connecting to {} on port {}",
                    host, port
                ))
            })?
            .map_err(|e| {
                SmtpError::connect(format!(
                    "Error connecting to {} on port {}: {}",
                    host, port, e
                ))
            })?;

        let stream = if self.config.use_tls {
            let tls_config = tls::client_config(&self.config).await?;
            let tls_stream = within(timeout, tls::handshake(tcp, &host, tls_config))
                .await
                .ok_or_else(|| {
                    SmtpError::connect_timeout(format!(
                        "Timed out connecting to {} on port {}",
                        host, port
                    ))
                })??;
            SmtpStream::Tls(BufReader::new(tls_stream))
        } else {
            SmtpStream::Plain(BufReader::new(tcp))
        };

        let mut codec = SmtpCodec::new(stream);
        let greeting = match within(timeout, codec.read_response()).await {
            Some(reply) => reply?,
            None => {
                return Err(SmtpError::connect_timeout(
                    "Timed out waiting for server ready message",
                ))
            }
        };
        if greeting.code != SmtpStatus::Ready {
            return Err(SmtpError::connect(greeting.to_string()).with_code(greeting.code));
        }

        info!("SMTP connected to {}:{} – {}", host, port, greeting.message);
        self.codec = Some(codec);
        Ok(greeting)
    }

    /// Drop the transport. Safe to call when already closed.
    pub fn close(&mut self) {
        if self.codec.take().is_some() {
            info!(
                "SMTP connection to {} closed",
                self.config.hostname
            );
        }
    }

    // ── Command exchange ────────────────────────────────────────

    fn codec_mut(&mut self) -> SmtpResult<&mut SmtpCodec> {
        self.codec
            .as_mut()
            .ok_or_else(|| SmtpError::disconnected("Not connected"))
    }

    /// Send one command and wait for its reply.
    ///
    /// A timeout or unreadable reply closes the connection. A 421 reply is
    /// returned to the caller after the connection is closed.
    pub async fn execute_command(
        &mut self,
        args: &[&str],
        timeout: Timeout,
    ) -> SmtpResult<SmtpResponse> {
        self.exchange(args, false, timeout).await
    }

    /// Like [`execute_command`](Self::execute_command), but the arguments
    /// are kept out of the logs.
    pub async fn execute_command_redacted(
        &mut self,
        args: &[&str],
        timeout: Timeout,
    ) -> SmtpResult<SmtpResponse> {
        self.exchange(args, true, timeout).await
    }

    async fn exchange(
        &mut self,
        args: &[&str],
        redact: bool,
        timeout: Timeout,
    ) -> SmtpResult<SmtpResponse> {
        check_command_args(args)?;
        let limit = timeout.resolve(self.timeout());
        let codec = self.codec_mut()?;
        let outcome = within(limit, async {
            codec.send_command(args, redact).await?;
            codec.read_response().await
        })
        .await;
        self.settle(outcome)
    }

    /// Send a message body (encoded for transparency) and read the reply.
    pub async fn send_data(&mut self, message: &[u8], timeout: Timeout) -> SmtpResult<SmtpResponse> {
        let limit = timeout.resolve(self.timeout());
        let payload = encode_data(message);
        let codec = self.codec_mut()?;
        let outcome = within(limit, async {
            codec.send_data(&payload).await?;
            codec.read_response().await
        })
        .await;
        self.settle(outcome)
    }

    fn settle(&mut self, outcome: Option<SmtpResult<SmtpResponse>>) -> SmtpResult<SmtpResponse> {
        match outcome {
            None => {
                self.close();
                Err(SmtpError::timeout("Timed out waiting for server response"))
            }
            Some(Err(e)) => {
                self.close();
                Err(e)
            }
            Some(Ok(reply)) => {
                if reply.code == SmtpStatus::DomainUnavailable {
                    warn!("Server unavailable ({}), closing connection", reply);
                    self.close();
                }
                Ok(reply)
            }
        }
    }

    // ── TLS ─────────────────────────────────────────────────────

    /// Wrap the current plain-text transport in TLS using `tls_config`.
    /// The connection is closed if the handshake fails.
    pub(crate) async fn upgrade_tls(
        &mut self,
        tls_config: Arc<rustls::ClientConfig>,
        server_hostname: &str,
        timeout: Timeout,
    ) -> SmtpResult<()> {
        let limit = timeout.resolve(self.timeout());
        if self.stream()?.is_tls() {
            return Err(SmtpError::tls("Connection already using TLS"));
        }

        let codec = self
            .codec
            .take()
            .ok_or_else(|| SmtpError::disconnected("Not connected"))?;
        let tcp = codec.into_stream().into_plain()?;
        let tls_stream = match within(limit, tls::handshake(tcp, server_hostname, tls_config)).await {
            Some(result) => result?,
            None => return Err(SmtpError::timeout("Timed out during TLS handshake")),
        };

        self.codec = Some(SmtpCodec::new(SmtpStream::Tls(BufReader::new(tls_stream))));
        info!("TLS established with {}", server_hostname);
        Ok(())
    }

    // ── Transport info ──────────────────────────────────────────

    fn stream(&self) -> SmtpResult<&SmtpStream> {
        self.codec
            .as_ref()
            .map(SmtpCodec::stream)
            .ok_or_else(|| SmtpError::disconnected("Not connected"))
    }

    pub fn is_tls(&self) -> bool {
        self.codec.as_ref().is_some_and(|c| c.stream().is_tls())
    }

    pub fn peer_addr(&self) -> SmtpResult<SocketAddr> {
        Ok(self.stream()?.peer_addr()?)
    }

    pub fn local_addr(&self) -> SmtpResult<SocketAddr> {
        Ok(self.stream()?.local_addr()?)
    }

    /// `None` for a plain-text session.
    pub fn tls_info(&self) -> SmtpResult<Option<TlsInfo>> {
        Ok(self
            .stream()?
            .tls_session()
            .map(|(protocol_version, cipher_suite)| TlsInfo {
                protocol_version,
                cipher_suite,
            }))
    }
}

impl std::fmt::Debug for SmtpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConnection")
            .field("hostname", &self.config.hostname)
            .field("port", &self.config.port)
            .field("connected", &self.is_connected())
            .field("tls", &self.is_tls())
            .finish()
    }
}

/// Kinds that mean the peer is gone or unresponsive rather than unhappy.
pub(crate) fn is_transport_failure(kind: SmtpErrorKind) -> bool {
    matches!(
        kind,
        SmtpErrorKind::ServerDisconnected | SmtpErrorKind::Timeout
    )
}
