//! Scripted SMTP server for integration tests.
//!
//! Every connection gets a fresh session driven by a [`Script`]: canned
//! replies per verb, optional delays and hang-ups, and working PLAIN,
//! LOGIN, CRAM-MD5 and XOAUTH2 exchanges for [`USER`] / [`PASSWORD`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aiosmtp::auth::crammd5_digest;
use aiosmtp::SmtpConfig;
use base64::Engine;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

pub const USER: &str = "alice";
pub const PASSWORD: &str = "wonderland";
pub const TOKEN: &str = "ya29.good-token";
pub const CHALLENGE: &str = "<12345.67890@mock.example.com>";

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

pub const EHLO_REPLY: &str = "250-mock.example.com Hello\r\n\
250-SIZE 10240000\r\n\
250-8BITMIME\r\n\
250-PIPELINING\r\n\
250-ENHANCEDSTATUSCODES\r\n\
250-AUTH PLAIN LOGIN CRAM-MD5\r\n\
250 HELP";

/// How the server behaves for one session.
#[derive(Debug, Clone)]
pub struct Script {
    greeting: Option<String>,
    ehlo: String,
    overrides: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    hangup_on: Option<String>,
    data_reply: String,
    cram_challenge: Option<String>,
    tls: Option<Arc<rustls::ServerConfig>>,
    tls_ehlo: String,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Some("220 mock.example.com ESMTP ready".into()),
            ehlo: EHLO_REPLY.into(),
            overrides: HashMap::new(),
            delays: HashMap::new(),
            hangup_on: None,
            data_reply: "250 2.0.0 OK queued".into(),
            cram_challenge: None,
            tls: None,
            tls_ehlo: EHLO_REPLY.into(),
        }
    }
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply `reply` to a command. `key` is either a verb (`"NOOP"`) or a
    /// verb with its first argument (`"RCPT TO:<bob@example.com>"`); the
    /// longer key wins. Matching ignores case.
    pub fn reply(mut self, key: &str, reply: &str) -> Self {
        self.overrides.insert(key.to_uppercase(), reply.to_string());
        self
    }

    /// Sleep before answering `verb`.
    pub fn delay(mut self, verb: &str, by: Duration) -> Self {
        self.delays.insert(verb.to_uppercase(), by);
        self
    }

    /// Drop the connection instead of answering `verb`.
    pub fn hangup_on(mut self, verb: &str) -> Self {
        self.hangup_on = Some(verb.to_uppercase());
        self
    }

    pub fn ehlo(mut self, reply: &str) -> Self {
        self.ehlo = reply.to_string();
        self
    }

    /// `None` keeps the connection open without ever greeting.
    pub fn greeting(mut self, greeting: Option<&str>) -> Self {
        self.greeting = greeting.map(str::to_string);
        self
    }

    pub fn data_reply(mut self, reply: &str) -> Self {
        self.data_reply = reply.to_string();
        self
    }

    /// Offer STARTTLS with a freshly generated self-signed certificate for
    /// `localhost`. Before the upgrade EHLO advertises only STARTTLS; after
    /// it the regular [`EHLO_REPLY`] is sent.
    pub fn starttls(mut self) -> Self {
        self.ehlo = "250-mock.example.com Hello\r\n250-SIZE 10240000\r\n250 STARTTLS".into();
        self.tls = Some(server_tls_config());
        self
    }

    /// Send `raw` as the CRAM-MD5 challenge text instead of the encoded
    /// [`CHALLENGE`].
    pub fn cram_challenge(mut self, raw: &str) -> Self {
        self.cram_challenge = Some(raw.to_string());
        self
    }
}

#[derive(Debug, Default)]
struct Recorded {
    commands: Vec<String>,
    messages: Vec<String>,
    sessions: usize,
}

pub struct MockServer {
    port: u16,
    recorded: Arc<Mutex<Recorded>>,
}

impl MockServer {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let script = Arc::new(script);

        let shared = Arc::clone(&recorded);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                shared.lock().unwrap().sessions += 1;
                let script = Arc::clone(&script);
                let recorded = Arc::clone(&shared);
                tokio::spawn(async move {
                    let _ = serve(stream, &script, &recorded).await;
                });
            }
        });

        Self { port, recorded }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Client settings pointing at this server.
    pub fn config(&self) -> SmtpConfig {
        SmtpConfig {
            source_address: Some("client.test".into()),
            timeout_secs: Some(5.0),
            ..SmtpConfig::new("127.0.0.1", self.port)
        }
    }

    /// Every line received, in order, across sessions.
    pub fn commands(&self) -> Vec<String> {
        self.recorded.lock().unwrap().commands.clone()
    }

    /// Commands starting with `verb`.
    pub fn commands_for(&self, verb: &str) -> Vec<String> {
        let verb = verb.to_uppercase();
        self.commands()
            .into_iter()
            .filter(|c| c.to_uppercase().starts_with(&verb))
            .collect()
    }

    /// DATA payloads as received on the wire, without the final dot line.
    pub fn messages(&self) -> Vec<String> {
        self.recorded.lock().unwrap().messages.clone()
    }

    pub fn sessions(&self) -> usize {
        self.recorded.lock().unwrap().sessions
    }
}

enum Pending {
    PlainResponse,
    LoginUser,
    LoginPass(String),
    CramMd5,
    XOAuth2Error,
}

async fn write_reply<W: AsyncWrite + Unpin>(out: &mut W, reply: &str) -> std::io::Result<()> {
    out.write_all(reply.as_bytes()).await?;
    out.write_all(b"\r\n").await?;
    out.flush().await
}

fn key_of(line: &str) -> (String, String) {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_uppercase();
    let long = match words.next() {
        Some(arg) => format!("{} {}", verb, arg.to_uppercase()),
        None => verb.clone(),
    };
    (verb, long)
}

fn decode(b64: &str) -> String {
    B64.decode(b64.trim())
        .map(|raw| String::from_utf8_lossy(&raw).into_owned())
        .unwrap_or_default()
}

fn check_plain(payload: &str) -> &'static str {
    if decode(payload) == format!("\0{}\0{}", USER, PASSWORD) {
        "235 2.7.0 Authentication successful"
    } else {
        "535 5.7.8 Authentication credentials invalid"
    }
}

fn server_tls_config() -> Arc<rustls::ServerConfig> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let chain = vec![CertificateDer::from(cert.serialize_der().unwrap())];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .unwrap();
    Arc::new(config)
}

async fn serve(
    mut stream: TcpStream,
    script: &Script,
    recorded: &Mutex<Recorded>,
) -> std::io::Result<()> {
    match script.greeting {
        Some(ref greeting) => {
            stream.write_all(format!("{}\r\n", greeting).as_bytes()).await?;
        }
        None => {
            // Silent server: hold the socket until the client gives up.
            let mut sink = [0u8; 512];
            while stream.read(&mut sink).await? > 0 {}
            return Ok(());
        }
    }

    let Some(tcp) = session(stream, script, recorded, script.tls.is_some()).await? else {
        return Ok(());
    };
    let Some(ref tls) = script.tls else {
        return Ok(());
    };
    let stream = TlsAcceptor::from(Arc::clone(tls)).accept(tcp).await?;
    session(stream, script, recorded, false).await?;
    Ok(())
}

/// Run commands until the client leaves. Returns the stream when the client
/// asked for STARTTLS and `offer_tls` is set.
async fn session<S>(
    stream: S,
    script: &Script,
    recorded: &Mutex<Recorded>,
    offer_tls: bool,
) -> std::io::Result<Option<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read, mut out) = tokio::io::split(stream);
    let mut input = BufReader::new(read);
    let mut buf = Vec::new();
    let ehlo = if offer_tls || script.tls.is_none() {
        &script.ehlo
    } else {
        &script.tls_ehlo
    };

    let mut pending: Option<Pending> = None;
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        recorded.lock().unwrap().commands.push(line.clone());

        if let Some(state) = pending.take() {
            let reply = match state {
                _ if line == "*" => "501 5.7.0 Authentication cancelled".to_string(),
                Pending::PlainResponse => check_plain(&line).to_string(),
                Pending::LoginUser => {
                    pending = Some(Pending::LoginPass(decode(&line)));
                    "334 UGFzc3dvcmQ6".to_string()
                }
                Pending::LoginPass(user) => {
                    if user == USER && decode(&line) == PASSWORD {
                        "235 2.7.0 Authentication successful".to_string()
                    } else {
                        "535 5.7.8 Authentication credentials invalid".to_string()
                    }
                }
                Pending::CramMd5 => {
                    let answer = decode(&line);
                    let expected = format!(
                        "{} {}",
                        USER,
                        crammd5_digest(PASSWORD, CHALLENGE.as_bytes()).unwrap()
                    );
                    if answer == expected {
                        "235 2.7.0 Authentication successful".to_string()
                    } else {
                        "535 5.7.8 Authentication credentials invalid".to_string()
                    }
                }
                Pending::XOAuth2Error => "535 5.7.8 Username and Password not accepted".to_string(),
            };
            write_reply(&mut out, &reply).await?;
            continue;
        }

        let (verb, long) = key_of(&line);
        if let Some(delay) = script.delays.get(&verb) {
            tokio::time::sleep(*delay).await;
        }
        if script.hangup_on.as_deref() == Some(verb.as_str()) {
            return Ok(None);
        }
        if let Some(reply) = script.overrides.get(&long).or_else(|| script.overrides.get(&verb)) {
            write_reply(&mut out, reply).await?;
            if verb == "QUIT" || reply.starts_with("421") {
                return Ok(None);
            }
            if verb == "DATA" && reply.starts_with("354") {
                read_data(&mut input, &mut out, script, recorded).await?;
            }
            continue;
        }

        let arg = line
            .split_once(' ')
            .map(|(_, rest)| rest.trim().to_string())
            .unwrap_or_default();
        let reply = match verb.as_str() {
            "EHLO" => ehlo.clone(),
            "HELO" => "250 mock.example.com".to_string(),
            "NOOP" | "RSET" | "MAIL" | "RCPT" => "250 2.0.0 OK".to_string(),
            "HELP" => "214 Supported: HELO EHLO MAIL RCPT DATA RSET NOOP QUIT VRFY".to_string(),
            "VRFY" if arg.is_empty() => "501 5.5.4 Argument required".to_string(),
            "VRFY" => "252 2.1.5 Cannot VRFY user, but will accept message".to_string(),
            "EXPN" => "502 5.5.1 EXPN not implemented".to_string(),
            "STARTTLS" if offer_tls => {
                write_reply(&mut out, "220 2.0.0 Ready to start TLS").await?;
                return Ok(Some(input.into_inner().unsplit(out)));
            }
            "STARTTLS" if script.tls.is_some() => "503 5.5.1 TLS already active".to_string(),
            "STARTTLS" => "454 4.7.0 TLS not available".to_string(),
            "QUIT" => {
                write_reply(&mut out, "221 2.0.0 Bye").await?;
                return Ok(None);
            }
            "DATA" => {
                write_reply(&mut out, "354 End data with <CR><LF>.<CR><LF>").await?;
                read_data(&mut input, &mut out, script, recorded).await?;
                continue;
            }
            "AUTH" => {
                let mut words = arg.split_whitespace();
                let mechanism = words.next().unwrap_or_default().to_uppercase();
                let initial = words.next();
                match (mechanism.as_str(), initial) {
                    ("PLAIN", Some(payload)) => check_plain(payload).to_string(),
                    ("PLAIN", None) => {
                        pending = Some(Pending::PlainResponse);
                        "334 ".to_string()
                    }
                    ("LOGIN", Some(user)) => {
                        pending = Some(Pending::LoginPass(decode(user)));
                        "334 UGFzc3dvcmQ6".to_string()
                    }
                    ("LOGIN", None) => {
                        pending = Some(Pending::LoginUser);
                        "334 VXNlcm5hbWU6".to_string()
                    }
                    ("CRAM-MD5", _) => {
                        pending = Some(Pending::CramMd5);
                        match script.cram_challenge {
                            Some(ref raw) => format!("334 {}", raw),
                            None => format!("334 {}", B64.encode(CHALLENGE)),
                        }
                    }
                    ("XOAUTH2", Some(payload)) => {
                        let expected = format!("user={}\x01auth=Bearer {}\x01\x01", USER, TOKEN);
                        if decode(payload) == expected {
                            "235 2.7.0 Accepted".to_string()
                        } else {
                            pending = Some(Pending::XOAuth2Error);
                            format!("334 {}", B64.encode(r#"{"status":"401"}"#))
                        }
                    }
                    _ => "504 5.5.4 Unrecognized authentication type".to_string(),
                }
            }
            _ => "500 5.5.2 Command not recognized".to_string(),
        };
        write_reply(&mut out, &reply).await?;
    }
}

async fn read_data<R, W>(
    input: &mut BufReader<R>,
    out: &mut W,
    script: &Script,
    recorded: &Mutex<Recorded>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut body = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if input.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        if line == b".\r\n" {
            break;
        }
        body.extend_from_slice(&line);
    }
    recorded
        .lock()
        .unwrap()
        .messages
        .push(String::from_utf8_lossy(&body).into_owned());
    write_reply(out, &script.data_reply).await
}
