//! One-shot helpers: connect, optionally authenticate, send, disconnect.

use crate::client::{SendOptions, SmtpClient};
use crate::error::SmtpResult;
use crate::message::EmailMessage;
use crate::types::{SendResult, SmtpConfig, SmtpCredentials};

async fn open(config: &SmtpConfig, credentials: Option<&SmtpCredentials>) -> SmtpResult<SmtpClient> {
    let mut client = SmtpClient::new(config.clone());
    client.connect().await?;
    if let Some(creds) = credentials {
        if let Err(e) = client.authenticate(creds).await {
            let _ = client.shutdown().await;
            return Err(e);
        }
    }
    Ok(client)
}

/// QUIT after sending. A send error takes precedence over a QUIT error.
async fn finish(mut client: SmtpClient, outcome: SmtpResult<SendResult>) -> SmtpResult<SendResult> {
    let closed = client.shutdown().await;
    let result = outcome?;
    closed?;
    Ok(result)
}

/// Send a structured message over a fresh connection.
pub async fn send(
    message: &EmailMessage,
    config: &SmtpConfig,
    credentials: Option<&SmtpCredentials>,
) -> SmtpResult<SendResult> {
    let mut client = open(config, credentials).await?;
    let outcome = client.send_message(message).await;
    finish(client, outcome).await
}

/// Send RFC 5322 text over a fresh connection. See
/// [`SmtpClient::send_raw_message`] for how the envelope is derived.
pub async fn send_raw(
    raw: &str,
    sender: Option<&str>,
    recipients: Option<&[String]>,
    config: &SmtpConfig,
    credentials: Option<&SmtpCredentials>,
) -> SmtpResult<SendResult> {
    let mut client = open(config, credentials).await?;
    let outcome = client
        .send_raw_message(raw, sender, recipients, &SendOptions::default())
        .await;
    finish(client, outcome).await
}
