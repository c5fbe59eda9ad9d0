//! The `send` and `check` subcommands.

use std::collections::BTreeMap;

use aiosmtp::{
    api, EmailAddress, EmailMessage, MessageBuilder, SendResult, SmtpClient, Timeout,
};
use tracing::{info, warn};

use crate::cli::{CheckArgs, SendArgs};
use crate::config::{resolve, Resolved};
use crate::error::{CliError, CliResult};

pub async fn send(args: &SendArgs) -> CliResult<()> {
    let Resolved {
        config,
        credentials,
    } = resolve(&args.connection)?;

    let result = match args.file {
        Some(ref path) => {
            let raw = std::fs::read_to_string(path).map_err(|source| CliError::Io {
                path: path.clone(),
                source,
            })?;
            let recipients = envelope_recipients(args);
            api::send_raw(
                &raw,
                args.from.as_deref(),
                (!recipients.is_empty()).then_some(recipients.as_slice()),
                &config,
                credentials.as_ref(),
            )
            .await?
        }
        None => {
            let message = build_message(args)?;
            api::send(&message, &config, credentials.as_ref()).await?
        }
    };

    report(&result);
    Ok(())
}

/// Bare addresses from --to, --cc and --bcc.
fn envelope_recipients(args: &SendArgs) -> Vec<String> {
    args.to
        .iter()
        .chain(&args.cc)
        .chain(&args.bcc)
        .map(|m| aiosmtp::email::parse_address(m))
        .filter(|a| !a.is_empty())
        .collect()
}

/// Assemble a message from the command-line fields.
pub fn build_message(args: &SendArgs) -> CliResult<EmailMessage> {
    let from = args
        .from
        .as_deref()
        .ok_or_else(|| CliError::usage("--from is required unless --file is given"))?;
    if args.to.is_empty() && args.cc.is_empty() && args.bcc.is_empty() {
        return Err(CliError::usage("at least one recipient is required"));
    }

    let mut builder = MessageBuilder::new()
        .from_mailbox(from)?
        .subject(args.subject.clone())
        .text(args.body.clone().unwrap_or_default());
    for list in &args.to {
        builder = builder.to_mailboxes(list)?;
    }
    for cc in &args.cc {
        for addr in EmailAddress::parse_list(cc)? {
            builder = builder.cc(addr);
        }
    }
    for bcc in &args.bcc {
        for addr in EmailAddress::parse_list(bcc)? {
            builder = builder.bcc(addr);
        }
    }
    if let Some(ref html) = args.html {
        builder = builder.html(html.clone());
    }
    Ok(builder.build()?)
}

fn report(result: &SendResult) {
    for (rcpt, reply) in &result.refused {
        warn!("{} refused: {}", rcpt, reply);
        eprintln!("refused {}: {}", rcpt, reply);
    }
    info!("Server accepted message: {}", result.response);
    println!("{}", result.response);
}

pub async fn check(args: &CheckArgs) -> CliResult<()> {
    let Resolved {
        config,
        credentials,
    } = resolve(&args.connection)?;

    let mut client = SmtpClient::new(config);
    let greeting = client.connect().await?;
    let outcome = inspect(&mut client, credentials.as_ref()).await;
    let closed = client.shutdown().await;

    let summary = outcome?;
    closed?;
    println!("greeting: {}", greeting);
    print!("{}", summary);
    Ok(())
}

async fn inspect(
    client: &mut SmtpClient,
    credentials: Option<&aiosmtp::SmtpCredentials>,
) -> CliResult<String> {
    client.ehlo_or_helo_if_needed().await?;

    let mut out = String::new();
    if let Some(info) = client.tls_info()? {
        out.push_str(&format!(
            "tls: {} {}\n",
            info.protocol_version, info.cipher_suite
        ));
    }
    if client.supports_esmtp() {
        let extensions: BTreeMap<_, _> = client.esmtp_extensions().extensions.iter().collect();
        out.push_str("extensions:\n");
        for (name, params) in extensions {
            if params.is_empty() {
                out.push_str(&format!("  {}\n", name));
            } else {
                out.push_str(&format!("  {} {}\n", name, params));
            }
        }
        if !client.server_auth_methods().is_empty() {
            out.push_str(&format!("auth: {}\n", client.server_auth_methods().join(" ")));
        }
    } else {
        out.push_str("ESMTP not supported (HELO accepted)\n");
    }

    if let Some(creds) = credentials {
        client.authenticate(creds).await?;
        out.push_str(&format!("login: ok as {}\n", creds.username));
    }
    client.noop(Timeout::Default).await?;
    Ok(out)
}
