//! SMTP commands (RFC 5321 §4.1.1).
//!
//! Each command checks the reply code and turns an unexpected one into the
//! matching error kind. The raw reply is returned on success.


use crate::client::SmtpClient;
use crate::email::{parse_address, quote_address};
use crate::error::{SmtpError, SmtpResult};
use crate::esmtp::parse_esmtp_extensions;
use crate::response::SmtpResponse;
use crate::status::SmtpStatus;
use crate::types::Timeout;

fn expect(reply: SmtpResponse, accepted: &[SmtpStatus]) -> SmtpResult<SmtpResponse> {
    if accepted.iter().any(|s| reply.code == *s) {
        Ok(reply)
    } else {
        Err(SmtpError::response(reply.code, reply.message))
    }
}

impl SmtpClient {
    /// HELO. `hostname` defaults to [`source_address`](Self::source_address).
    pub async fn helo(&mut self, hostname: Option<&str>, timeout: Timeout) -> SmtpResult<SmtpResponse> {
        let hostname = match hostname {
            Some(h) => h.to_string(),
            None => self.source_address(),
        };
        let reply = self.execute_command(&["HELO", hostname.as_str()], timeout).await?;
        self.state.last_helo_response = Some(reply.clone());
        if reply.code != SmtpStatus::Completed {
            return Err(SmtpError::helo(&reply));
        }
        Ok(reply)
    }

    /// EHLO. On success the advertised extensions replace any known ones.
    pub async fn ehlo(&mut self, hostname: Option<&str>, timeout: Timeout) -> SmtpResult<SmtpResponse> {
        let hostname = match hostname {
            Some(h) => h.to_string(),
            None => self.source_address(),
        };
        let reply = self.execute_command(&["EHLO", hostname.as_str()], timeout).await?;
        self.state.last_ehlo_response = Some(reply.clone());
        if reply.code != SmtpStatus::Completed {
            return Err(SmtpError::helo(&reply));
        }
        self.state.supports_esmtp = true;
        self.state.extensions = parse_esmtp_extensions(&reply.message);
        Ok(reply)
    }

    /// HELP. Returns the help text.
    pub async fn help(&mut self, timeout: Timeout) -> SmtpResult<String> {
        let reply = self.execute_command(&["HELP"], timeout).await?;
        let reply = expect(reply, &[SmtpStatus::SystemStatusOk, SmtpStatus::HelpMessage])?;
        Ok(reply.message)
    }

    pub async fn rset(&mut self, timeout: Timeout) -> SmtpResult<SmtpResponse> {
        let reply = self.execute_command(&["RSET"], timeout).await?;
        expect(reply, &[SmtpStatus::Completed])
    }

    pub async fn noop(&mut self, timeout: Timeout) -> SmtpResult<SmtpResponse> {
        let reply = self.execute_command(&["NOOP"], timeout).await?;
        expect(reply, &[SmtpStatus::Completed])
    }

    /// VRFY. Servers commonly answer 252 ("cannot verify"), which counts
    /// as success.
    pub async fn vrfy(&mut self, address: &str, timeout: Timeout) -> SmtpResult<SmtpResponse> {
        let parsed = parse_address(address);
        let reply = self.execute_command(&["VRFY", parsed.as_str()], timeout).await?;
        expect(
            reply,
            &[SmtpStatus::Completed, SmtpStatus::WillForward, SmtpStatus::CannotVrfy],
        )
    }

    pub async fn expn(&mut self, address: &str, timeout: Timeout) -> SmtpResult<SmtpResponse> {
        let parsed = parse_address(address);
        let reply = self.execute_command(&["EXPN", parsed.as_str()], timeout).await?;
        expect(reply, &[SmtpStatus::Completed])
    }

    /// QUIT, then close the connection.
    pub async fn quit(&mut self, timeout: Timeout) -> SmtpResult<SmtpResponse> {
        let reply = self.execute_command(&["QUIT"], timeout).await?;
        let reply = expect(reply, &[SmtpStatus::Closing])?;
        self.close();
        Ok(reply)
    }

    /// MAIL FROM.
    pub async fn mail(
        &mut self,
        sender: &str,
        options: &[String],
        timeout: Timeout,
    ) -> SmtpResult<SmtpResponse> {
        let from = format!("FROM:{}", quote_address(sender));
        let mut args: Vec<&str> = vec!["MAIL", from.as_str()];
        args.extend(options.iter().map(String::as_str));

        let reply = self.execute_command(&args, timeout).await?;
        if reply.code != SmtpStatus::Completed {
            return Err(SmtpError::sender_refused(&reply, sender));
        }
        Ok(reply)
    }

    /// RCPT TO.
    pub async fn rcpt(
        &mut self,
        recipient: &str,
        options: &[String],
        timeout: Timeout,
    ) -> SmtpResult<SmtpResponse> {
        let to = format!("TO:{}", quote_address(recipient));
        let mut args: Vec<&str> = vec!["RCPT", to.as_str()];
        args.extend(options.iter().map(String::as_str));

        let reply = self.execute_command(&args, timeout).await?;
        if reply.code != SmtpStatus::Completed && reply.code != SmtpStatus::WillForward {
            return Err(SmtpError::recipient_refused(&reply, recipient));
        }
        Ok(reply)
    }

    /// DATA followed by the message. `message` is sent with line endings
    /// normalised and leading dots doubled.
    pub async fn data(&mut self, message: &[u8], timeout: Timeout) -> SmtpResult<SmtpResponse> {
        let start = self.execute_command(&["DATA"], timeout).await?;
        if start.code != SmtpStatus::StartInput {
            return Err(SmtpError::data(&start));
        }

        let reply = self.send_data(message, timeout).await?;
        if reply.code != SmtpStatus::Completed {
            return Err(SmtpError::data(&reply));
        }
        Ok(reply)
    }
}
