//! Named SMTP reply codes (RFC 5321 §4.2, RFC 4954, RFC 3207).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reply codes the client checks against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum SmtpStatus {
    SystemStatusOk = 211,
    HelpMessage = 214,
    Ready = 220,
    Closing = 221,
    AuthSuccessful = 235,
    Completed = 250,
    WillForward = 251,
    CannotVrfy = 252,
    AuthContinue = 334,
    StartInput = 354,
    DomainUnavailable = 421,
    MailboxUnavailable = 450,
    ErrorProcessing = 451,
    InsufficientStorage = 452,
    TlsNotAvailable = 454,
    UnrecognizedCommand = 500,
    UnrecognizedParameters = 501,
    CommandNotImplemented = 502,
    BadCommandSequence = 503,
    ParameterNotImplemented = 504,
    DomainDoesNotAcceptMail = 521,
    AccessDenied = 530,
    AuthFailed = 535,
    MailboxDoesNotExist = 550,
    UserNotLocal = 551,
    StorageExceeded = 552,
    MailboxNameInvalid = 553,
    TransactionFailed = 554,
    SyntaxError = 555,
}

impl SmtpStatus {
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Look up a known status by numeric code.
    pub fn from_code(code: u16) -> Option<Self> {
        use SmtpStatus::*;
        let status = match code {
            211 => SystemStatusOk,
            214 => HelpMessage,
            220 => Ready,
            221 => Closing,
            235 => AuthSuccessful,
            250 => Completed,
            251 => WillForward,
            252 => CannotVrfy,
            334 => AuthContinue,
            354 => StartInput,
            421 => DomainUnavailable,
            450 => MailboxUnavailable,
            451 => ErrorProcessing,
            452 => InsufficientStorage,
            454 => TlsNotAvailable,
            500 => UnrecognizedCommand,
            501 => UnrecognizedParameters,
            502 => CommandNotImplemented,
            503 => BadCommandSequence,
            504 => ParameterNotImplemented,
            521 => DomainDoesNotAcceptMail,
            530 => AccessDenied,
            535 => AuthFailed,
            550 => MailboxDoesNotExist,
            551 => UserNotLocal,
            552 => StorageExceeded,
            553 => MailboxNameInvalid,
            554 => TransactionFailed,
            555 => SyntaxError,
            _ => return None,
        };
        Some(status)
    }
}

impl From<SmtpStatus> for u16 {
    fn from(status: SmtpStatus) -> u16 {
        status.code()
    }
}

impl PartialEq<SmtpStatus> for u16 {
    fn eq(&self, other: &SmtpStatus) -> bool {
        *self == other.code()
    }
}

impl fmt::Display for SmtpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.code(), self)
    }
}
