use core::fmt;

use crate::observer::SessionObserver;
use crate::security::SecurityNegotiationTrace;
use crate::{SessionError, SessionErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    /// No mutually supported security type.
    Negotiation,
    /// Credentials rejected, cancelled or not provided in time.
    Authentication,
    /// OS-level socket error.
    Transport,
    /// Malformed or unexpected server behavior, including an unexpected close.
    Protocol,
    Generic,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Negotiation => "negotiation",
            Self::Authentication => "authentication",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// Structured description of a single failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    pub category: FailureCategory,
    pub message: String,
    pub protocol_error: Option<String>,
    pub os_error_code: Option<i32>,
    pub os_error_message: Option<String>,
    pub security_trace: Option<SecurityNegotiationTrace>,
}

impl DiagnosticRecord {
    pub fn generic(message: impl Into<String>) -> Self {
        Self {
            category: FailureCategory::Generic,
            message: message.into(),
            protocol_error: None,
            os_error_code: None,
            os_error_message: None,
            security_trace: None,
        }
    }

    /// Classifies a fatal session error.
    ///
    /// `server_reason` is the last reason string sent by the server, if any.
    pub fn from_error(
        error: &SessionError,
        trace: Option<&SecurityNegotiationTrace>,
        server_reason: Option<&str>,
    ) -> Self {
        let mut record = match error.kind() {
            SessionErrorKind::Negotiation => {
                let mut record = Self::generic("Security negotiation failed: no mutually supported security type");
                record.category = FailureCategory::Negotiation;
                record.protocol_error = trace.map(|trace| trace.to_string());
                record
            }
            SessionErrorKind::AuthenticationCancelled => {
                let mut record = Self::generic("Authentication cancelled");
                record.category = FailureCategory::Authentication;
                record
            }
            SessionErrorKind::AuthenticationRejected(reason) => {
                let mut record = Self::generic(format!("Authentication failed: {reason}"));
                record.category = FailureCategory::Authentication;
                record.protocol_error = Some(reason.clone());
                record
            }
            SessionErrorKind::Protocol(description) => {
                let mut record = Self::generic(format!("Protocol error: {description}"));
                record.category = FailureCategory::Protocol;
                record.protocol_error = Some(description.clone());
                record
            }
            SessionErrorKind::ConnectionClosed => {
                let mut record = Self::generic("Connection closed by server");
                record.category = FailureCategory::Protocol;
                record.protocol_error = Some(error.report().to_string());
                record
            }
            SessionErrorKind::Transport(_)
            | SessionErrorKind::InvalidState(_)
            | SessionErrorKind::InvalidArgument
            | SessionErrorKind::General
            | SessionErrorKind::Custom => Self::generic(format!("Connection failed: {}", error.report())),
        };

        if let Some(io_error) = error.find_cause::<std::io::Error>() {
            record.category = match record.category {
                FailureCategory::Generic | FailureCategory::Protocol => FailureCategory::Transport,
                other => other,
            };
            record.os_error_code = io_error.raw_os_error();
            record.os_error_message = Some(os_error_description(io_error));

            if record.category == FailureCategory::Transport {
                record.message = format!("Connection error: {}", os_error_description(io_error));
            }
        }

        if record.protocol_error.is_none() {
            record.protocol_error = server_reason.map(str::to_owned);
        }

        record.security_trace = trace.cloned();

        record
    }

    /// Delivers this record through exactly one of the failure callbacks.
    pub fn deliver(&self, observer: &dyn SessionObserver) {
        if observer.supports_detailed_failure() {
            observer.on_detailed_failure(
                &self.message,
                self.protocol_error.as_deref(),
                self.os_error_code,
                self.os_error_message.as_deref(),
            );
        } else {
            observer.on_failure(&self.message);
        }
    }
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.category, self.message)?;

        if let Some(protocol_error) = &self.protocol_error {
            write!(f, "; protocol: {protocol_error}")?;
        }

        if let Some(code) = self.os_error_code {
            write!(f, "; errno: {code}")?;
        }

        if let Some(os_message) = &self.os_error_message {
            write!(f, " ({os_message})")?;
        }

        Ok(())
    }
}

fn os_error_description(error: &std::io::Error) -> String {
    match error.raw_os_error() {
        // Strip the custom context, keep the OS wording.
        Some(code) => std::io::Error::from_raw_os_error(code).to_string(),
        None => error.to_string(),
    }
}
