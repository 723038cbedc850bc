use core::fmt;

use crate::credentials::CredentialScheme;
use crate::image::FramebufferSnapshot;
use crate::security::SecurityType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callbacks implemented by the consumer of a [`VncSession`](crate::VncSession).
///
/// Every method has a no-op default, so observers only implement what they care about.
/// The session holds the observer weakly and calls it from the controller thread only,
/// never concurrently, in the order the events were generated.
pub trait SessionObserver {
    fn on_connect(&self) {}

    fn on_disconnect(&self) {}

    /// Plain failure message.
    ///
    /// Only called when [`Self::supports_detailed_failure`] returns `false`.
    fn on_failure(&self, message: &str) {
        let _ = message;
    }

    /// Detailed failure report, called instead of [`Self::on_failure`] when supported.
    fn on_detailed_failure(
        &self,
        message: &str,
        protocol_error: Option<&str>,
        os_error_code: Option<i32>,
        os_error_message: Option<&str>,
    ) {
        let _ = (message, protocol_error, os_error_code, os_error_message);
    }

    fn supports_detailed_failure(&self) -> bool {
        false
    }

    /// Ownership of the snapshot is handed over.
    fn on_framebuffer_update(&self, snapshot: FramebufferSnapshot) {
        let _ = snapshot;
    }

    fn on_resize(&self, width: u16, height: u16) {
        let _ = (width, height);
    }

    fn on_security_negotiation_started(&self, offered: &[SecurityType], supported: &[SecurityType]) {
        let _ = (offered, supported);
    }

    fn on_security_type_selected(&self, security_type: SecurityType) {
        let _ = security_type;
    }

    fn on_log_message(&self, message: &str, level: LogLevel) {
        let _ = (message, level);
    }

    fn on_server_reason_message(&self, reason: &str) {
        let _ = reason;
    }

    // -- Legacy password-only credential flow -- //

    /// Notification preceding [`Self::password_for_legacy_auth`].
    fn on_password_required(&self) {}

    fn password_for_legacy_auth(&self) -> Option<String> {
        None
    }

    // -- Typed credential flow -- //

    /// Whether the typed flow below is implemented.
    ///
    /// When `false`, every credential request goes through the legacy flow.
    fn supports_typed_credentials(&self) -> bool {
        false
    }

    fn on_credentials_required(&self, scheme: CredentialScheme) {
        let _ = scheme;
    }

    fn username_for_auth(&self) -> Option<String> {
        None
    }

    fn password_for_auth(&self) -> Option<String> {
        None
    }
}
