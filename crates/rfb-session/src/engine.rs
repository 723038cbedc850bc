//! Boundary with the external protocol engine.
//!
//! The engine owns the socket, the RFB framing, pixel format negotiation and encoding
//! decompression. All of its methods are blocking and only ever called from the session worker.

use core::fmt;
use core::time::Duration;

use crate::credentials::{CredentialRequest, Credentials};
use crate::image::PixelBuffer;
use crate::observer::LogLevel;
use crate::security::SecurityType;
use crate::{DesktopSize, SessionErrorKind};

pub type EngineResult<T> = Result<T, EngineError>;

#[non_exhaustive]
#[derive(Debug)]
pub enum EngineErrorKind {
    /// OS-level socket error.
    Io(std::io::Error),
    /// Malformed or unexpected data from the server.
    Protocol(String),
    /// No offered security type was accepted by the delegate.
    NoCommonSecurityType,
    /// The delegate did not provide the requested credentials.
    CredentialsUnavailable,
    /// The server refused the credentials.
    AuthenticationRejected(String),
    /// The server closed the connection.
    Closed,
    Custom,
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            EngineErrorKind::Io(_) => write!(f, "I/O error"),
            EngineErrorKind::Protocol(description) => write!(f, "protocol violation: {description}"),
            EngineErrorKind::NoCommonSecurityType => write!(f, "no common security type"),
            EngineErrorKind::CredentialsUnavailable => write!(f, "credentials unavailable"),
            EngineErrorKind::AuthenticationRejected(reason) => write!(f, "authentication rejected: {reason}"),
            EngineErrorKind::Closed => write!(f, "connection closed"),
            EngineErrorKind::Custom => write!(f, "custom error"),
        }
    }
}

impl std::error::Error for EngineErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            EngineErrorKind::Io(e) => Some(e),
            EngineErrorKind::Protocol(_)
            | EngineErrorKind::NoCommonSecurityType
            | EngineErrorKind::CredentialsUnavailable
            | EngineErrorKind::AuthenticationRejected(_)
            | EngineErrorKind::Closed
            | EngineErrorKind::Custom => None,
        }
    }
}

impl From<EngineErrorKind> for SessionErrorKind {
    fn from(kind: EngineErrorKind) -> Self {
        match kind {
            EngineErrorKind::Io(e) => SessionErrorKind::Transport(e),
            EngineErrorKind::Protocol(description) => SessionErrorKind::Protocol(description),
            EngineErrorKind::NoCommonSecurityType => SessionErrorKind::Negotiation,
            EngineErrorKind::CredentialsUnavailable => SessionErrorKind::AuthenticationCancelled,
            EngineErrorKind::AuthenticationRejected(reason) => SessionErrorKind::AuthenticationRejected(reason),
            EngineErrorKind::Closed => SessionErrorKind::ConnectionClosed,
            EngineErrorKind::Custom => SessionErrorKind::Custom,
        }
    }
}

pub type EngineError = rfb_error::Error<EngineErrorKind>;

pub trait EngineErrorExt {
    fn io(context: &'static str, error: std::io::Error) -> Self;
    fn protocol(context: &'static str, description: impl Into<String>) -> Self;
    fn closed(context: &'static str) -> Self;
    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
}

impl EngineErrorExt for EngineError {
    fn io(context: &'static str, error: std::io::Error) -> Self {
        Self::new(context, EngineErrorKind::Io(error))
    }

    fn protocol(context: &'static str, description: impl Into<String>) -> Self {
        Self::new(context, EngineErrorKind::Protocol(description.into()))
    }

    fn closed(context: &'static str) -> Self {
        Self::new(context, EngineErrorKind::Closed)
    }

    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        Self::new(context, EngineErrorKind::Custom).with_source(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeParams {
    pub host: String,
    pub port: u16,
    /// Request a shared session (ClientInit shared flag).
    pub shared: bool,
}

/// Callbacks an engine uses during its handshake.
///
/// Implemented by the session state machine.
pub trait HandshakeDelegate {
    /// The server offered `offered`; returns the type to use, `None` aborts the handshake.
    fn select_security_type(&mut self, offered: &[SecurityType]) -> Option<SecurityType>;

    /// Blocks until credentials are available, cancelled, or timed out.
    fn request_credentials(&mut self, request: CredentialRequest) -> Option<Credentials>;

    /// Failure reason string sent by the server.
    fn server_reason(&mut self, reason: &str);

    fn log(&mut self, level: LogLevel, message: &str);

    /// The session was torn down; the engine should abandon the handshake as soon as it can.
    ///
    /// Engines that block on the network should check this between reads. An engine that
    /// does not is detached by `disconnect`, and its result discarded.
    fn is_cancelled(&self) -> bool;
}

pub struct Handshake {
    pub engine: Box<dyn ProtocolEngine>,
    /// Initial framebuffer dimensions from ServerInit.
    pub desktop_size: DesktopSize,
    pub server_name: String,
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("desktop_size", &self.desktop_size)
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Opens connections.
pub trait EngineConnector: Send + Sync {
    /// Connects and runs the complete RFB handshake (version, security, ClientInit/ServerInit).
    fn handshake(&self, params: &HandshakeParams, delegate: &mut dyn HandshakeDelegate) -> EngineResult<Handshake>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineUpdate {
    /// Nothing happened within the poll timeout.
    None,
    Resize(DesktopSize),
    /// A complete framebuffer update was applied to the pixel buffer.
    FramebufferReady,
    Log { level: LogLevel, message: String },
}

/// A connected engine.
pub trait ProtocolEngine: Send {
    /// Waits at most `timeout` for server traffic.
    fn poll_update(&mut self, timeout: Duration) -> EngineResult<EngineUpdate>;

    fn current_pixels(&self) -> PixelBuffer<'_>;

    fn send_key(&mut self, keysym: u32, down: bool) -> EngineResult<()>;

    fn send_pointer(&mut self, x: u16, y: u16, button_mask: u8) -> EngineResult<()>;

    /// Releases the connection. Called exactly once.
    fn close(&mut self);
}
