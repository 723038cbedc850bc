#![doc = include_str!("../README.md")]

#[macro_use]
extern crate tracing;

#[macro_use]
mod macros;

pub mod config;
pub mod credentials;
pub mod diagnostic;
pub mod engine;
pub mod image;
pub mod observer;
pub mod security;

mod dispatch;
mod session;
mod worker;

use core::fmt;

pub use self::config::{Destination, SessionConfig};
pub use self::credentials::{CredentialRequest, CredentialScheme, Credentials};
pub use self::diagnostic::{DiagnosticRecord, FailureCategory};
pub use self::engine::{
    EngineConnector, EngineError, EngineErrorExt, EngineErrorKind, EngineResult, EngineUpdate, Handshake, HandshakeDelegate,
    HandshakeParams, ProtocolEngine,
};
pub use self::image::{FramebufferSnapshot, PixelBuffer, PixelFormat};
pub use self::observer::{LogLevel, SessionObserver};
pub use self::security::{SecurityNegotiationTrace, SecurityType};
pub use self::session::{SessionState, VncSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DesktopSize {
    pub width: u16,
    pub height: u16,
}

impl DesktopSize {
    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> usize {
        usize::from(self.width) * usize::from(self.height)
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[non_exhaustive]
#[derive(Debug)]
pub enum SessionErrorKind {
    /// The operation is not valid in the current lifecycle phase.
    InvalidState(SessionState),
    InvalidArgument,
    /// No mutually supported security type.
    Negotiation,
    AuthenticationCancelled,
    AuthenticationRejected(String),
    /// OS-level socket failure.
    Transport(std::io::Error),
    /// Malformed or unexpected server behavior.
    Protocol(String),
    ConnectionClosed,
    General,
    Custom,
}

impl fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SessionErrorKind::InvalidState(state) => write!(f, "invalid state: {state}"),
            SessionErrorKind::InvalidArgument => write!(f, "invalid argument"),
            SessionErrorKind::Negotiation => write!(f, "no mutually supported security type"),
            SessionErrorKind::AuthenticationCancelled => write!(f, "authentication cancelled"),
            SessionErrorKind::AuthenticationRejected(reason) => write!(f, "authentication rejected: {reason}"),
            SessionErrorKind::Transport(_) => write!(f, "transport error"),
            SessionErrorKind::Protocol(description) => write!(f, "protocol error: {description}"),
            SessionErrorKind::ConnectionClosed => write!(f, "connection closed by peer"),
            SessionErrorKind::General => write!(f, "general error"),
            SessionErrorKind::Custom => write!(f, "custom error"),
        }
    }
}

impl std::error::Error for SessionErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            SessionErrorKind::Transport(e) => Some(e),
            SessionErrorKind::InvalidState(_)
            | SessionErrorKind::InvalidArgument
            | SessionErrorKind::Negotiation
            | SessionErrorKind::AuthenticationCancelled
            | SessionErrorKind::AuthenticationRejected(_)
            | SessionErrorKind::Protocol(_)
            | SessionErrorKind::ConnectionClosed
            | SessionErrorKind::General
            | SessionErrorKind::Custom => None,
        }
    }
}

pub type SessionError = rfb_error::Error<SessionErrorKind>;

pub trait SessionErrorExt {
    fn invalid_state(context: &'static str, state: SessionState) -> Self;
    fn invalid_argument(context: &'static str) -> Self;
    fn transport(context: &'static str, error: std::io::Error) -> Self;
    fn protocol(context: &'static str, description: impl Into<String>) -> Self;
    fn general(context: &'static str) -> Self;
    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
}

impl SessionErrorExt for SessionError {
    fn invalid_state(context: &'static str, state: SessionState) -> Self {
        Self::new(context, SessionErrorKind::InvalidState(state))
    }

    fn invalid_argument(context: &'static str) -> Self {
        Self::new(context, SessionErrorKind::InvalidArgument)
    }

    fn transport(context: &'static str, error: std::io::Error) -> Self {
        Self::new(context, SessionErrorKind::Transport(error))
    }

    fn protocol(context: &'static str, description: impl Into<String>) -> Self {
        Self::new(context, SessionErrorKind::Protocol(description.into()))
    }

    fn general(context: &'static str) -> Self {
        Self::new(context, SessionErrorKind::General)
    }

    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        Self::new(context, SessionErrorKind::Custom).with_source(e)
    }
}
