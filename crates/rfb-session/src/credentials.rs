//! Credential brokering between the session worker and the controller.
//!
//! The worker blocks on a request until the controller answers it, the session is torn down,
//! or the configured timeout elapses. The last two are indistinguishable from a cancellation.

use core::fmt;
use core::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use crate::observer::SessionObserver;
use crate::security::SecurityType;
use crate::worker::WorkerEvent;

/// Which prompt the observer should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialScheme {
    None,
    PasswordOnly,
    UsernamePassword,
    /// Scheme decided by a negotiated security type the core has no specific knowledge of.
    Negotiated(SecurityType),
}

impl CredentialScheme {
    /// Numeric identifier handed to observers rendering scheme-specific prompts.
    pub fn security_type(self) -> Option<SecurityType> {
        match self {
            Self::None => Some(SecurityType::NONE),
            Self::PasswordOnly => Some(SecurityType::VNC_AUTHENTICATION),
            Self::UsernamePassword => None,
            Self::Negotiated(ty) => Some(ty),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CredentialRequest {
    pub scheme: CredentialScheme,
    pub username_required: bool,
    pub password_required: bool,
}

impl CredentialRequest {
    pub fn password_only() -> Self {
        Self {
            scheme: CredentialScheme::PasswordOnly,
            username_required: false,
            password_required: true,
        }
    }

    pub fn username_password() -> Self {
        Self {
            scheme: CredentialScheme::UsernamePassword,
            username_required: true,
            password_required: true,
        }
    }

    /// Request shape implied by a selected security type.
    pub fn for_security_type(security_type: SecurityType) -> Self {
        match security_type {
            SecurityType::NONE => Self {
                scheme: CredentialScheme::None,
                username_required: false,
                password_required: false,
            },
            SecurityType::VNC_AUTHENTICATION => Self::password_only(),
            SecurityType::APPLE_REMOTE_DESKTOP | SecurityType::MS_LOGON_II => Self {
                scheme: CredentialScheme::Negotiated(security_type),
                username_required: true,
                password_required: true,
            },
            other => Self {
                scheme: CredentialScheme::Negotiated(other),
                username_required: false,
                password_required: true,
            },
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self { username, password }
    }

    pub fn satisfies(&self, request: &CredentialRequest) -> bool {
        (!request.username_required || self.username.is_some())
            && (!request.password_required || self.password.is_some())
    }

    /// Fields of `self` win, missing ones are taken from `fallback`.
    #[must_use]
    pub fn or(self, fallback: Self) -> Self {
        Self {
            username: self.username.or(fallback.username),
            password: self.password.or(fallback.password),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Worker half of the broker.
pub(crate) struct CredentialBroker {
    presets: Credentials,
    events: Sender<WorkerEvent>,
    cancel: Receiver<()>,
    timeout: Duration,
}

impl CredentialBroker {
    pub(crate) fn new(presets: Credentials, events: Sender<WorkerEvent>, cancel: Receiver<()>, timeout: Duration) -> Self {
        Self {
            presets,
            events,
            cancel,
            timeout,
        }
    }

    /// Blocks the worker until the controller answers.
    #[instrument(skip(self))]
    pub(crate) fn request(&self, request: CredentialRequest) -> Option<Credentials> {
        if self.presets.satisfies(&request) {
            debug!("Using credentials supplied on connect");
            return Some(self.presets.clone());
        }

        let (reply_tx, reply_rx) = channel::bounded(1);

        self.events
            .send(WorkerEvent::CredentialsRequired {
                request,
                reply: reply_tx,
            })
            .ok()?;

        let answer = channel::select! {
            recv(reply_rx) -> answer => answer.ok().flatten(),
            recv(self.cancel) -> _ => {
                debug!("Credential request interrupted by disconnect");
                None
            }
            default(self.timeout) => {
                warn!(timeout = ?self.timeout, "Credential request timed out");
                None
            }
        };

        let credentials = answer?.or(self.presets.clone());

        if credentials.satisfies(&request) {
            Some(credentials)
        } else {
            debug!("Incomplete credentials");
            None
        }
    }
}

/// Controller half of the broker: queries the observer.
///
/// Uses the typed flow when the observer supports it, the legacy password-only flow otherwise;
/// never both for the same request.
pub(crate) fn answer_request(observer: &dyn SessionObserver, request: &CredentialRequest) -> Option<Credentials> {
    if observer.supports_typed_credentials() {
        observer.on_credentials_required(request.scheme);

        let username = if request.username_required {
            Some(observer.username_for_auth()?)
        } else {
            None
        };

        let password = if request.password_required {
            Some(observer.password_for_auth()?)
        } else {
            None
        };

        Some(Credentials { username, password })
    } else {
        observer.on_password_required();

        let password = observer.password_for_legacy_auth()?;

        Some(Credentials {
            username: None,
            password: Some(password),
        })
    }
}
