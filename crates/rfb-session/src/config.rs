use core::str::FromStr;
use core::time::Duration;

use crate::security::SecurityType;
use crate::{SessionError, SessionErrorExt as _, SessionResult};

pub const DEFAULT_PORT: u16 = 5900;

/// Display numbers below this value are mapped onto `DEFAULT_PORT + display`.
const MAX_DISPLAY_NUMBER: u16 = 100;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound for a single engine poll; also bounds how long `disconnect` waits for the worker.
    pub poll_timeout: Duration,
    /// How long the worker waits for the controller to answer a credential request.
    ///
    /// No answer within this delay is handled exactly like a cancellation.
    pub credential_timeout: Duration,
    /// Security types this client is able to complete.
    ///
    /// The server’s preference order decides among them.
    pub supported_security_types: Vec<SecurityType>,
    /// Deliver only the latest pending framebuffer snapshot when the observer falls behind.
    pub coalesce_snapshots: bool,
    /// Ask the server to keep other clients connected.
    pub shared: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(50),
            credential_timeout: Duration::from_secs(120),
            supported_security_types: vec![SecurityType::VNC_AUTHENTICATION, SecurityType::NONE],
            coalesce_snapshots: true,
            shared: true,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_supported_security_types(mut self, types: impl IntoIterator<Item = SecurityType>) -> Self {
        self.supported_security_types = types.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_credential_timeout(mut self, timeout: Duration) -> Self {
        self.credential_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_coalesced_snapshots(mut self, coalesce: bool) -> Self {
        self.coalesce_snapshots = coalesce;
        self
    }
}

/// Server address, as typed by a user.
///
/// Accepted forms:
///
/// - `host` (default port)
/// - `host:display` where display is below 100 (`5900 + display`)
/// - `host:port`
/// - `host::port`
/// - `[ipv6]:port` or `[ipv6]:display`, `ipv6`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    name: String,
    port: u16,
}

impl Destination {
    pub fn new(addr: impl Into<String>) -> SessionResult<Self> {
        let addr = addr.into();

        let destination = if let Ok(sock_addr) = addr.parse::<std::net::SocketAddr>() {
            Self {
                name: sock_addr.ip().to_string(),
                port: display_or_port(sock_addr.port()),
            }
        } else if addr.parse::<std::net::Ipv6Addr>().is_ok() {
            Self {
                name: addr,
                port: DEFAULT_PORT,
            }
        } else if let Some((name, port)) = addr.split_once("::") {
            Self {
                name: name.to_owned(),
                port: parse_port(port)?,
            }
        } else if let Some((name, suffix)) = addr.rsplit_once(':') {
            Self {
                name: name.to_owned(),
                port: display_or_port(parse_port(suffix)?),
            }
        } else {
            Self {
                name: addr,
                port: DEFAULT_PORT,
            }
        };

        if destination.name.is_empty() {
            return Err(SessionError::invalid_argument("empty host name"));
        }

        Ok(destination)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Destination {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

fn display_or_port(number: u16) -> u16 {
    if number < MAX_DISPLAY_NUMBER {
        DEFAULT_PORT + number
    } else {
        number
    }
}

fn parse_port(input: &str) -> SessionResult<u16> {
    input
        .parse::<u16>()
        .map_err(|e| SessionError::invalid_argument("invalid port").with_source(e))
}
