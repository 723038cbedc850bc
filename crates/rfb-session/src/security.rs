//! Security type negotiation.
//!
//! During the handshake the server offers an ordered list of security types. The client keeps the
//! first offered type it also supports, so the server's preference order wins.

use core::fmt;

/// RFB security type identifier.
///
/// Unknown identifiers are preserved as-is so they can be reported in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecurityType(pub u32);

impl SecurityType {
    pub const INVALID: Self = Self(0);
    pub const NONE: Self = Self(1);
    pub const VNC_AUTHENTICATION: Self = Self(2);
    pub const RA2: Self = Self(5);
    pub const RA2NE: Self = Self(6);
    pub const TIGHT: Self = Self(16);
    pub const ULTRA: Self = Self(17);
    pub const TLS: Self = Self(18);
    pub const VENCRYPT: Self = Self(19);
    pub const SASL: Self = Self(20);
    pub const MD5_HASH: Self = Self(21);
    pub const XVP: Self = Self(22);
    pub const APPLE_REMOTE_DESKTOP: Self = Self(30);
    pub const MS_LOGON_II: Self = Self(113);

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::INVALID => "Invalid",
            Self::NONE => "None",
            Self::VNC_AUTHENTICATION => "VNC Authentication",
            Self::RA2 => "RA2",
            Self::RA2NE => "RA2ne",
            Self::TIGHT => "Tight",
            Self::ULTRA => "Ultra",
            Self::TLS => "TLS",
            Self::VENCRYPT => "VeNCrypt",
            Self::SASL => "SASL",
            Self::MD5_HASH => "MD5 hash",
            Self::XVP => "xvp",
            Self::APPLE_REMOTE_DESKTOP => "Apple Remote Desktop",
            Self::MS_LOGON_II => "MS-Logon II",
            _ => return None,
        };

        Some(name)
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for SecurityType {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<SecurityType> for u32 {
    fn from(value: SecurityType) -> Self {
        value.0
    }
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "unknown ({})", self.0),
        }
    }
}

/// Immutable record of one security type negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityNegotiationTrace {
    offered: Vec<SecurityType>,
    supported: Vec<SecurityType>,
    selected: Option<SecurityType>,
}

impl SecurityNegotiationTrace {
    /// Picks the first offered type that is also supported.
    pub fn negotiate(offered: &[SecurityType], supported: &[SecurityType]) -> Self {
        let selected = offered.iter().copied().find(|ty| supported.contains(ty));

        Self {
            offered: offered.to_vec(),
            supported: supported.to_vec(),
            selected,
        }
    }

    pub fn offered(&self) -> &[SecurityType] {
        &self.offered
    }

    pub fn supported(&self) -> &[SecurityType] {
        &self.supported
    }

    pub fn selected(&self) -> Option<SecurityType> {
        self.selected
    }

    /// Offered types this client does not know how to handle.
    pub fn unsupported_offers(&self) -> impl Iterator<Item = SecurityType> + '_ {
        self.offered.iter().copied().filter(|ty| !self.supported.contains(ty))
    }
}

impl fmt::Display for SecurityNegotiationTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offered=[")?;
        write_list(f, &self.offered)?;
        write!(f, "] supported=[")?;
        write_list(f, &self.supported)?;
        write!(f, "] selected=")?;
        match self.selected {
            Some(ty) => write!(f, "{}", ty.0),
            None => write!(f, "none"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, types: &[SecurityType]) -> fmt::Result {
    for (idx, ty) in types.iter().enumerate() {
        if idx != 0 {
            write!(f, ",")?;
        }
        write!(f, "{}", ty.0)?;
    }
    Ok(())
}
