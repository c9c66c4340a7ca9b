use crate::error::{Result, RouteError};
use std::{fmt, net::IpAddr, net::SocketAddr, str::FromStr};

/// TargetAddress is a configured `host:port` pair, not yet resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    pub host: String,
    pub port: u16,
}

/// TargetAddress implementation block
impl TargetAddress {
    /// parse splits an endpoint string into host and port.
    ///
    /// Bracketed IPv6 hosts (`[::1]:80`) are accepted; the brackets are
    /// stripped from the resulting host.
    pub fn parse(endpoint: &str) -> Result<Self> {
        let invalid = || RouteError::InvalidEndpoint(endpoint.to_string());

        let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
            // [host]:port
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let port = tail.strip_prefix(':').ok_or_else(invalid)?;
            (host, port)
        } else {
            let (host, port) = endpoint.rsplit_once(':').ok_or_else(invalid)?;

            // An unbracketed host can't carry another colon
            if host.contains(':') {
                return Err(invalid());
            }
            (host, port)
        };

        if host.is_empty() || host.contains('[') || host.contains(']') {
            return Err(invalid());
        }

        let port = port.parse::<u16>().map_err(|_| RouteError::InvalidPort {
            endpoint: endpoint.to_string(),
            port: port.to_string(),
        })?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl FromStr for TargetAddress {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// ResolvedEndpoint is a TargetAddress after resolution, valid for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl ResolvedEndpoint {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for ResolvedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.socket_addr().fmt(f)
    }
}
