//! Error types for routing, resolution and forwarding.

use std::{io, net::AddrParseError};
use thiserror::Error;

/// Result type alias for tunnel routing operations.
pub type Result<T> = std::result::Result<T, RouteError>;

/// Errors produced by the routing core.
#[derive(Debug, Error)]
pub enum RouteError {
    /// Target string is not of the form `host:port`.
    #[error("invalid endpoint '{0}': expected host:port")]
    InvalidEndpoint(String),

    /// Port segment is not an integer in 0..=65535.
    #[error("invalid port '{port}' in endpoint '{endpoint}'")]
    InvalidPort { endpoint: String, port: String },

    /// Lookup succeeded but returned nothing.
    #[error("no address found for: {0}")]
    NoAddressFound(String),

    /// None of the lookup results was an IP literal.
    #[error("no usable address for {name}: {source}")]
    AddressParse {
        name: String,
        #[source]
        source: AddrParseError,
    },

    /// The resolver itself failed.
    #[error("lookup of {name} failed: {source}")]
    Lookup {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Upstream connect failed.
    #[error("dial {target} failed: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Bind or accept failure on a routine's listener.
    #[error("listener on {addr} failed: {source}")]
    Listener {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Mid-stream I/O failure.
    #[error("transfer failed: {0}")]
    Transfer(#[source] io::Error),
}

impl RouteError {
    /// Configuration errors are fatal at routine construction.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            RouteError::InvalidEndpoint(_) | RouteError::InvalidPort { .. }
        )
    }

    /// Resolution errors only terminate the connection that triggered them.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            RouteError::NoAddressFound(_)
                | RouteError::AddressParse { .. }
                | RouteError::Lookup { .. }
        )
    }

    pub(crate) fn listener(addr: impl ToString, source: io::Error) -> Self {
        RouteError::Listener {
            addr: addr.to_string(),
            source,
        }
    }
}
