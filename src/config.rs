//! Routine configuration.
//!
//! Targets stay raw `host:port` strings here and are validated when the
//! routine is built, so a bad target fails that routine at startup.

use anyhow::{Context, Result, anyhow};
use std::{net::SocketAddr, str::FromStr};

/// Socks5Config configures the SOCKS5 routine
#[derive(Debug, Clone, PartialEq)]
pub struct Socks5Config {
    pub bind_address: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// TcpClientTunnelConfig configures a local listener forwarding into the
/// virtual network
#[derive(Debug, Clone, PartialEq)]
pub struct TcpClientTunnelConfig {
    pub bind_address: SocketAddr,
    pub target: String,
}

/// TcpServerTunnelConfig configures a virtual-network listener forwarding
/// out to the host network
#[derive(Debug, Clone, PartialEq)]
pub struct TcpServerTunnelConfig {
    pub listen_port: u16,
    pub target: String,
}

/// split_definition splits `LEFT=TARGET`
fn split_definition(s: &str) -> Result<(&str, &str)> {
    let (left, target) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected <listen>=<host:port>, got '{s}'"))?;

    if target.is_empty() {
        return Err(anyhow!("missing target in '{s}'"));
    }

    Ok((left.trim(), target.trim()))
}

/// Parses `BIND_ADDR=HOST:PORT`
impl FromStr for TcpClientTunnelConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (bind, target) = split_definition(s)?;
        let bind_address = bind
            .parse()
            .with_context(|| format!("invalid bind address '{bind}'"))?;

        Ok(Self {
            bind_address,
            target: target.to_string(),
        })
    }
}

/// Parses `PORT=HOST:PORT`
impl FromStr for TcpServerTunnelConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (port, target) = split_definition(s)?;
        let listen_port = port
            .parse()
            .with_context(|| format!("invalid listen port '{port}'"))?;

        Ok(Self {
            listen_port,
            target: target.to_string(),
        })
    }
}
