//! Pluggable hooks the SOCKS5 server calls out to.

use crate::{
    socks5::address::Destination,
    stack::{BoxStream, HostStack, NetStack},
};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use std::{
    io,
    net::{IpAddr, SocketAddr},
};

/// Resolver turns a domain name from a request into an IP
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<IpAddr>;
}

/// Dialer opens the outbound connection for a CONNECT request
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Returns the connected stream and its local address for the reply
    async fn dial(&self, addr: SocketAddr) -> io::Result<(BoxStream, SocketAddr)>;
}

/// BindHandler serves BIND requests
#[async_trait]
pub trait BindHandler: Send + Sync {
    /// Returns the stream to relay with the client, or an error which is
    /// answered with "command not supported"
    async fn bind(&self, dest: &Destination) -> Result<BoxStream>;
}

/// SystemResolver looks names up through the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, name: &str) -> Result<IpAddr> {
        tokio::net::lookup_host((name, 0))
            .await?
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| anyhow!("[ERR] failed to resolve host: {}", name))
    }
}

#[async_trait]
impl Dialer for HostStack {
    async fn dial(&self, addr: SocketAddr) -> io::Result<(BoxStream, SocketAddr)> {
        self.dial_tcp(addr).await
    }
}

/// NoBind rejects every BIND request
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBind;

#[async_trait]
impl BindHandler for NoBind {
    async fn bind(&self, dest: &Destination) -> Result<BoxStream> {
        bail!("bind to {} isn't implemented", dest)
    }
}
