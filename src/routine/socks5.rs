use crate::{
    config::Socks5Config,
    context::NetworkContext,
    error::{Result, RouteError},
    routine::Routine,
    socks5::{BindHandler, Dialer, Resolver, Socks5Server, UserPass, address::Destination},
    stack::BoxStream,
};
use async_trait::async_trait;
use std::{
    io,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tracing::{Span, debug, info_span};

/// VirtualResolver answers SOCKS5 lookups through the network context
struct VirtualResolver(Arc<NetworkContext>);

#[async_trait]
impl Resolver for VirtualResolver {
    async fn resolve(&self, name: &str) -> anyhow::Result<IpAddr> {
        debug!("resolve: {}", name);
        Ok(self.0.resolve_address(name).await?)
    }
}

/// VirtualDialer opens SOCKS5 connections on the virtual stack
struct VirtualDialer(Arc<NetworkContext>);

#[async_trait]
impl Dialer for VirtualDialer {
    async fn dial(&self, addr: SocketAddr) -> io::Result<(BoxStream, SocketAddr)> {
        self.0.stack().dial_tcp(addr).await
    }
}

/// RejectBind turns every BIND request away
struct RejectBind;

#[async_trait]
impl BindHandler for RejectBind {
    async fn bind(&self, dest: &Destination) -> anyhow::Result<BoxStream> {
        debug!("bind: {}", dest);
        anyhow::bail!("bind isn't implemented")
    }
}

/// Socks5Routine exposes the network context as a SOCKS5 proxy
pub struct Socks5Routine {
    bind_address: String,
    server: Socks5Server,
}

/// Socks5Routine implementation block
impl Socks5Routine {
    pub fn new(conf: Socks5Config, ctx: Arc<NetworkContext>) -> Self {
        // Only a non-empty username turns authentication on
        let auth = conf
            .username
            .filter(|username| !username.is_empty())
            .map(|username| UserPass {
                username,
                password: conf.password.unwrap_or_default(),
            });

        let span = info_span!("socks5", bind = %conf.bind_address);
        let server = Socks5Server::new(conf.bind_address.clone())
            .with_auth(auth)
            .with_resolver(Arc::new(VirtualResolver(Arc::clone(&ctx))))
            .with_dialer(Arc::new(VirtualDialer(ctx)))
            .with_bind_handler(Arc::new(RejectBind))
            .with_span(span);

        Self {
            bind_address: conf.bind_address,
            server,
        }
    }

    /// with_span replaces the span the server logs under
    pub fn with_span(mut self, span: Span) -> Self {
        self.server = self.server.with_span(span);
        self
    }
}

#[async_trait]
impl Routine for Socks5Routine {
    fn name(&self) -> &'static str {
        "socks5"
    }

    async fn bind(&mut self) -> Result<SocketAddr> {
        self.server
            .bind()
            .await
            .map_err(|e| RouteError::listener(&self.bind_address, into_io(e)))
    }

    async fn run(&mut self) -> Result<()> {
        self.server
            .run()
            .await
            .map_err(|e| RouteError::listener(&self.bind_address, into_io(e)))
    }
}

/// into_io recovers the I/O error behind a server failure
fn into_io(e: anyhow::Error) -> io::Error {
    match e.downcast::<io::Error>() {
        Ok(e) => e,
        Err(e) => io::Error::other(e),
    }
}
