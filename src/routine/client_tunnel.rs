use crate::{
    address::TargetAddress,
    config::TcpClientTunnelConfig,
    context::NetworkContext,
    error::{Result, RouteError},
    routine::{Routine, Tunnel},
    stack::StackListener,
};
use async_trait::async_trait;
use std::{net::SocketAddr, sync::Arc};
use tracing::{Span, info, info_span};

/// TcpClientTunnel listens on the host and forwards every connection to the
/// target through the virtual stack
pub struct TcpClientTunnel {
    bind_address: SocketAddr,
    tunnel: Tunnel,
    listener: Option<Box<dyn StackListener>>,
}

/// TcpClientTunnel implementation block
impl TcpClientTunnel {
    /// new validates the target; a malformed one fails here, before any I/O
    pub fn new(conf: TcpClientTunnelConfig, ctx: Arc<NetworkContext>) -> Result<Self> {
        let target = TargetAddress::parse(&conf.target)?;
        let span = info_span!("tcp_client_tunnel", bind = %conf.bind_address, target = %target);
        let dialer = Arc::clone(ctx.stack());

        Ok(Self {
            bind_address: conf.bind_address,
            tunnel: Tunnel {
                ctx,
                target,
                dialer,
                span,
            },
            listener: None,
        })
    }

    /// with_span replaces the span this tunnel logs under
    pub fn with_span(mut self, span: Span) -> Self {
        self.tunnel.span = span;
        self
    }
}

#[async_trait]
impl Routine for TcpClientTunnel {
    fn name(&self) -> &'static str {
        "tcp-client-tunnel"
    }

    async fn bind(&mut self) -> Result<SocketAddr> {
        if let Some(listener) = &self.listener {
            return listener
                .local_addr()
                .map_err(|e| RouteError::listener(self.bind_address, e));
        }

        // Local side lives on the host
        let listener = self
            .tunnel
            .ctx
            .host()
            .listen_tcp(self.bind_address)
            .await
            .map_err(|e| RouteError::listener(self.bind_address, e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| RouteError::listener(self.bind_address, e))?;

        self.tunnel
            .span
            .in_scope(|| info!("TCP client tunnel listening on {}", addr));

        self.listener = Some(listener);
        Ok(addr)
    }

    async fn run(&mut self) -> Result<()> {
        self.bind().await?;

        match self.listener.take() {
            Some(listener) => self.tunnel.serve(listener).await,
            None => Err(RouteError::listener(
                self.bind_address,
                std::io::ErrorKind::NotConnected.into(),
            )),
        }
    }
}
