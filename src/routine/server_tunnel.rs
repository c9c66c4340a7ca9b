use crate::{
    address::TargetAddress,
    config::TcpServerTunnelConfig,
    context::NetworkContext,
    error::{Result, RouteError},
    routine::{Routine, Tunnel},
    stack::StackListener,
};
use async_trait::async_trait;
use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};
use tracing::{Span, info, info_span};

/// TcpServerTunnel listens inside the virtual network and forwards every
/// connection to the target over the host network
pub struct TcpServerTunnel {
    listen_addr: SocketAddr,
    tunnel: Tunnel,
    listener: Option<Box<dyn StackListener>>,
}

/// TcpServerTunnel implementation block
impl TcpServerTunnel {
    /// new validates the target; a malformed one fails here, before any I/O
    pub fn new(conf: TcpServerTunnelConfig, ctx: Arc<NetworkContext>) -> Result<Self> {
        let target = TargetAddress::parse(&conf.target)?;
        let span = info_span!("tcp_server_tunnel", port = conf.listen_port, target = %target);
        let dialer = Arc::clone(ctx.host());

        Ok(Self {
            listen_addr: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), conf.listen_port),
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
impl Routine for TcpServerTunnel {
    fn name(&self) -> &'static str {
        "tcp-server-tunnel"
    }

    async fn bind(&mut self) -> Result<SocketAddr> {
        if let Some(listener) = &self.listener {
            return listener
                .local_addr()
                .map_err(|e| RouteError::listener(self.listen_addr, e));
        }

        // Listening side lives on the virtual stack
        let listener = self
            .tunnel
            .ctx
            .stack()
            .listen_tcp(self.listen_addr)
            .await
            .map_err(|e| RouteError::listener(self.listen_addr, e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| RouteError::listener(self.listen_addr, e))?;

        self.tunnel
            .span
            .in_scope(|| info!("TCP server tunnel listening on {}", addr));

        self.listener = Some(listener);
        Ok(addr)
    }

    async fn run(&mut self) -> Result<()> {
        self.bind().await?;

        match self.listener.take() {
            Some(listener) => self.tunnel.serve(listener).await,
            None => Err(RouteError::listener(
                self.listen_addr,
                std::io::ErrorKind::NotConnected.into(),
            )),
        }
    }
}
