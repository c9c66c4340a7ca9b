//! Proxy routines.
//!
//! A routine is a long-running listener spawned against a [`NetworkContext`]:
//! the SOCKS5 server, the local→virtual client tunnel or the virtual→local
//! server tunnel. Each goes `Created → Listening` on [`Routine::bind`] and
//! then accepts forever in [`Routine::run`]; only a listener failure ends it,
//! and that failure is handed back to the owner.

pub mod client_tunnel;
pub mod server_tunnel;
pub mod socks5;

use crate::{
    address::TargetAddress,
    config::{Socks5Config, TcpClientTunnelConfig, TcpServerTunnelConfig},
    context::NetworkContext,
    error::{Result, RouteError},
    forward::{ForwardingSession, SessionStats},
    stack::{BoxStream, NetStack, StackListener},
};
use async_trait::async_trait;
use std::{net::SocketAddr, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, error, info, info_span};

pub use client_tunnel::TcpClientTunnel;
pub use server_tunnel::TcpServerTunnel;
pub use socks5::Socks5Routine;

/// Routine is one proxy behaviour bound to a network context
#[async_trait]
pub trait Routine: Send {
    fn name(&self) -> &'static str;

    /// bind starts listening and returns the bound address
    async fn bind(&mut self) -> Result<SocketAddr>;

    /// run binds if needed, then accepts until the listener fails
    async fn run(&mut self) -> Result<()>;
}

/// RoutineConfig is the tagged set of routine definitions
#[derive(Debug, Clone, PartialEq)]
pub enum RoutineConfig {
    Socks5(Socks5Config),
    TcpClientTunnel(TcpClientTunnelConfig),
    TcpServerTunnel(TcpServerTunnelConfig),
}

/// RoutineConfig implementation block
impl RoutineConfig {
    /// build validates the configuration and creates the routine
    pub fn build(self, ctx: Arc<NetworkContext>) -> Result<Box<dyn Routine>> {
        Ok(match self {
            RoutineConfig::Socks5(conf) => Box::new(Socks5Routine::new(conf, ctx)),
            RoutineConfig::TcpClientTunnel(conf) => Box::new(TcpClientTunnel::new(conf, ctx)?),
            RoutineConfig::TcpServerTunnel(conf) => Box::new(TcpServerTunnel::new(conf, ctx)?),
        })
    }

    /// build_with_span is build with the owner's span in place of the
    /// routine's default one
    pub fn build_with_span(
        self,
        ctx: Arc<NetworkContext>,
        span: Span,
    ) -> Result<Box<dyn Routine>> {
        Ok(match self {
            RoutineConfig::Socks5(conf) => Box::new(Socks5Routine::new(conf, ctx).with_span(span)),
            RoutineConfig::TcpClientTunnel(conf) => {
                Box::new(TcpClientTunnel::new(conf, ctx)?.with_span(span))
            }
            RoutineConfig::TcpServerTunnel(conf) => {
                Box::new(TcpServerTunnel::new(conf, ctx)?.with_span(span))
            }
        })
    }

    /// spawn builds the routine and runs it as its own task. Configuration
    /// errors are returned right away; listener errors come out of the handle.
    pub fn spawn(self, ctx: Arc<NetworkContext>) -> Result<JoinHandle<Result<()>>> {
        let mut routine = self.build(ctx)?;
        Ok(tokio::spawn(async move { routine.run().await }))
    }
}

/// Tunnel is the accept loop shared by both TCP tunnels: accept on one
/// stack, dial the resolved target on another
pub(crate) struct Tunnel {
    pub ctx: Arc<NetworkContext>,
    pub target: TargetAddress,
    pub dialer: Arc<dyn NetStack>,
    pub span: Span,
}

/// Tunnel implementation block
impl Tunnel {
    /// serve accepts connections and spawns one forwarding task per connection
    pub async fn serve(&self, mut listener: Box<dyn StackListener>) -> Result<()> {
        let local_addr = listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        loop {
            // Accept incoming connection
            let (inbound, peer_addr) = listener
                .accept()
                .await
                .map_err(|e| RouteError::listener(&local_addr, e))?;

            let ctx = Arc::clone(&self.ctx);
            let dialer = Arc::clone(&self.dialer);
            let target = self.target.clone();
            let span = info_span!(parent: &self.span, "conn", peer = %peer_addr);

            tokio::spawn(
                async move {
                    // DEBUG
                    info!("new client: {}", peer_addr);

                    match tunnel_connection(inbound, &ctx, &target, dialer.as_ref()).await {
                        Ok(stats) => info!(
                            "connection closed. Sent: {}, Received: {}",
                            stats.sent, stats.received
                        ),
                        Err(e) => error!("tunnel to {}: {}", target, e),
                    }
                }
                .instrument(span),
            );
        }
    }
}

/// tunnel_connection resolves the target fresh, dials it and relays until
/// either side closes
async fn tunnel_connection(
    inbound: BoxStream,
    ctx: &NetworkContext,
    target: &TargetAddress,
    dialer: &dyn NetStack,
) -> Result<SessionStats> {
    let endpoint = ctx.resolve_to_endpoint(target).await?;

    debug!("forward {} -> {}", target, endpoint);

    let (outbound, _) = dialer
        .dial_tcp(endpoint.socket_addr())
        .await
        .map_err(|source| RouteError::Dial {
            target: endpoint.to_string(),
            source,
        })?;

    Ok(ForwardingSession::new(inbound, outbound).run().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::HostStack;
    use std::{
        io::{self, Write},
        sync::Mutex,
    };

    /// Stack whose listeners come up but fail on the first accept
    struct DeadStack;

    struct DeadListener(SocketAddr);

    #[async_trait]
    impl NetStack for DeadStack {
        async fn lookup_host(&self, _name: &str) -> io::Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn dial_tcp(&self, _addr: SocketAddr) -> io::Result<(BoxStream, SocketAddr)> {
            Err(io::ErrorKind::ConnectionRefused.into())
        }

        async fn listen_tcp(&self, addr: SocketAddr) -> io::Result<Box<dyn StackListener>> {
            Ok(Box::new(DeadListener(addr)))
        }
    }

    #[async_trait]
    impl StackListener for DeadListener {
        async fn accept(&mut self) -> io::Result<(BoxStream, SocketAddr)> {
            Err(io::Error::other("interface went down"))
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(self.0)
        }
    }

    /// Log sink shared with the fmt subscriber
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn bad_target_fails_at_build() {
        let ctx = Arc::new(NetworkContext::new(Arc::new(HostStack)));

        let config = RoutineConfig::TcpClientTunnel(TcpClientTunnelConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            target: "host:70000".to_string(),
        });

        let err = config.spawn(ctx).err().unwrap();
        assert!(matches!(err, RouteError::InvalidPort { .. }));
    }

    #[tokio::test]
    async fn bind_failure_is_returned_to_owner() {
        let ctx = Arc::new(NetworkContext::new(Arc::new(HostStack)));

        // Hold the port so the routine can't have it
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = RoutineConfig::TcpClientTunnel(TcpClientTunnelConfig {
            bind_address: taken.local_addr().unwrap(),
            target: "127.0.0.1:9".to_string(),
        });

        let handle = config.spawn(ctx).unwrap();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, RouteError::Listener { .. }));
    }

    #[tokio::test]
    async fn accept_failure_is_returned_to_owner() {
        let ctx = Arc::new(NetworkContext::new(Arc::new(DeadStack)));

        let mut tunnel = TcpServerTunnel::new(
            TcpServerTunnelConfig {
                listen_port: 4000,
                target: "127.0.0.1:80".to_string(),
            },
            ctx,
        )
        .unwrap();

        let err = tunnel.run().await.unwrap_err();
        assert!(matches!(err, RouteError::Listener { .. }));
        assert!(err.to_string().contains("0.0.0.0:4000"));
    }

    #[tokio::test]
    async fn routines_log_under_owner_span() {
        let sink = Captured::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let ctx = Arc::new(NetworkContext::new(Arc::new(HostStack)));
        let configs = [
            RoutineConfig::Socks5(Socks5Config {
                bind_address: "127.0.0.1:0".to_string(),
                username: None,
                password: None,
            }),
            RoutineConfig::TcpClientTunnel(TcpClientTunnelConfig {
                bind_address: "127.0.0.1:0".parse().unwrap(),
                target: "127.0.0.1:9".to_string(),
            }),
            RoutineConfig::TcpServerTunnel(TcpServerTunnelConfig {
                listen_port: 0,
                target: "127.0.0.1:9".to_string(),
            }),
        ];

        for (i, config) in configs.into_iter().enumerate() {
            let span = info_span!("owner", routine = i);
            let mut routine = config.build_with_span(Arc::clone(&ctx), span).unwrap();
            routine.bind().await.unwrap();
        }

        let logs = sink.text();
        let listening: Vec<&str> = logs.lines().filter(|l| l.contains("listening on")).collect();
        assert_eq!(listening.len(), 3);
        for (i, line) in listening.iter().enumerate() {
            assert!(line.contains(&format!("owner{{routine={i}}}")), "{line}");
        }
    }
}
