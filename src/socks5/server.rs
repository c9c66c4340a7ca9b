use crate::{
    forward::ForwardingSession,
    socks5::{
        auth::{self, UserPass},
        commands::{self, Handlers},
        handler::{BindHandler, Dialer, NoBind, Resolver, SystemResolver},
    },
    stack::HostStack,
};
use anyhow::{Result, anyhow};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tracing::{Instrument, Span, error, info, info_span};

/// Socks5Server represents a SOCKS5 server and houses related
/// configuration data
pub struct Socks5Server {
    pub listen_addr: String,
    pub auth_config: Option<Arc<UserPass>>,
    resolver: Arc<dyn Resolver>,
    dialer: Arc<dyn Dialer>,
    bind_handler: Arc<dyn BindHandler>,
    span: Span,
    listener: Option<TcpListener>,
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new is a constructor for the Socks5Server type; it resolves and dials
    /// through the host until told otherwise
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            auth_config: None,
            resolver: Arc::new(SystemResolver),
            dialer: Arc::new(HostStack),
            bind_handler: Arc::new(NoBind),
            span: Span::current(),
            listener: None,
        }
    }

    /// with_auth applies the desired authentication
    pub fn with_auth(mut self, auth: Option<UserPass>) -> Self {
        // Arc allows shared ownership of UserPass
        self.auth_config = auth.map(Arc::new);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn with_bind_handler(mut self, bind_handler: Arc<dyn BindHandler>) -> Self {
        self.bind_handler = bind_handler;
        self
    }

    /// with_span sets the span connection logs are recorded under
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// bind to the listen address; a second call is a no-op returning the
    /// existing address
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if let Some(listener) = &self.listener {
            return Ok(listener.local_addr()?);
        }

        // Instantiate tokio listener
        let listener = TcpListener::bind(&self.listen_addr).await?;
        let addr = listener.local_addr()?;

        // DEBUG
        self.span.in_scope(|| info!("SOCKS5 proxy listening on {:?}", addr));

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run handles server spinup and listens for incoming connections.
    /// Only a listener failure ends it.
    pub async fn run(&mut self) -> Result<()> {
        self.bind().await?;
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow!("[ERR] listener missing after bind"))?;

        // Listen for connections to proxy
        loop {
            // Accept incoming connection
            let (inbound, peer_addr) = listener.accept().await?;

            // Clone for this connection
            let auth_config = self.auth_config.clone();
            let resolver = Arc::clone(&self.resolver);
            let dialer = Arc::clone(&self.dialer);
            let bind_handler = Arc::clone(&self.bind_handler);
            let span = info_span!(parent: &self.span, "client", peer = %peer_addr);

            // Spawn async task
            tokio::spawn(
                async move {
                    // DEBUG
                    info!("new client: {}", peer_addr);

                    let handlers = Handlers {
                        resolver: resolver.as_ref(),
                        dialer: dialer.as_ref(),
                        bind: bind_handler.as_ref(),
                    };

                    // Send connection to connection handler
                    if let Err(e) = handle_connection(inbound, auth_config, &handlers).await {
                        error!("connection error: {:#}", e);
                    }
                }
                .instrument(span),
            );
        }
    }
}

/// handle_connection handles the full client/server SOCKS5 protocol flow
async fn handle_connection(
    mut stream: TcpStream,
    auth_config: Option<Arc<UserPass>>,
    handlers: &Handlers<'_>,
) -> Result<()> {
    // Negotiate authentication with client
    auth::negotiate_auth(&mut stream, auth_config.as_deref()).await?;

    // Handle connection request from client
    let outbound = commands::handle_socks_request(&mut stream, handlers)
        .await
        .map_err(|e| anyhow!("[ERR] failed to handle socks request: {e:#}"))?;

    // Relay between streams
    let stats = ForwardingSession::new(stream, outbound).run().await;

    // DEBUG
    info!(
        "connection closed: {} bytes from client, {} bytes from server",
        stats.sent, stats.received
    );

    Ok(())
}
