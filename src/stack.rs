//! Network stack seams.
//!
//! A [`NetStack`] is anything that can look up names, dial TCP and listen for
//! TCP: the user-space (virtual) stack a tunnel is built on, or the host
//! operating system's stack via [`HostStack`]. Routines only ever talk to
//! stacks through this trait so they never care which side of the tunnel they
//! are on.

use async_trait::async_trait;
use std::{io, net::SocketAddr};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};

/// AsyncStream is a duplex byte stream that can be moved across tasks
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased duplex stream handed out by a stack
pub type BoxStream = Box<dyn AsyncStream>;

/// NetStack is the dial/listen/lookup capability of one network context
#[async_trait]
pub trait NetStack: Send + Sync {
    /// Look up a hostname, returning the textual addresses the resolver gave back
    async fn lookup_host(&self, name: &str) -> io::Result<Vec<String>>;

    /// Open a TCP connection, returning the stream and its local address
    async fn dial_tcp(&self, addr: SocketAddr) -> io::Result<(BoxStream, SocketAddr)>;

    /// Start listening for TCP connections on the given address
    async fn listen_tcp(&self, addr: SocketAddr) -> io::Result<Box<dyn StackListener>>;
}

/// StackListener accepts inbound connections on a stack
#[async_trait]
pub trait StackListener: Send {
    async fn accept(&mut self) -> io::Result<(BoxStream, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// HostStack goes through the operating system's resolver and sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct HostStack;

#[async_trait]
impl NetStack for HostStack {
    async fn lookup_host(&self, name: &str) -> io::Result<Vec<String>> {
        let addrs = tokio::net::lookup_host((name, 0)).await?;
        Ok(addrs.map(|addr| addr.ip().to_string()).collect())
    }

    async fn dial_tcp(&self, addr: SocketAddr) -> io::Result<(BoxStream, SocketAddr)> {
        let stream = TcpStream::connect(addr).await?;
        let local_addr = stream.local_addr()?;
        Ok((Box::new(stream), local_addr))
    }

    async fn listen_tcp(&self, addr: SocketAddr) -> io::Result<Box<dyn StackListener>> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Box::new(HostListener { listener }))
    }
}

/// HostListener wraps a tokio TcpListener
pub struct HostListener {
    listener: TcpListener,
}

#[async_trait]
impl StackListener for HostListener {
    async fn accept(&mut self) -> io::Result<(BoxStream, SocketAddr)> {
        let (stream, peer_addr) = self.listener.accept().await?;
        Ok((Box::new(stream), peer_addr))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
