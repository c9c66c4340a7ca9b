//! Bidirectional connection forwarding.
//!
//! A [`ForwardingSession`] owns one proxied connection: the client stream and
//! the upstream stream. Each stream is split and two copy tasks run, one per
//! direction. Whichever direction finishes first (EOF or error) cancels the
//! session, so the other direction stops promptly and every half is dropped,
//! which closes both underlying streams.

use crate::error::RouteError;
use std::{io, time::Duration};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, error};

/// Per-direction transfer buffer; small since many sessions run at once
pub const FORWARD_BUFFER_SIZE: usize = 1024;

/// Upper bound on the best-effort shutdown of the write side
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// forward copies `from` into `to` until EOF, error or session close, then
/// closes the session and shuts `to` down. Transfer errors are logged here
/// and never returned. Returns the number of bytes written to `to`.
pub async fn forward<R, W>(mut from: R, mut to: W, session: CancellationToken) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut copied = 0u64;

    let outcome = tokio::select! {
        res = pump(&mut from, &mut to, &mut copied) => res.map_err(RouteError::Transfer),
        _ = session.cancelled() => Ok(()),
    };

    if let Err(e) = outcome {
        error!("cannot forward traffic: {}", e);
    }

    // Peer direction stops now, whatever the shutdown below does
    session.cancel();
    drop(from);

    // A shutdown may wait on a flush the peer never drains; an already
    // closed stream just errors. Both are ignored.
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, to.shutdown()).await;

    copied
}

/// pump is the plain buffered copy loop
async fn pump<R, W>(from: &mut R, to: &mut W, copied: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; FORWARD_BUFFER_SIZE];

    loop {
        let n = from.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        to.write_all(&buf[..n]).await?;
        *copied += n as u64;
    }
}

/// Bytes moved by a finished session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// client -> upstream
    pub sent: u64,
    /// upstream -> client
    pub received: u64,
}

/// ForwardingSession pairs a client stream with its upstream stream
pub struct ForwardingSession<C, U> {
    client: C,
    upstream: U,
}

/// ForwardingSession implementation block
impl<C, U> ForwardingSession<C, U>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(client: C, upstream: U) -> Self {
        Self { client, upstream }
    }

    /// run drives both directions and returns once both have finished
    pub async fn run(self) -> SessionStats {
        let session = CancellationToken::new();

        let (client_rx, client_tx) = tokio::io::split(self.client);
        let (upstream_rx, upstream_tx) = tokio::io::split(self.upstream);

        let span = Span::current();
        let outbound = tokio::spawn(
            forward(client_rx, upstream_tx, session.clone()).instrument(span.clone()),
        );
        let inbound = tokio::spawn(forward(upstream_rx, client_tx, session).instrument(span));

        let (sent, received) = tokio::join!(outbound, inbound);

        SessionStats {
            sent: sent.unwrap_or_default(),
            received: received.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        pin::Pin,
        task::{Context, Poll},
        time::Duration,
    };
    use tokio::io::{ReadBuf, duplex};
    use tokio::time::timeout;

    /// Stream whose reads always fail and whose writes go nowhere
    struct Broken;

    impl AsyncRead for Broken {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
        }
    }

    impl AsyncWrite for Broken {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::ErrorKind::NotConnected.into()))
        }
    }

    /// Duplex stream whose shutdown never completes
    struct StuckShutdown(tokio::io::DuplexStream);

    impl AsyncRead for StuckShutdown {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for StuckShutdown {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.0).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.0).poll_flush(cx)
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    const BOUND: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn relays_both_directions_until_close() {
        let (mut client_app, client_side) = duplex(64);
        let (upstream_side, mut upstream_app) = duplex(64);

        let session = tokio::spawn(ForwardingSession::new(client_side, upstream_side).run());

        client_app.write_all(b"hello upstream").await.unwrap();
        let mut buf = [0u8; 14];
        upstream_app.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello upstream");

        upstream_app.write_all(b"hi client").await.unwrap();
        let mut buf = [0u8; 9];
        client_app.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi client");

        drop(client_app);

        let stats = timeout(BOUND, session).await.unwrap().unwrap();
        assert_eq!(stats, SessionStats { sent: 14, received: 9 });

        // upstream side was closed with the session
        let mut rest = Vec::new();
        let n = timeout(BOUND, upstream_app.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn large_payload_crosses_small_buffer() {
        let (mut client_app, client_side) = duplex(4096);
        let (upstream_side, mut upstream_app) = duplex(4096);

        let session = tokio::spawn(ForwardingSession::new(client_side, upstream_side).run());

        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            client_app.write_all(&payload).await.unwrap();
            client_app
        });

        let mut received = vec![0u8; expected.len()];
        upstream_app.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        drop(writer.await.unwrap());
        let stats = timeout(BOUND, session).await.unwrap().unwrap();
        assert_eq!(stats.sent, expected.len() as u64);
    }

    #[tokio::test]
    async fn read_error_closes_peer_direction() {
        let (upstream_side, mut upstream_app) = duplex(64);

        let session = tokio::spawn(ForwardingSession::new(Broken, upstream_side).run());

        // The healthy direction is blocked reading from upstream_app; the
        // broken one must tear it down anyway
        let stats = timeout(BOUND, session).await.unwrap().unwrap();
        assert_eq!(stats.sent, 0);

        let mut rest = Vec::new();
        let n = timeout(BOUND, upstream_app.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn pending_shutdown_does_not_hold_session_open() {
        let (mut client_app, client_side) = duplex(1024);
        let (upstream_side, mut upstream_app) = duplex(1024);

        let session =
            tokio::spawn(ForwardingSession::new(client_side, StuckShutdown(upstream_side)).run());

        client_app.write_all(b"bye").await.unwrap();
        let mut buf = [0u8; 3];
        upstream_app.read_exact(&mut buf).await.unwrap();
        drop(client_app);

        let stats = timeout(BOUND, session).await.unwrap().unwrap();
        assert_eq!(stats, SessionStats { sent: 3, received: 0 });

        // Every upstream half is gone even though shutdown never finished
        let mut rest = Vec::new();
        let n = timeout(BOUND, upstream_app.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn buffered_upstream_with_stalled_peer_still_closes() {
        let (mut client_app, client_side) = duplex(1024);
        let (upstream_side, _upstream_app) = duplex(64);

        let session = tokio::spawn(
            ForwardingSession::new(client_side, tokio::io::BufWriter::new(upstream_side)).run(),
        );

        // More than the upstream pipe holds, and nobody reads it
        client_app.write_all(&[7u8; 200]).await.unwrap();
        drop(client_app);

        assert!(timeout(BOUND, session).await.is_ok());
    }

    #[tokio::test]
    async fn forward_into_closed_stream_does_not_panic() {
        let (from_app, from) = duplex(64);
        let (to, to_app) = duplex(64);
        drop(to_app);

        let mut from_app = from_app;
        from_app.write_all(b"late data").await.unwrap();

        let session = CancellationToken::new();
        let copied = timeout(BOUND, forward(from, to, session.clone()))
            .await
            .unwrap();

        assert_eq!(copied, 0);
        assert!(session.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_session_stops_forward() {
        let (_from_app, from) = duplex(64);
        let (to, _to_app) = duplex(64);

        let session = CancellationToken::new();
        session.cancel();

        let copied = timeout(BOUND, forward(from, to, session)).await.unwrap();
        assert_eq!(copied, 0);
    }
}
