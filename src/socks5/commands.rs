use crate::{
    socks5::{
        address::{Destination, parse_destination},
        handler::{BindHandler, Dialer, Resolver},
        protocol::{AddressType, Command, RSV, ReplyCode, Version},
    },
    stack::BoxStream,
};
use anyhow::{Result, anyhow, bail};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Handlers borrows the hooks a request is served with
pub struct Handlers<'a> {
    pub resolver: &'a dyn Resolver,
    pub dialer: &'a dyn Dialer,
    pub bind: &'a dyn BindHandler,
}

/// handle_socks_request checks the incoming request for SOCKS5 version number
/// and command, routes it to the matching handler and returns the outbound
/// stream to relay with the client
pub async fn handle_socks_request<S>(stream: &mut S, handlers: &Handlers<'_>) -> Result<BoxStream>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Instantiate a request buffer & read
    let mut reqbuf = [0u8; 3];
    stream.read_exact(&mut reqbuf).await?;

    // Parse
    let version = reqbuf[0];
    let command = reqbuf[1];
    // Not retrieving RSV (RESERVED) -> 0x00

    // Ensure version is 0x05 -> SOCKS5
    if version != Version::SOCKS5 as u8 {
        bail!("[ERR] not SOCKS5");
    }

    let dest = match parse_destination(stream).await {
        Ok(dest) => dest,
        Err(e) => {
            send_reply(stream, ReplyCode::AddrTypeUnsupported, unspecified()).await?;
            return Err(e);
        }
    };

    // Check command and route
    match Command::from_byte(command) {
        Some(Command::Connect) => handle_connect_cmd(stream, dest, handlers).await,
        Some(Command::Bind) => handle_bind_cmd(stream, dest, handlers.bind).await,
        Some(Command::UdpAssociate) => {
            send_reply(stream, ReplyCode::CommandNotSupported, unspecified()).await?;
            Err(anyhow!("[ERR] UDP ASSOCIATE not supported"))
        }
        None => {
            send_reply(stream, ReplyCode::CommandNotSupported, unspecified()).await?;
            Err(anyhow!("[ERR] unknown command"))
        }
    }
}

// ================
// CONNECT COMMAND
// ================

/// handle_connect_cmd resolves the requested target if needed, dials it and
/// returns the outbound stream
async fn handle_connect_cmd<S>(
    stream: &mut S,
    dest: Destination,
    handlers: &Handlers<'_>,
) -> Result<BoxStream>
where
    S: AsyncWrite + Unpin,
{
    let target = match dest {
        Destination::Ip(addr) => addr,
        Destination::Domain(name, port) => match handlers.resolver.resolve(&name).await {
            Ok(ip) => SocketAddr::new(ip, port),
            Err(e) => {
                send_reply(stream, ReplyCode::HostUnreachable, unspecified()).await?;
                return Err(e.context(format!("failed to resolve {name}")));
            }
        },
    };

    // Connect to target
    match handlers.dialer.dial(target).await {
        Ok((outbound, local_addr)) => {
            // Send OK reply
            send_reply(stream, ReplyCode::Succeeded, local_addr).await?;

            debug!("connected to {}", target);
            Ok(outbound)
        }
        Err(e) => {
            send_reply(stream, ReplyCode::from_io_error(&e), unspecified()).await?;
            Err(anyhow!("[ERR] connect to {target} failed: {e}"))
        }
    }
}

// =============
// BIND COMMAND
// =============

/// handle_bind_cmd defers to the bind handler, answering "command not
/// supported" when it declines
async fn handle_bind_cmd<S>(
    stream: &mut S,
    dest: Destination,
    bind: &dyn BindHandler,
) -> Result<BoxStream>
where
    S: AsyncWrite + Unpin,
{
    match bind.bind(&dest).await {
        Ok(outbound) => {
            send_reply(stream, ReplyCode::Succeeded, unspecified()).await?;
            Ok(outbound)
        }
        Err(e) => {
            send_reply(stream, ReplyCode::CommandNotSupported, unspecified()).await?;
            Err(e)
        }
    }
}

// =========
// HELPERS
// =========

fn unspecified() -> SocketAddr {
    SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
}

/// send_reply handles logic for sending replies from the SOCKS server to
/// the client
pub async fn send_reply<S>(stream: &mut S, reply_code: ReplyCode, bound_addr: SocketAddr) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    // SOCKS5 reply format
    // +----+-----+-------+------+----------+----------+
    // |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    // Build initial reply vec
    let mut reply = vec![Version::SOCKS5 as u8, reply_code as u8, RSV];

    // Parse bound_addr as IPv4/6 and finish build accordingly
    match bound_addr {
        SocketAddr::V4(addr) => {
            reply.push(AddressType::IPv4 as u8);
            reply.extend_from_slice(&addr.ip().octets());
            reply.extend_from_slice(&addr.port().to_be_bytes());
        }
        SocketAddr::V6(addr) => {
            reply.push(AddressType::IPv6 as u8);
            reply.extend_from_slice(&addr.ip().octets());
            reply.extend_from_slice(&addr.port().to_be_bytes());
        }
    }

    // Write reply
    stream.write_all(&reply).await?;
    Ok(())
}
