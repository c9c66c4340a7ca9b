use crate::socks5::protocol::AddressType;
use anyhow::{Result, anyhow};
use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Destination is the DST.ADDR/DST.PORT pair of a client request
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Ip(addr) => write!(f, "{addr}"),
            Destination::Domain(name, port) => write!(f, "{name}:{port}"),
        }
    }
}

/// parse_destination reads ATYP, DST.ADDR and DST.PORT from an incoming
/// client request: IPv4, IPv6, or domain name
pub async fn parse_destination<S>(stream: &mut S) -> Result<Destination>
where
    S: AsyncRead + Unpin,
{
    // Read address type byte from stream
    let mut atype = [0u8; 1];
    stream.read_exact(&mut atype).await?;

    let addr_type =
        AddressType::from_byte(atype[0]).ok_or_else(|| anyhow!("[ERR] unknown address type"))?;

    // Match type and extract address or domain name
    let dest = match addr_type {
        AddressType::IPv4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            let ip = Ipv4Addr::from(addr);

            Destination::Ip(SocketAddr::new(ip.into(), read_port(stream).await?))
        }
        AddressType::DomainName => {
            // First octet in DomainName contains the number of
            // octets to follow
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;

            if len[0] == 0 {
                return Err(anyhow!("[ERR] domain length cannot be 0"));
            }

            // Read domain and convert to string
            let mut domain = vec![0u8; len[0] as usize];
            stream.read_exact(&mut domain).await?;
            let domain_str = String::from_utf8(domain)?;

            Destination::Domain(domain_str, read_port(stream).await?)
        }
        AddressType::IPv6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            let ip = Ipv6Addr::from(addr);

            Destination::Ip(SocketAddr::new(ip.into(), read_port(stream).await?))
        }
    };

    Ok(dest)
}

/// read_port reads a big-endian (network order) port
async fn read_port<S>(stream: &mut S) -> Result<u16>
where
    S: AsyncRead + Unpin,
{
    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await?;
    Ok(u16::from_be_bytes(port_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_ipv4_destination() {
        let mut bytes: &[u8] = &[0x01, 10, 0, 0, 7, 0x1f, 0x90];
        let dest = parse_destination(&mut bytes).await.unwrap();
        assert_eq!(dest, Destination::Ip("10.0.0.7:8080".parse().unwrap()));
    }

    #[tokio::test]
    async fn parses_domain_destination() {
        let mut bytes = vec![0x03, 11];
        bytes.extend_from_slice(b"example.org");
        bytes.extend_from_slice(&443u16.to_be_bytes());

        let dest = parse_destination(&mut bytes.as_slice()).await.unwrap();
        assert_eq!(dest, Destination::Domain("example.org".into(), 443));
        assert_eq!(dest.to_string(), "example.org:443");
    }

    #[tokio::test]
    async fn parses_ipv6_destination() {
        let mut bytes = vec![0x04];
        bytes.extend_from_slice(&"fd00::1".parse::<Ipv6Addr>().unwrap().octets());
        bytes.extend_from_slice(&53u16.to_be_bytes());

        let dest = parse_destination(&mut bytes.as_slice()).await.unwrap();
        assert_eq!(dest, Destination::Ip("[fd00::1]:53".parse().unwrap()));
    }

    #[tokio::test]
    async fn rejects_unknown_type_and_empty_domain() {
        let mut unknown: &[u8] = &[0x02, 0, 0];
        assert!(parse_destination(&mut unknown).await.is_err());

        let mut empty: &[u8] = &[0x03, 0, 0, 80];
        assert!(parse_destination(&mut empty).await.is_err());
    }
}
