use crate::socks5::protocol::{AuthMethod, AuthStatus, USERPASS_VERSION, Version};
use anyhow::{Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// UserPass holds username/password credentials as dictated
/// server-side
#[derive(Clone)]
pub struct UserPass {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for UserPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserPass")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// negotiate_auth handles authentication negotiation between the SOCKS server and client.
///
/// With credentials configured only username/password is acceptable,
/// without them only no-auth is.
pub async fn negotiate_auth<S>(stream: &mut S, auth_config: Option<&UserPass>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Instantiate handshake buffer & read
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    // Parse version and client methods from handshake
    let version = buf[0];
    let n_methods = buf[1];

    // Ensure version is 0x05 -> SOCKS5
    if version != Version::SOCKS5 as u8 {
        bail!("[ERR] not SOCKS5");
    }

    let mut methods = vec![0u8; n_methods as usize];
    stream.read_exact(&mut methods).await?;

    // Retrieve desired method
    let method = select_auth_method(&methods, auth_config.is_some());

    // ServerChoice method selection reply format
    // +----+--------+
    // |VER | METHOD |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+
    stream.write_all(&[Version::SOCKS5 as u8, method as u8]).await?;

    // Route to appropriate auth handler
    match (method, auth_config) {
        (AuthMethod::UserPass, Some(creds)) => authenticate_userpass(stream, creds).await,
        (AuthMethod::NoAuth, None) => Ok(()),
        _ => bail!("[ERR] no acceptable authentication method"),
    }
}

/// authenticate_userpass handles username/password authentication according to the RFC1929
async fn authenticate_userpass<S>(stream: &mut S, server_creds: &UserPass) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Client Username/Password Request
    // +----+------+----------+------+----------+
    // |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    // +----+------+----------+------+----------+
    // | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
    // +----+------+----------+------+----------+

    // Get subnegotiation version -> 0x01 expected
    let mut ver = [0u8; 1];
    stream.read_exact(&mut ver).await?;

    if ver[0] != USERPASS_VERSION {
        bail!("[ERR] invalid username/password subnegotiation number");
    }

    let username = read_field(stream).await?;
    let password = read_field(stream).await?;

    // Compare raw bytes so non-UTF-8 input is just a mismatch
    let status = if username != server_creds.username.as_bytes()
        || password != server_creds.password.as_bytes()
    {
        AuthStatus::Failure
    } else {
        AuthStatus::Success
    };

    // Username/Password Server response
    // +----+--------+
    // |VER | STATUS |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+
    stream.write_all(&[USERPASS_VERSION, status as u8]).await?;

    match status {
        AuthStatus::Success => Ok(()),
        AuthStatus::Failure => bail!("[ERR] authentication failed"),
    }
}

/// read_field reads one length-prefixed subnegotiation field
async fn read_field<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut len = [0u8; 1];
    stream.read_exact(&mut len).await?;

    let mut field = vec![0u8; len[0] as usize];
    stream.read_exact(&mut field).await?;
    Ok(field)
}

/// select_auth_method picks the only method the server accepts, if the
/// client offered it
fn select_auth_method(client_methods: &[u8], credentials_required: bool) -> AuthMethod {
    let wanted = if credentials_required {
        AuthMethod::UserPass
    } else {
        AuthMethod::NoAuth
    };

    if client_methods.contains(&(wanted as u8)) {
        wanted
    } else {
        AuthMethod::NoAcceptable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn creds() -> UserPass {
        UserPass {
            username: "u".into(),
            password: "p".into(),
        }
    }

    #[test]
    fn method_selection_follows_configuration() {
        assert_eq!(select_auth_method(&[0x00, 0x02], true), AuthMethod::UserPass);
        assert_eq!(select_auth_method(&[0x00], true), AuthMethod::NoAcceptable);
        assert_eq!(select_auth_method(&[0x00, 0x02], false), AuthMethod::NoAuth);
        assert_eq!(select_auth_method(&[0x02], false), AuthMethod::NoAcceptable);
    }

    #[tokio::test]
    async fn accepts_matching_credentials() {
        let (mut client, mut server) = duplex(64);
        let creds = creds();
        let handshake = tokio::spawn(async move { negotiate_auth(&mut server, Some(&creds)).await });

        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        client.write_all(&[0x01, 1, b'u', 1, b'p']).await.unwrap();

        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x02, 0x01, 0x00]);
        assert!(handshake.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn rejects_wrong_password() {
        let (mut client, mut server) = duplex(64);
        let creds = creds();
        let handshake = tokio::spawn(async move { negotiate_auth(&mut server, Some(&creds)).await });

        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        client.write_all(&[0x01, 1, b'u', 1, b'x']).await.unwrap();

        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x02, 0x01, 0x01]);
        assert!(handshake.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn refuses_no_auth_when_credentials_configured() {
        let (mut client, mut server) = duplex(64);
        let creds = creds();
        let handshake = tokio::spawn(async move { negotiate_auth(&mut server, Some(&creds)).await });

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0xFF]);
        assert!(handshake.await.unwrap().is_err());
    }
}
