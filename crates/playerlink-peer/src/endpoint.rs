//! Addressing for the player/intermediary link.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use playerlink_transport::{IpcStream, LoopbackListener};
#[cfg(unix)]
use playerlink_transport::UnixDomainSocket;
use tracing::debug;

use crate::error::{PeerError, Result};

/// Where a peer listens.
///
/// Parsed from `unix:/path`, `tcp:host:port`, a bare filesystem path, or a
/// bare `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl Endpoint {
    /// Loopback TCP on `port`.
    pub fn loopback(port: u16) -> Self {
        Endpoint::Tcp(format!("127.0.0.1:{port}"))
    }
}

impl FromStr for Endpoint {
    type Err = PeerError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PeerError::InvalidEndpoint(s.to_string());
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            return split_host_port(addr)
                .map(|_| Endpoint::Tcp(addr.to_string()))
                .ok_or_else(invalid);
        }
        if s.contains('/') {
            return Ok(Endpoint::Unix(PathBuf::from(s)));
        }
        if split_host_port(s).is_some() {
            return Ok(Endpoint::Tcp(s.to_string()));
        }
        Err(invalid())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some((host, port.parse().ok()?))
}

fn is_loopback_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1")
}

/// Connect to a listening peer.
pub fn connect(endpoint: &Endpoint) -> Result<IpcStream> {
    debug!(%endpoint, "connecting");
    match endpoint {
        #[cfg(unix)]
        Endpoint::Unix(path) => Ok(UnixDomainSocket::connect(path)?),
        #[cfg(not(unix))]
        Endpoint::Unix(_) => Err(PeerError::InvalidEndpoint(endpoint.to_string())),
        Endpoint::Tcp(addr) => Ok(LoopbackListener::connect(addr.as_str())?),
    }
}

/// Listening side of an [`Endpoint`]. TCP endpoints must name a loopback
/// host.
#[derive(Debug)]
pub enum PeerListener {
    #[cfg(unix)]
    Unix(UnixDomainSocket),
    Tcp(LoopbackListener),
}

impl PeerListener {
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(PeerListener::Unix(UnixDomainSocket::bind(path)?)),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(PeerError::InvalidEndpoint(endpoint.to_string())),
            Endpoint::Tcp(addr) => match split_host_port(addr) {
                Some((host, port)) if is_loopback_host(host) => {
                    Ok(PeerListener::Tcp(LoopbackListener::bind(port)?))
                }
                _ => Err(PeerError::InvalidEndpoint(addr.clone())),
            },
        }
    }

    /// Accept the next peer (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        Ok(match self {
            #[cfg(unix)]
            PeerListener::Unix(socket) => socket.accept()?,
            PeerListener::Tcp(listener) => listener.accept()?,
        })
    }

    /// The endpoint peers should connect to; for TCP this carries the real
    /// port when bound to `0`.
    pub fn local_endpoint(&self) -> Endpoint {
        match self {
            #[cfg(unix)]
            PeerListener::Unix(socket) => Endpoint::Unix(socket.path().to_path_buf()),
            PeerListener::Tcp(listener) => Endpoint::Tcp(listener.local_addr().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::thread;

    use super::*;

    #[test]
    fn parse_forms() {
        assert_eq!(
            "unix:/tmp/player.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix("/tmp/player.sock".into())
        );
        assert_eq!(
            "/run/player.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix("/run/player.sock".into())
        );
        assert_eq!(
            "tcp:localhost:3000".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("localhost:3000".into())
        );
        assert_eq!(
            "127.0.0.1:3000".parse::<Endpoint>().unwrap(),
            Endpoint::loopback(3000)
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        for input in ["", "unix:", "tcp:nohost", "tcp::80", "player", "host:notaport"] {
            assert!(
                matches!(input.parse::<Endpoint>(), Err(PeerError::InvalidEndpoint(_))),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn display_reparses() {
        for endpoint in [Endpoint::Unix("/tmp/a.sock".into()), Endpoint::loopback(9)] {
            assert_eq!(endpoint.to_string().parse::<Endpoint>().unwrap(), endpoint);
        }
    }

    #[test]
    fn tcp_listener_must_be_loopback() {
        let err = PeerListener::bind(&"tcp:example.com:3000".parse().unwrap()).unwrap_err();
        assert!(matches!(err, PeerError::InvalidEndpoint(_)));
    }

    #[test]
    fn tcp_bind_connect_accept() {
        let listener = PeerListener::bind(&Endpoint::loopback(0)).unwrap();
        let endpoint = listener.local_endpoint();
        assert!(matches!(&endpoint, Endpoint::Tcp(addr) if !addr.ends_with(":0")));

        let client = thread::spawn(move || {
            let mut stream = connect(&endpoint).unwrap();
            stream.write_all(b"hi").unwrap();
        });
        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
        client.join().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn unix_bind_connect_accept() {
        let path = std::env::temp_dir().join(format!("playerlink-endpoint-{}.sock", std::process::id()));
        let endpoint = Endpoint::Unix(path.clone());
        let listener = PeerListener::bind(&endpoint).unwrap();
        assert_eq!(listener.local_endpoint(), endpoint);

        let client = thread::spawn(move || {
            let mut stream = connect(&endpoint).unwrap();
            stream.write_all(b"ok").unwrap();
        });
        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");
        client.join().unwrap();
        drop(listener);
        assert!(!path.exists());
    }
}
