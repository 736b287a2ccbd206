use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// Port the player listens on for the browser intermediary by default.
pub const DEFAULT_PORT: u16 = 3000;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// TCP listener bound to the loopback interface only.
pub struct LoopbackListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl LoopbackListener {
    /// Bind on `127.0.0.1:port`. Port `0` picks an ephemeral port.
    pub fn bind(port: u16) -> Result<Self> {
        let requested = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(requested).map_err(|e| TransportError::Bind {
            addr: requested.to_string(),
            source: e,
        })?;
        let addr = listener.local_addr()?;
        info!(%addr, "listening on loopback tcp");
        Ok(Self { listener, addr })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%peer, "accepted tcp connection");
        Ok(IpcStream::from_tcp(stream))
    }

    /// Accept a connection, giving up after `timeout` or as soon as
    /// `keep_waiting` returns `false`.
    pub fn accept_timeout(
        &self,
        timeout: Duration,
        mut keep_waiting: impl FnMut() -> bool,
    ) -> Result<IpcStream> {
        self.listener.set_nonblocking(true)?;
        let result = self.poll_accept(Instant::now() + timeout, timeout, &mut keep_waiting);
        self.listener.set_nonblocking(false)?;
        result
    }

    fn poll_accept(
        &self,
        deadline: Instant,
        timeout: Duration,
        keep_waiting: &mut dyn FnMut() -> bool,
    ) -> Result<IpcStream> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    debug!(%peer, "accepted tcp connection");
                    return Ok(IpcStream::from_tcp(stream));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Accept(err)),
            }
            if !keep_waiting() {
                return Err(TransportError::Shutdown);
            }
            if Instant::now() >= deadline {
                return Err(TransportError::AcceptTimeout(timeout));
            }
            std::thread::sleep(ACCEPT_POLL_INTERVAL);
        }
    }

    /// Connect to a listening TCP endpoint (blocking).
    pub fn connect(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<IpcStream> {
        let stream = TcpStream::connect(&addr).map_err(|e| TransportError::Connect {
            addr: addr.to_string(),
            source: e,
        })?;
        debug!(%addr, "connected over tcp");
        Ok(IpcStream::from_tcp(stream))
    }

    /// The bound address (with the real port when bound to `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl std::fmt::Debug for LoopbackListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackListener")
            .field("addr", &self.addr)
            .finish()
    }
}
