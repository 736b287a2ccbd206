use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::Result;
use crate::split::{Halves, StreamControl, Transport};

/// A connected socket stream, Unix or loopback TCP.
///
/// Wraps either a Unix domain socket or a loopback TCP connection. Both
/// variants support `try_clone`, which is how a stream is split into the
/// independent halves the runner and handler loops need.
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    Tcp(TcpStream),
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.read(buf),
            IpcStreamInner::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.write(buf),
            IpcStreamInner::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.flush(),
            IpcStreamInner::Tcp(stream) => stream.flush(),
        }
    }
}

impl IpcStream {
    /// Create an IpcStream from a Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }

    /// Create an IpcStream from a TCP stream.
    ///
    /// Nagle is disabled: frames are small and latency-bound.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        Self {
            inner: IpcStreamInner::Tcp(stream),
        }
    }

    /// A connected pair of in-process streams.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            IpcStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            IpcStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
            IpcStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
        }
    }

    /// Shut down one or both directions of the connection.
    ///
    /// Shutting down the read side wakes a reader blocked on another clone of
    /// this stream with end-of-stream.
    pub fn shutdown(&self, how: Shutdown) -> std::io::Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.shutdown(how),
            IpcStreamInner::Tcp(stream) => stream.shutdown(how),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => "unix",
            IpcStreamInner::Tcp(_) => "tcp",
        }
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream")
            .field("type", &self.transport_name())
            .finish()
    }
}

struct SocketControl {
    stream: IpcStream,
}

impl StreamControl for SocketControl {
    fn close_read(&self) -> std::io::Result<()> {
        ignore_not_connected(self.stream.shutdown(Shutdown::Read))
    }

    fn close_write(&self) -> std::io::Result<()> {
        ignore_not_connected(self.stream.shutdown(Shutdown::Write))
    }
}

// A peer that already hung up leaves nothing to shut down.
fn ignore_not_connected(result: std::io::Result<()>) -> std::io::Result<()> {
    match result {
        Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

impl Transport for IpcStream {
    fn into_halves(self) -> Result<Halves> {
        let reader = self.try_clone()?;
        let control = self.try_clone()?;
        Ok(Halves {
            reader: Box::new(reader),
            writer: Box::new(self),
            control: Box::new(SocketControl { stream: control }),
        })
    }

    fn describe(&self) -> String {
        self.transport_name().to_string()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn pair_is_duplex() {
        let (mut left, mut right) = IpcStream::pair().unwrap();
        left.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        right.write_all(b"pong").unwrap();
        left.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn close_read_wakes_blocked_reader() {
        let (left, _right) = IpcStream::pair().unwrap();
        let halves = left.into_halves().unwrap();
        let mut reader = halves.reader;

        let blocked = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).unwrap()
        });

        std::thread::sleep(Duration::from_millis(50));
        halves.control.close_read().unwrap();
        assert_eq!(blocked.join().unwrap(), 0);
    }

    #[test]
    fn close_write_signals_eof_to_peer() {
        let (left, mut right) = IpcStream::pair().unwrap();
        let halves = left.into_halves().unwrap();
        halves.control.close_write().unwrap();

        let mut buf = Vec::new();
        right.read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn debug_names_transport() {
        let (left, _right) = IpcStream::pair().unwrap();
        assert_eq!(format!("{left:?}"), "IpcStream { type: \"unix\" }");
    }
}
