//! Duplex byte transports for the player/browser messaging layer.
//!
//! Everything above this crate sees a transport as two independent halves:
//! a blocking reader owned by a reader thread, a writer owned by an I/O loop,
//! and a [`StreamControl`] that can close either direction from anywhere.
//!
//! Provided transports:
//! - Unix domain sockets (Linux/macOS)
//! - Loopback TCP (the browser intermediary connects back to the player)
//! - Child-process pipes and the current process' stdio (native-host channel)

pub mod error;
pub mod pipe;
pub mod split;
pub mod stream;
pub mod tcp;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use pipe::{ChildPipes, StdioTransport};
pub use split::{Halves, NoopControl, StreamControl, Transport};
pub use stream::IpcStream;
pub use tcp::{LoopbackListener, DEFAULT_PORT};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
