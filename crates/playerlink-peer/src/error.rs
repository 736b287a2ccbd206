use std::time::Duration;

/// Errors that can occur in runner, handler and launcher operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] playerlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] playerlink_frame::FrameError),

    /// A payload could not be encoded or decoded.
    #[error("message error: {0}")]
    Message(#[from] playerlink_message::MessageError),

    /// The request was cancelled before a response arrived.
    #[error("request cancelled")]
    Cancelled,

    /// The connection went away while the request was outstanding.
    #[error("connection closed before a response arrived")]
    Interrupted,

    /// The request could not be written.
    #[error("failed to write request: {0}")]
    WriteFailed(String),

    /// The runner or handler has been closed.
    #[error("link is closed")]
    Closed,

    /// No response within the caller's deadline.
    #[error("no response after {0:?}")]
    Timeout(Duration),

    /// The other side never became ready.
    #[error("peer never became ready: {0}")]
    NotReady(String),

    /// An endpoint string could not be understood.
    #[error("invalid endpoint {0:?}: expected unix:PATH, tcp:HOST:PORT, a path or HOST:PORT")]
    InvalidEndpoint(String),

    /// A background thread or worker pool could not be started.
    #[error("failed to start {what}: {source}")]
    Spawn {
        what: &'static str,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PeerError>;
