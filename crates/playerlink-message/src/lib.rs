//! Messages exchanged between the player and the browser process.
//!
//! Every payload is one [`Message`]: a closed, tagged union covering plain
//! values, browser commands and queries, their results, and the pushes the
//! browser sends on its own (logs, playback info, errors). On the wire it is
//! wrapped in a versioned envelope:
//!
//! ```text
//! {"v":1,"msg":{"type":"command","value":{"command":"seek","time":12.5,"relative":false}}}
//! ```
//!
//! Decoding never panics: malformed input, unknown kinds and unknown
//! versions all surface as [`MessageError`].

pub mod browser;
pub mod codec;
pub mod error;
pub mod message;

pub use browser::{
    BrowserCommand, BrowserQuery, CommandConfirmation, CommandReturn, LogLevel, LogRecord,
    NumberPing, PlaybackInfo, PlaybackState, PlaybackStatus, RemoteError,
};
pub use codec::{Envelope, JsonCodec, MessageCodec, PROTOCOL_VERSION};
pub use error::{MessageError, Result};
pub use message::Message;
