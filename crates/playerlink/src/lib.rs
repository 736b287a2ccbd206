//! Messaging between a media player and the browser that plays for it.
//!
//! The player drives a browser-side intermediary over a local socket: it sends
//! commands and queries and gets correlated responses back, while the browser
//! pushes unsolicited updates. Between the intermediary and the browser
//! extension the same messages travel over the native-messaging channel.
//!
//! # Crate Structure
//!
//! - [`transport`]: Unix sockets, loopback TCP, child pipes, stdio
//! - [`frame`]: correlated and native-host wire framing
//! - [`message`]: the message set and its JSON codec
//! - [`peer`]: runners, handler, readiness promise and browser launcher
//!   (behind the `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use playerlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use playerlink_frame::*;
}

/// Re-export message types.
pub mod message {
    pub use playerlink_message::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use playerlink_peer::*;
}
