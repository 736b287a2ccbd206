//! Message framing for the player/browser link.
//!
//! Two wire formats share one reader/writer pair:
//! - [`Correlated`]: a 4-byte big-endian request id, a 4-byte big-endian
//!   payload length, then the payload. Id `-1` ([`UPDATE_ID`]) marks an
//!   unsolicited update.
//! - [`NativeHost`]: a 4-byte native-endian length followed by UTF-8 text, as
//!   spoken by browser native messaging hosts. No id; replies are matched in
//!   order.
//!
//! Readers hand out complete frames only and report a clean close separately
//! from a stream that ends inside a frame.

pub mod codec;
pub mod error;
pub mod framing;
pub mod native;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, UPDATE_ID,
};
pub use error::{FrameError, Result};
pub use framing::{Correlated, Framing, NativeHost};
pub use native::{decode_native, encode_native, NATIVE_HEADER_SIZE};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::{CorrelatedCodec, NativeHostCodec};
