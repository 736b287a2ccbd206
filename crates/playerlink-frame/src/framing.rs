use bytes::BytesMut;

use crate::codec::{decode_frame, encode_frame, Frame};
use crate::error::Result;
use crate::native::{decode_native, encode_native};

/// A wire format that [`FrameReader`](crate::FrameReader) and
/// [`FrameWriter`](crate::FrameWriter) can speak.
pub trait Framing: Send + 'static {
    /// One decoded unit.
    type Frame: Send;

    /// Short name for logs.
    const NAME: &'static str;

    /// Decode one unit, or `Ok(None)` if more bytes are needed.
    fn decode(src: &mut BytesMut, max_payload: usize) -> Result<Option<Self::Frame>>;

    /// Append one encoded unit to `dst`.
    fn encode(frame: &Self::Frame, dst: &mut BytesMut) -> Result<()>;

    /// Payload size checked against the configured maximum before writing.
    fn payload_len(frame: &Self::Frame) -> usize;
}

/// Id + length + payload, big-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct Correlated;

impl Framing for Correlated {
    type Frame = Frame;

    const NAME: &'static str = "correlated";

    fn decode(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
        decode_frame(src, max_payload)
    }

    fn encode(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
        encode_frame(frame.id, &frame.payload, dst)
    }

    fn payload_len(frame: &Frame) -> usize {
        frame.payload.len()
    }
}

/// Native-endian length + UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeHost;

impl Framing for NativeHost {
    type Frame = String;

    const NAME: &'static str = "native-host";

    fn decode(src: &mut BytesMut, max_payload: usize) -> Result<Option<String>> {
        decode_native(src, max_payload)
    }

    fn encode(frame: &String, dst: &mut BytesMut) -> Result<()> {
        encode_native(frame, dst)
    }

    fn payload_len(frame: &String) -> usize {
        frame.len()
    }
}
