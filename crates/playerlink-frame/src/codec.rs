use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: id (4) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Id carried by unsolicited updates. Never assigned to a request.
pub const UPDATE_ID: i32 = -1;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A correlated frame: a request/response id and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlation id, or [`UPDATE_ID`] for an unsolicited update.
    pub id: i32,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(id: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// An unsolicited update frame.
    pub fn update(payload: impl Into<Bytes>) -> Self {
        Self::new(UPDATE_ID, payload)
    }

    pub fn is_update(&self) -> bool {
        self.id == UPDATE_ID
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a correlated frame.
///
/// Wire format:
/// ```text
/// ┌────────────┬─────────────┬──────────────────┐
/// │ Id         │ Length      │ Payload          │
/// │ (4B BE)    │ (4B BE)     │ (Length bytes)   │
/// └────────────┴─────────────┴──────────────────┘
/// ```
pub fn encode_frame(id: i32, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = i32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: i32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_i32(id);
    dst.put_i32(len);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a correlated frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut header = &src[..HEADER_SIZE];
    let id = header.get_i32();
    let len = header.get_i32();

    let payload_len = usize::try_from(len).map_err(|_| FrameError::NegativeLength(len))?;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        src.reserve(HEADER_SIZE + payload_len - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();
    Ok(Some(Frame { id, payload }))
}

/// Configuration for frame readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl FrameConfig {
    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }
}
