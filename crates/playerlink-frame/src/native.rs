use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Native-host header: a single length field.
pub const NATIVE_HEADER_SIZE: usize = 4;

/// Encode one native-host message: `u32` length in platform byte order, then
/// the UTF-8 bytes.
pub fn encode_native(text: &str, dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(text.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: text.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(NATIVE_HEADER_SIZE + text.len());
    dst.put_slice(&len.to_ne_bytes());
    dst.put_slice(text.as_bytes());
    Ok(())
}

/// Decode one native-host message.
///
/// Returns `Ok(None)` until a complete message is buffered.
pub fn decode_native(src: &mut BytesMut, max_payload: usize) -> Result<Option<String>> {
    if src.len() < NATIVE_HEADER_SIZE {
        return Ok(None);
    }

    let mut len_bytes = [0u8; NATIVE_HEADER_SIZE];
    len_bytes.copy_from_slice(&src[..NATIVE_HEADER_SIZE]);
    let len = u32::from_ne_bytes(len_bytes) as usize;
    if len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: max_payload,
        });
    }

    if src.len() < NATIVE_HEADER_SIZE + len {
        return Ok(None);
    }

    src.advance(NATIVE_HEADER_SIZE);
    let body = src.split_to(len);
    Ok(Some(String::from_utf8(body.to_vec())?))
}
