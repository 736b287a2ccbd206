//! `tokio_util::codec` adapters over the same wire formats.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, Frame, DEFAULT_MAX_PAYLOAD};
use crate::error::{FrameError, Result};
use crate::native::{decode_native, encode_native};

/// Correlated framing for `Framed` streams.
#[derive(Debug, Clone)]
pub struct CorrelatedCodec {
    max_payload_size: usize,
}

impl CorrelatedCodec {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }
}

impl Default for CorrelatedCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CorrelatedCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::Truncated {
                buffered: src.len(),
            }),
        }
    }
}

impl Encoder<Frame> for CorrelatedCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(frame.id, &frame.payload, dst)
    }
}

/// Native-host framing for `Framed` streams.
#[derive(Debug, Clone)]
pub struct NativeHostCodec {
    max_payload_size: usize,
}

impl NativeHostCodec {
    pub fn new() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl Default for NativeHostCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NativeHostCodec {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        decode_native(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        match self.decode(src)? {
            Some(text) => Ok(Some(text)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::Truncated {
                buffered: src.len(),
            }),
        }
    }
}

impl Encoder<String> for NativeHostCodec {
    type Error = FrameError;

    fn encode(&mut self, text: String, dst: &mut BytesMut) -> Result<()> {
        if text.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: text.len(),
                max: self.max_payload_size,
            });
        }
        encode_native(&text, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::codec::UPDATE_ID;

    #[tokio::test]
    async fn correlated_frames_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut sink = FramedWrite::new(client, CorrelatedCodec::new());
        let mut stream = FramedRead::new(server, CorrelatedCodec::new());

        sink.send(Frame::new(3, "hello")).await.unwrap();
        sink.send(Frame::update("ping")).await.unwrap();
        drop(sink);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, Frame::new(3, "hello"));
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.id, UPDATE_ID);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn truncated_tail_is_an_error() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut stream = FramedRead::new(server, CorrelatedCodec::new());

        client.write_all(&[0, 0, 0, 1, 0, 0, 0, 9, b'x']).await.unwrap();
        drop(client);

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, FrameError::Truncated { buffered: 9 }));
    }

    #[tokio::test]
    async fn native_messages_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut sink = FramedWrite::new(client, NativeHostCodec::new());
        let mut stream = FramedRead::new(server, NativeHostCodec::new());

        sink.send("\"ping\"".to_string()).await.unwrap();
        drop(sink);

        assert_eq!(stream.next().await.unwrap().unwrap(), "\"ping\"");
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn encoder_rejects_oversize_payload() {
        let mut codec = CorrelatedCodec::with_max_payload(2);
        let mut dst = BytesMut::new();
        let err = codec.encode(Frame::new(1, "abc"), &mut dst).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(dst.is_empty());
    }
}
