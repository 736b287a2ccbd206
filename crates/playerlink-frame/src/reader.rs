use std::io::{ErrorKind, Read};
use std::marker::PhantomData;

use bytes::BytesMut;
use playerlink_transport::{IpcStream, TransportError};
use tracing::trace;

use crate::codec::FrameConfig;
use crate::error::{FrameError, Result};
use crate::framing::{Correlated, Framing, NativeHost};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Partial reads are buffered internally; callers only see whole frames.
pub struct FrameReader<T, F: Framing = Correlated> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    _framing: PhantomData<F>,
}

impl<T: Read> FrameReader<T> {
    /// Correlated-frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Correlated-frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self::with_framing(inner, config)
    }
}

impl<T: Read> FrameReader<T, NativeHost> {
    /// Native-host reader with default configuration.
    pub fn native(inner: T) -> Self {
        Self::with_framing(inner, FrameConfig::default())
    }
}

impl<T: Read, F: Framing> FrameReader<T, F> {
    /// Reader for any framing.
    pub fn with_framing(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            _framing: PhantomData,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Ok(None)` when the stream ends on a frame boundary and
    /// `Err(FrameError::Truncated)` when it ends inside one.
    pub fn read_frame(&mut self) -> Result<Option<F::Frame>> {
        loop {
            if let Some(frame) = F::decode(&mut self.buf, self.config.max_payload_size)? {
                return Ok(Some(frame));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                if self.buf.is_empty() {
                    trace!(framing = F::NAME, "stream closed on frame boundary");
                    return Ok(None);
                }
                return Err(FrameError::Truncated {
                    buffered: self.buf.len(),
                });
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<IpcStream> {
    /// Correlated reader for an `IpcStream`, applying the read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: TransportError) -> FrameError {
    match err {
        TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            FrameError::Io(source)
        }
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BufMut;

    use super::*;
    use crate::codec::{encode_frame, Frame, UPDATE_ID};
    use crate::native::encode_native;
    use crate::writer::FrameWriter;

    fn wire(frames: &[(i32, &[u8])]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (id, payload) in frames {
            encode_frame(*id, payload, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn reads_frames_in_order() {
        let bytes = wire(&[(0, b"one"), (UPDATE_ID, b"push"), (1, b"two")]);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        assert_eq!(reader.read_frame().unwrap(), Some(Frame::new(0, "one")));
        assert_eq!(reader.read_frame().unwrap(), Some(Frame::update("push")));
        assert_eq!(reader.read_frame().unwrap(), Some(Frame::new(1, "two")));
        assert_eq!(reader.read_frame().unwrap(), None);
    }

    #[test]
    fn large_payload_spans_many_reads() {
        let payload = vec![0xAB; 64 * 1024];
        let mut reader = FrameReader::new(Cursor::new(wire(&[(9, &payload)])));
        let frame = reader.read_frame().unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn byte_at_a_time_stream() {
        let mut reader = FrameReader::new(Trickle {
            bytes: wire(&[(4, b"slow")]),
            pos: 0,
        });
        assert_eq!(reader.read_frame().unwrap(), Some(Frame::new(4, "slow")));
    }

    #[test]
    fn empty_stream_is_clean_close() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn eof_mid_header_is_truncated() {
        let mut reader = FrameReader::new(Cursor::new(vec![0u8, 0, 0, 1, 0]));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Truncated { buffered: 5 }));
    }

    #[test]
    fn eof_mid_payload_is_truncated() {
        let mut partial = BytesMut::new();
        partial.put_i32(2);
        partial.put_i32(16);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Truncated { .. }));
    }

    #[test]
    fn negative_length_in_stream() {
        let mut bytes = BytesMut::new();
        bytes.put_i32(0);
        bytes.put_i32(-1);
        let mut reader = FrameReader::new(Cursor::new(bytes.to_vec()));
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::NegativeLength(-1))
        ));
    }

    #[test]
    fn oversized_frame_in_stream() {
        let mut bytes = BytesMut::new();
        bytes.put_i32(1);
        bytes.put_i32(1024);

        let cfg = FrameConfig::default().with_max_payload_size(16);
        let mut reader = FrameReader::with_config(Cursor::new(bytes.to_vec()), cfg);
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::PayloadTooLarge { size: 1024, max: 16 })
        ));
    }

    #[test]
    fn interrupted_read_retries() {
        let mut reader = FrameReader::new(InterruptOnce {
            interrupted: false,
            inner: Cursor::new(wire(&[(8, b"ok")])),
        });
        assert_eq!(reader.read_frame().unwrap(), Some(Frame::new(8, "ok")));
    }

    #[test]
    fn native_reader_yields_text() {
        let mut buf = BytesMut::new();
        encode_native("\"ping\"", &mut buf).unwrap();
        encode_native("{\"n\":2}", &mut buf).unwrap();

        let mut reader = FrameReader::native(Cursor::new(buf.to_vec()));
        assert_eq!(reader.read_frame().unwrap().as_deref(), Some("\"ping\""));
        assert_eq!(reader.read_frame().unwrap().as_deref(), Some("{\"n\":2}"));
        assert_eq!(reader.read_frame().unwrap(), None);
    }

    #[test]
    #[cfg(unix)]
    fn round_trip_over_socket_pair() {
        let (left, right) = IpcStream::pair().unwrap();
        let mut writer = FrameWriter::new(left);
        let mut reader = FrameReader::with_config_ipc(right, FrameConfig::default()).unwrap();

        for id in 0..32 {
            writer.send(id, format!("msg-{id}").as_bytes()).unwrap();
        }
        for id in 0..32 {
            let frame = reader.read_frame().unwrap().unwrap();
            assert_eq!(frame.id, id);
            assert_eq!(frame.payload.as_ref(), format!("msg-{id}").as_bytes());
        }
    }

    struct Trickle {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptOnce {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptOnce {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }
}
