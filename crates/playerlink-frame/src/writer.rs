use std::io::{ErrorKind, Write};
use std::marker::PhantomData;

use bytes::BytesMut;
use playerlink_transport::IpcStream;

use crate::codec::{Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::framing::{Correlated, Framing, NativeHost};
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream, flushing after each one.
pub struct FrameWriter<T, F: Framing = Correlated> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    _framing: PhantomData<F>,
}

impl<T: Write> FrameWriter<T> {
    /// Correlated-frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Correlated-frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self::with_framing(inner, config)
    }

    /// Encode and send a payload under a correlation id.
    pub fn send(&mut self, id: i32, payload: &[u8]) -> Result<()> {
        self.check_size(payload.len())?;
        self.buf.clear();
        crate::codec::encode_frame(id, payload, &mut self.buf)?;
        self.write_buffered()
    }
}

impl<T: Write> FrameWriter<T, NativeHost> {
    /// Native-host writer with default configuration.
    pub fn native(inner: T) -> Self {
        Self::with_framing(inner, FrameConfig::default())
    }

    /// Encode and send one text message.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.check_size(text.len())?;
        self.buf.clear();
        crate::native::encode_native(text, &mut self.buf)?;
        self.write_buffered()
    }
}

impl<T: Write, F: Framing> FrameWriter<T, F> {
    /// Writer for any framing.
    pub fn with_framing(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            _framing: PhantomData,
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &F::Frame) -> Result<()> {
        self.check_size(F::payload_len(frame))?;
        self.buf.clear();
        F::encode(frame, &mut self.buf)?;
        self.write_buffered()
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.config.max_payload_size,
            });
        }
        Ok(())
    }

    fn write_buffered(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl FrameWriter<IpcStream> {
    /// Correlated writer for an `IpcStream`, applying the write timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

impl<T: Write> FrameWriter<T> {
    /// Send a prepared correlated frame.
    pub fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_frame(frame)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::codec::{decode_frame, UPDATE_ID};
    use crate::native::decode_native;

    fn written(writer: FrameWriter<Cursor<Vec<u8>>>) -> BytesMut {
        BytesMut::from(writer.into_inner().into_inner().as_slice())
    }

    #[test]
    fn writes_frames_back_to_back() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(0, b"one").unwrap();
        writer.send(UPDATE_ID, b"push").unwrap();
        writer.send_frame(&Frame::new(1, "two")).unwrap();

        let mut wire = written(writer);
        let f1 = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        let f2 = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        let f3 = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!((f1.id, f1.payload.as_ref()), (0, b"one".as_ref()));
        assert!(f2.is_update());
        assert_eq!((f3.id, f3.payload.as_ref()), (1, b"two".as_ref()));
        assert!(wire.is_empty());
    }

    #[test]
    fn oversize_payload_writes_nothing() {
        let cfg = FrameConfig::default().with_max_payload_size(4);
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer.send(1, b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 4 }));
        assert!(written(writer).is_empty());
    }

    #[test]
    fn flushes_after_each_frame() {
        let sink = FlushTracking::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.send(1, b"x").unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn retries_interrupted_and_would_block() {
        let mut writer = FrameWriter::new(Hiccup {
            write_errors: vec![ErrorKind::Interrupted, ErrorKind::WouldBlock],
            flush_errors: vec![ErrorKind::WouldBlock, ErrorKind::Interrupted],
            data: Vec::new(),
        });
        writer.send(5, b"retry").unwrap();

        let mut wire = BytesMut::from(writer.into_inner().data.as_slice());
        let frame = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!(frame, Frame::new(5, "retry"));
    }

    #[test]
    fn zero_length_write_means_closed() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send(1, b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn broken_pipe_propagates() {
        let mut writer = FrameWriter::new(BrokenWriter);
        let err = writer.send(1, b"x").unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }

    #[test]
    fn native_writer_frames_text() {
        let mut writer = FrameWriter::native(Cursor::new(Vec::<u8>::new()));
        writer.send_text("\"ping\"").unwrap();
        writer.write_frame(&"{}".to_string()).unwrap();

        let mut wire = BytesMut::from(writer.into_inner().into_inner().as_slice());
        assert_eq!(decode_native(&mut wire, usize::MAX).unwrap().as_deref(), Some("\"ping\""));
        assert_eq!(decode_native(&mut wire, usize::MAX).unwrap().as_deref(), Some("{}"));
    }

    #[test]
    #[cfg(unix)]
    fn applies_write_timeout_for_ipc_stream() {
        let (left, _right) = IpcStream::pair().unwrap();
        let cfg = FrameConfig {
            write_timeout: Some(std::time::Duration::from_millis(10)),
            ..FrameConfig::default()
        };
        assert!(FrameWriter::with_config_ipc(left, cfg).is_ok());
    }

    #[derive(Default)]
    struct FlushTracking {
        flushed: Arc<AtomicBool>,
    }

    impl Write for FlushTracking {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Hiccup {
        write_errors: Vec<ErrorKind>,
        flush_errors: Vec<ErrorKind>,
        data: Vec<u8>,
    }

    impl Write for Hiccup {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Some(kind) = self.write_errors.pop() {
                return Err(std::io::Error::from(kind));
            }
            // Short writes exercise the offset loop.
            let n = buf.len().min(3);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            match self.flush_errors.pop() {
                Some(kind) => Err(std::io::Error::from(kind)),
                None => Ok(()),
            }
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
