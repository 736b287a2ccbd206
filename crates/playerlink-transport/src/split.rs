use std::io::{Read, Write};

use crate::error::Result;

/// Closes the directions of a transport independently of who owns its halves.
///
/// Implementations must tolerate being called more than once and from any
/// thread.
pub trait StreamControl: Send + Sync {
    /// Stop the inbound direction. A reader blocked on this transport wakes up
    /// with end-of-stream where the platform allows it.
    fn close_read(&self) -> std::io::Result<()>;

    /// Stop the outbound direction. The peer observes end-of-stream.
    fn close_write(&self) -> std::io::Result<()>;
}

/// Control for transports whose directions close when their half is dropped
/// (pipes, stdio).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopControl;

impl StreamControl for NoopControl {
    fn close_read(&self) -> std::io::Result<()> {
        Ok(())
    }

    fn close_write(&self) -> std::io::Result<()> {
        Ok(())
    }
}

/// The independent pieces of a duplex transport.
pub struct Halves {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub control: Box<dyn StreamControl>,
}

impl std::fmt::Debug for Halves {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Halves").finish_non_exhaustive()
    }
}

/// A duplex byte transport that can be split into independently owned halves.
pub trait Transport: Send {
    /// Split the transport into reader, writer and close handle.
    fn into_halves(self) -> Result<Halves>;

    /// Short name for diagnostics.
    fn describe(&self) -> String {
        "transport".to_string()
    }
}

impl Transport for Halves {
    fn into_halves(self) -> Result<Halves> {
        Ok(self)
    }

    fn describe(&self) -> String {
        "halves".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn halves_pass_through() {
        let halves = Halves {
            reader: Box::new(Cursor::new(b"abc".to_vec())),
            writer: Box::new(Vec::<u8>::new()),
            control: Box::new(NoopControl),
        };
        let mut halves = halves.into_halves().unwrap();
        let mut out = String::new();
        halves.reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "abc");
        assert!(halves.control.close_read().is_ok());
        assert!(halves.control.close_write().is_ok());
    }
}
