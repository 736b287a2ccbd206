use std::io::{Stdin, Stdout};
use std::process::{Child, ChildStdin, ChildStdout};

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::split::{Halves, NoopControl, Transport};

/// The stdin/stdout pipes of a spawned child process.
///
/// Writing goes to the child's stdin; reading comes from its stdout. The
/// outbound direction closes when the writer half is dropped, the inbound one
/// when the child exits.
#[derive(Debug)]
pub struct ChildPipes {
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl ChildPipes {
    /// Take the piped stdin and stdout from a child spawned with
    /// `Stdio::piped()` for both.
    pub fn take(child: &mut Child) -> Result<Self> {
        let stdin = child.stdin.take().ok_or(TransportError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(TransportError::MissingPipe("stdout"))?;
        debug!(pid = child.id(), "attached to child pipes");
        Ok(Self { stdin, stdout })
    }
}

impl Transport for ChildPipes {
    fn into_halves(self) -> Result<Halves> {
        Ok(Halves {
            reader: Box::new(self.stdout),
            writer: Box::new(self.stdin),
            control: Box::new(NoopControl),
        })
    }

    fn describe(&self) -> String {
        "child-pipes".to_string()
    }
}

/// This process' own stdin/stdout, as seen by a native messaging host.
#[derive(Debug)]
pub struct StdioTransport {
    stdin: Stdin,
    stdout: Stdout,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            stdin: std::io::stdin(),
            stdout: std::io::stdout(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for StdioTransport {
    fn into_halves(self) -> Result<Halves> {
        Ok(Halves {
            reader: Box::new(self.stdin),
            writer: Box::new(self.stdout),
            control: Box::new(NoopControl),
        })
    }

    fn describe(&self) -> String {
        "stdio".to_string()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{Read, Write};
    use std::process::{Command, Stdio};

    use super::*;

    #[test]
    fn child_pipes_round_trip_through_cat() {
        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();

        let pipes = ChildPipes::take(&mut child).unwrap();
        let mut halves = pipes.into_halves().unwrap();
        halves.writer.write_all(b"through the pipe").unwrap();
        halves.writer.flush().unwrap();
        drop(halves.writer);

        let mut out = String::new();
        halves.reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "through the pipe");
        child.wait().unwrap();
    }

    #[test]
    fn missing_pipe_is_reported() {
        let mut child = Command::new("true")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();

        let err = ChildPipes::take(&mut child).unwrap_err();
        assert!(matches!(err, TransportError::MissingPipe("stdin")));
        child.wait().unwrap();
    }
}
