use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};

use crate::error::{Result, TransportError};

/// Releases a raw stream.
///
/// Closing must unblock any thread parked in a read or write on the other
/// halves of the same stream. Implementations may be called from a thread
/// other than the reader and writer.
pub trait StreamCloser: Send + Sync {
    /// Close the underlying stream.
    fn close(&self) -> std::io::Result<()>;
}

impl StreamCloser for TcpStream {
    fn close(&self) -> std::io::Result<()> {
        ignore_not_connected(self.shutdown(Shutdown::Both))
    }
}

#[cfg(unix)]
impl StreamCloser for std::os::unix::net::UnixStream {
    fn close(&self) -> std::io::Result<()> {
        ignore_not_connected(self.shutdown(Shutdown::Both))
    }
}

// A peer that already hung up leaves the socket disconnected; that is closed enough.
fn ignore_not_connected(result: std::io::Result<()>) -> std::io::Result<()> {
    match result {
        Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

/// A connected duplex byte stream, split into independently owned halves.
///
/// The read half, the write half and the closer may each move to a
/// different thread.
pub struct RawStream {
    kind: &'static str,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    closer: Box<dyn StreamCloser>,
}

impl RawStream {
    /// Assemble a stream from arbitrary halves.
    pub fn from_parts(
        kind: &'static str,
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
        closer: impl StreamCloser + 'static,
    ) -> Self {
        Self {
            kind,
            reader: Box::new(reader),
            writer: Box::new(writer),
            closer: Box::new(closer),
        }
    }

    /// Wrap a connected TCP stream (clones the socket handle for each half).
    pub fn from_tcp(stream: TcpStream) -> Result<Self> {
        let split = |source| TransportError::Split { kind: "tcp", source };
        let reader = stream.try_clone().map_err(split)?;
        let closer = stream.try_clone().map_err(split)?;
        Ok(Self::from_parts("tcp", reader, stream, closer))
    }

    /// Wrap a connected Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Result<Self> {
        let split = |source| TransportError::Split {
            kind: "unix",
            source,
        };
        let reader = stream.try_clone().map_err(split)?;
        let closer = stream.try_clone().map_err(split)?;
        Ok(Self::from_parts("unix", reader, stream, closer))
    }

    /// Transport kind for diagnostics ("tcp", "unix", or caller supplied).
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Split into read half, write half and closer.
    pub fn into_parts(
        self,
    ) -> (
        Box<dyn Read + Send>,
        Box<dyn Write + Send>,
        Box<dyn StreamCloser>,
    ) {
        (self.reader, self.writer, self.closer)
    }
}

impl std::fmt::Debug for RawStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawStream").field("kind", &self.kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    #[test]
    fn tcp_halves_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        let client = client.join().unwrap();

        let (_, mut writer, _) = RawStream::from_tcp(client).unwrap().into_parts();
        let (mut reader, _, _) = RawStream::from_tcp(server).unwrap().into_parts();

        writer.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    #[cfg(unix)]
    fn close_releases_blocked_reader() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let stream = RawStream::from_unix(left).unwrap();
        assert_eq!(stream.kind(), "unix");
        let (mut reader, _writer, closer) = stream.into_parts();

        let blocked = thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf)
        });

        thread::sleep(std::time::Duration::from_millis(20));
        closer.close().unwrap();

        let read = blocked.join().unwrap().unwrap();
        assert_eq!(read, 0, "closed stream should read as EOF");
    }

    #[test]
    #[cfg(unix)]
    fn close_twice_is_tolerated() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let (_, _, closer) = RawStream::from_unix(left).unwrap().into_parts();
        closer.close().unwrap();
        closer.close().unwrap();
    }
}
