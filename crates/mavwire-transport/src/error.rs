use std::path::PathBuf;

/// Errors raised while setting up or splitting a raw stream.
///
/// Failures on an established stream surface as plain `std::io::Error`
/// from its read and write halves.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// Duplicating the socket handle for the read, write or close half failed.
    #[error("failed to split {kind} stream: {source}")]
    Split {
        kind: &'static str,
        source: std::io::Error,
    },

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path does not fit in `sockaddr_un`.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },
}

pub type Result<T> = std::result::Result<T, TransportError>;
