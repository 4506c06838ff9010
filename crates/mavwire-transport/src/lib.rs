//! Raw byte stream and endpoint abstraction.
//!
//! This is the lowest layer of mavwire. An [`Endpoint`] produces
//! [`RawStream`]s (one per TCP connection, one per Unix socket client, or a
//! single caller-supplied stream), and every stream later becomes one channel.
//!
//! A [`RawStream`] is split into independent read and write halves plus a
//! closer, so a reader thread can stay parked in a blocking read while
//! another thread writes, and a third thread can release both by closing.

pub mod endpoint;
pub mod error;
pub mod stream;
pub mod tcp;

#[cfg(unix)]
pub mod uds;

pub use endpoint::{CustomEndpoint, Endpoint};
pub use error::{Result, TransportError};
pub use stream::{RawStream, StreamCloser};
pub use tcp::{TcpClient, TcpServer};

#[cfg(unix)]
pub use uds::{UnixClient, UnixServer};
