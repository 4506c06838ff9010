use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::RawStream;

/// TCP listening endpoint: one stream per accepted connection.
pub struct TcpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    closed: AtomicBool,
}

impl TcpServer {
    /// Bind and listen on `addr` (e.g. `0.0.0.0:5760`, `127.0.0.1:0`).
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr()?;

        info!(%local_addr, "listening on tcp");

        Ok(Self {
            listener,
            local_addr,
            closed: AtomicBool::new(false),
        })
    }

    /// The address this server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    // Address a loopback client can use to reach the listener.
    fn wake_addr(&self) -> SocketAddr {
        let ip = match self.local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        SocketAddr::new(ip, self.local_addr.port())
    }
}

impl Endpoint for TcpServer {
    fn describe(&self) -> String {
        format!("tcp-server:{}", self.local_addr)
    }

    fn accept(&self) -> Result<Option<(String, RawStream)>> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        debug!(%peer, "accepted tcp connection");
        Ok(Some((format!("tcp:{peer}"), RawStream::from_tcp(stream)?)))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // A throwaway connection releases a thread parked in accept().
        let _ = TcpStream::connect(self.wake_addr());
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// TCP client endpoint: connects once and yields a single stream.
#[derive(Debug)]
pub struct TcpClient {
    addr: String,
    used: AtomicBool,
}

impl TcpClient {
    /// Create a client for `addr`. No connection is attempted until accept.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            used: AtomicBool::new(false),
        }
    }
}

impl Endpoint for TcpClient {
    fn describe(&self) -> String {
        format!("tcp-client:{}", self.addr)
    }

    fn accept(&self) -> Result<Option<(String, RawStream)>> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        let stream = TcpStream::connect(&self.addr).map_err(|e| TransportError::Connect {
            addr: self.addr.clone(),
            source: e,
        })?;
        debug!(addr = %self.addr, "connected over tcp");
        Ok(Some((format!("tcp:{}", self.addr), RawStream::from_tcp(stream)?)))
    }

    fn close(&self) {
        self.used.store(true, Ordering::SeqCst);
    }
}
