//! MAVLink node with channel lifecycle management.
//!
//! mavwire turns TCP connections, Unix socket clients or caller-supplied
//! byte streams into bidirectional MAVLink channels and reports everything
//! that happens on them through one ordered event bus.
//!
//! # Crate Structure
//!
//! - [`transport`]: Raw byte streams and endpoints (TCP, Unix sockets, custom)
//! - [`frame`]: MAVLink v1/v2 framing, checksums, signing, dialect table
//! - [`node`]: Channels, events and the node hub (behind `node` feature)

/// Re-export transport types.
pub mod transport {
    pub use mavwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use mavwire_frame::*;
}

/// Re-export node types (requires `node` feature).
#[cfg(feature = "node")]
pub mod node {
    pub use mavwire_node::*;
}
