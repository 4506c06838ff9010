//! Channels, events and the node hub.
//!
//! A [`Node`] accepts raw streams from its endpoints and runs one
//! [`Channel`] per stream. Everything that happens on any channel arrives,
//! in per-channel order, on a single event bus read with [`Node::events`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mavwire_frame::Dialect;
//! use mavwire_node::{Event, Node, NodeConfig};
//! use mavwire_transport::{Endpoint, TcpServer};
//!
//! let server: Arc<dyn Endpoint> = Arc::new(TcpServer::bind("0.0.0.0:5760")?);
//! let node = Node::new(NodeConfig {
//!     endpoints: vec![server],
//!     dialect: Some(Arc::new(Dialect::minimal())),
//!     ..NodeConfig::default()
//! })?;
//!
//! for event in node.events() {
//!     if let Event::Frame(frame) = &event {
//!         node.write_frame_except(&frame.channel, &frame.frame);
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod channel;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod node;
pub mod observer;
pub mod stream_request;

pub use channel::{Channel, ChannelState, HubContext, Outbound};
pub use error::{NodeError, Result};
pub use event::{Event, FrameEvent};
pub use heartbeat::HeartbeatConfig;
pub use node::{Node, NodeConfig};
pub use observer::FrameObserver;
pub use stream_request::{StreamRequestConfig, StreamRequester, REQUESTED_STREAMS};
