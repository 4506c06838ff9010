//! MAVLink frame codec.
//!
//! Turns a raw byte stream into decoded [`Frame`]s and back:
//! - v1 (`0xFE`) and v2 (`0xFD`) framing, sequence and sender identity
//! - CRC-16/MCRF4XX checksum seeded with the per-message CRC extra
//! - v2 payload truncation and zero re-padding
//! - optional v2 signing (SHA-256 over a 32-byte shared key)
//!
//! Message-type knowledge comes from a [`Dialect`] table. Without one,
//! frames are still split correctly but checksums cannot be verified.

pub mod codec;
pub mod common;
pub mod config;
pub mod dialect;
pub mod error;
pub mod reader;
pub mod signing;
pub mod writer;

pub use codec::{
    crc_accumulate, decode_frame, encode_frame, Frame, Message, Signature, Version, MAGIC_V1,
    MAGIC_V2, MAX_PAYLOAD_LEN,
};
pub use common::{Heartbeat, RequestDataStream};
pub use config::CodecConfig;
pub use dialect::{Dialect, MessageDescriptor, HEARTBEAT, REQUEST_DATA_STREAM};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use signing::SigningKey;
pub use writer::FrameWriter;
