//! Message-type descriptors.
//!
//! A dialect is normally generated offline from a protocol definition; this
//! module only holds the table shape plus the two messages the node itself
//! speaks (HEARTBEAT and REQUEST_DATA_STREAM).

use std::collections::HashMap;

use crate::error::{FrameError, Result};

/// Static description of one message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageDescriptor {
    pub id: u32,
    pub name: &'static str,
    /// Seed byte appended to the checksum, derived from the message layout.
    pub crc_extra: u8,
    /// Full (untruncated) payload length, extensions included.
    pub payload_len: u8,
}

pub const HEARTBEAT: MessageDescriptor = MessageDescriptor {
    id: 0,
    name: "HEARTBEAT",
    crc_extra: 50,
    payload_len: 9,
};

pub const REQUEST_DATA_STREAM: MessageDescriptor = MessageDescriptor {
    id: 66,
    name: "REQUEST_DATA_STREAM",
    crc_extra: 148,
    payload_len: 6,
};

/// A set of message descriptors keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Dialect {
    messages: HashMap<u32, MessageDescriptor>,
}

impl Dialect {
    /// Build a dialect, rejecting duplicate ids.
    pub fn new(descriptors: impl IntoIterator<Item = MessageDescriptor>) -> Result<Self> {
        let mut messages = HashMap::new();
        for desc in descriptors {
            if let Some(prev) = messages.insert(desc.id, desc) {
                return Err(FrameError::InvalidConfig(format!(
                    "duplicate message id {} ({} and {})",
                    desc.id, prev.name, desc.name
                )));
            }
        }
        Ok(Self { messages })
    }

    /// HEARTBEAT and REQUEST_DATA_STREAM only.
    pub fn minimal() -> Self {
        Self {
            messages: [HEARTBEAT, REQUEST_DATA_STREAM]
                .into_iter()
                .map(|desc| (desc.id, desc))
                .collect(),
        }
    }

    pub fn get(&self, id: u32) -> Option<&MessageDescriptor> {
        self.messages.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.messages.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
