//! Field layouts of the messages the node speaks itself.

use bytes::{Buf, BufMut, BytesMut};

use crate::codec::Message;
use crate::dialect::{HEARTBEAT, REQUEST_DATA_STREAM};
use crate::error::{FrameError, Result};

/// `MAV_AUTOPILOT_ARDUPILOTMEGA`.
pub const AUTOPILOT_ARDUPILOTMEGA: u8 = 3;
/// `MAV_TYPE_GCS`.
pub const TYPE_GCS: u8 = 6;
/// `MAV_AUTOPILOT_INVALID`.
pub const AUTOPILOT_INVALID: u8 = 8;
/// `MAV_STATE_ACTIVE`.
pub const STATE_ACTIVE: u8 = 4;

/// HEARTBEAT (#0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}

impl Heartbeat {
    pub fn to_message(&self) -> Message {
        let mut buf = BytesMut::with_capacity(usize::from(HEARTBEAT.payload_len));
        buf.put_u32_le(self.custom_mode);
        buf.put_u8(self.mav_type);
        buf.put_u8(self.autopilot);
        buf.put_u8(self.base_mode);
        buf.put_u8(self.system_status);
        buf.put_u8(self.mavlink_version);
        Message::new(HEARTBEAT.id, buf.freeze())
    }

    /// Parse a HEARTBEAT. Returns `Ok(None)` for any other message id.
    pub fn from_message(msg: &Message) -> Result<Option<Self>> {
        if msg.id != HEARTBEAT.id {
            return Ok(None);
        }
        let mut buf = require_len(msg, HEARTBEAT.payload_len)?;
        Ok(Some(Self {
            custom_mode: buf.get_u32_le(),
            mav_type: buf.get_u8(),
            autopilot: buf.get_u8(),
            base_mode: buf.get_u8(),
            system_status: buf.get_u8(),
            mavlink_version: buf.get_u8(),
        }))
    }
}

/// REQUEST_DATA_STREAM (#66).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDataStream {
    pub req_message_rate: u16,
    pub target_system: u8,
    pub target_component: u8,
    pub req_stream_id: u8,
    pub start_stop: u8,
}

impl RequestDataStream {
    pub fn to_message(&self) -> Message {
        let mut buf = BytesMut::with_capacity(usize::from(REQUEST_DATA_STREAM.payload_len));
        buf.put_u16_le(self.req_message_rate);
        buf.put_u8(self.target_system);
        buf.put_u8(self.target_component);
        buf.put_u8(self.req_stream_id);
        buf.put_u8(self.start_stop);
        Message::new(REQUEST_DATA_STREAM.id, buf.freeze())
    }

    /// Parse a REQUEST_DATA_STREAM. Returns `Ok(None)` for any other message id.
    pub fn from_message(msg: &Message) -> Result<Option<Self>> {
        if msg.id != REQUEST_DATA_STREAM.id {
            return Ok(None);
        }
        let mut buf = require_len(msg, REQUEST_DATA_STREAM.payload_len)?;
        Ok(Some(Self {
            req_message_rate: buf.get_u16_le(),
            target_system: buf.get_u8(),
            target_component: buf.get_u8(),
            req_stream_id: buf.get_u8(),
            start_stop: buf.get_u8(),
        }))
    }
}

fn require_len(msg: &Message, need: u8) -> Result<&[u8]> {
    let need = usize::from(need);
    if msg.payload.len() < need {
        return Err(FrameError::PayloadTooShort {
            id: msg.id,
            len: msg.payload.len(),
            need,
        });
    }
    Ok(&msg.payload[..need])
}
