use std::fmt;
use std::sync::Arc;

use mavwire_frame::{Frame, FrameError, Message};

use crate::channel::Channel;

/// Something that happened on one of the node's channels.
///
/// Per channel the sequence is always `ChannelOpen`, then any number of
/// `Frame`, `ParseError` and `StreamRequested`, then exactly one
/// `ChannelClose`. Nothing for a channel follows its `ChannelClose`.
#[derive(Debug)]
pub enum Event {
    /// The channel is ready: writes sent from here on are accepted.
    ChannelOpen { channel: Arc<Channel> },

    /// The channel is shutting down. Last event for this channel.
    ChannelClose { channel: Arc<Channel> },

    /// A valid frame was received.
    Frame(FrameEvent),

    /// A frame could not be decoded or validated. The channel stays up.
    ParseError {
        error: FrameError,
        channel: Arc<Channel>,
    },

    /// Data streams were requested from a remote autopilot.
    StreamRequested {
        channel: Arc<Channel>,
        system_id: u8,
        component_id: u8,
    },
}

impl Event {
    /// Channel the event refers to.
    pub fn channel(&self) -> &Arc<Channel> {
        match self {
            Event::ChannelOpen { channel }
            | Event::ChannelClose { channel }
            | Event::ParseError { channel, .. }
            | Event::StreamRequested { channel, .. } => channel,
            Event::Frame(frame) => &frame.channel,
        }
    }

    /// Short lowercase name, for logs and output.
    pub fn name(&self) -> &'static str {
        match self {
            Event::ChannelOpen { .. } => "channel_open",
            Event::ChannelClose { .. } => "channel_close",
            Event::Frame(_) => "frame",
            Event::ParseError { .. } => "parse_error",
            Event::StreamRequested { .. } => "stream_requested",
        }
    }
}

/// A received frame and the channel it arrived on.
#[derive(Debug)]
pub struct FrameEvent {
    pub frame: Frame,
    pub channel: Arc<Channel>,
}

impl FrameEvent {
    /// System id of the sender.
    pub fn system_id(&self) -> u8 {
        self.frame.system_id
    }

    /// Component id of the sender.
    pub fn component_id(&self) -> u8 {
        self.frame.component_id
    }

    pub fn message(&self) -> &Message {
        &self.frame.message
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.name(), self.channel())
    }
}
