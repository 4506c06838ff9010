//! Automatic data stream requests toward ArduPilot autopilots.
//!
//! ArduPilot only streams telemetry after being asked to. When a heartbeat
//! from an ArduPilot autopilot arrives, the node answers on the same channel
//! with one `REQUEST_DATA_STREAM` per stream group, at most once per
//! interval for each (channel, system, component).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mavwire_frame::common::AUTOPILOT_ARDUPILOTMEGA;
use mavwire_frame::{Dialect, Heartbeat, RequestDataStream, HEARTBEAT, REQUEST_DATA_STREAM};
use tracing::{debug, info};

use crate::channel::lock;
use crate::event::{Event, FrameEvent};
use crate::observer::FrameObserver;

/// `MAV_DATA_STREAM` groups requested: raw sensors, extended status,
/// RC channels, position and the three extra groups.
pub const REQUESTED_STREAMS: [u8; 7] = [1, 2, 3, 6, 10, 11, 12];

const DEFAULT_FREQUENCY: u16 = 4;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for automatic stream requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequestConfig {
    /// Requested rate for every stream, in Hz.
    pub frequency: u16,
    /// Minimum time between two requests to the same remote component.
    pub interval: Duration,
}

impl Default for StreamRequestConfig {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_FREQUENCY,
            interval: DEFAULT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RemoteKey {
    channel: u64,
    system_id: u8,
    component_id: u8,
}

/// [`FrameObserver`] that requests data streams from ArduPilot autopilots.
#[derive(Debug)]
pub struct StreamRequester {
    config: StreamRequestConfig,
    last_requests: Mutex<HashMap<RemoteKey, Instant>>,
}

impl StreamRequester {
    pub fn new(config: StreamRequestConfig) -> Self {
        Self {
            config,
            last_requests: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `dialect` can carry the messages this observer reads and writes.
    pub fn supported_by(dialect: &Dialect) -> bool {
        dialect.contains(HEARTBEAT.id) && dialect.contains(REQUEST_DATA_STREAM.id)
    }

    /// Drop the rate-limit state of a channel that went away.
    pub fn forget_channel(&self, channel: u64) {
        lock(&self.last_requests).retain(|key, _| key.channel != channel);
    }

    // Claims the slot for `key` if the previous request is old enough.
    fn claim(&self, key: RemoteKey, now: Instant) -> bool {
        let mut last_requests = lock(&self.last_requests);
        match last_requests.get(&key) {
            Some(last) if now.duration_since(*last) < self.config.interval => false,
            _ => {
                last_requests.insert(key, now);
                true
            }
        }
    }
}

impl FrameObserver for StreamRequester {
    fn on_frame(&self, event: &FrameEvent) {
        let heartbeat = match Heartbeat::from_message(event.message()) {
            Ok(Some(heartbeat)) => heartbeat,
            Ok(None) => return,
            Err(error) => {
                debug!(channel = %event.channel, %error, "unreadable heartbeat");
                return;
            }
        };
        if heartbeat.autopilot != AUTOPILOT_ARDUPILOTMEGA {
            return;
        }

        let key = RemoteKey {
            channel: event.channel.id(),
            system_id: event.system_id(),
            component_id: event.component_id(),
        };
        if !self.claim(key, Instant::now()) {
            return;
        }

        for stream in REQUESTED_STREAMS {
            let request = RequestDataStream {
                req_message_rate: self.config.frequency,
                target_system: key.system_id,
                target_component: key.component_id,
                req_stream_id: stream,
                start_stop: 1,
            };
            if let Err(error) = event.channel.send(request.to_message()) {
                debug!(channel = %event.channel, %error, "stream request not sent");
                return;
            }
        }

        info!(
            channel = %event.channel,
            system_id = key.system_id,
            component_id = key.component_id,
            "requested data streams"
        );
        event.channel.publish(Event::StreamRequested {
            channel: Arc::clone(&event.channel),
            system_id: key.system_id,
            component_id: key.component_id,
        });
    }
}
