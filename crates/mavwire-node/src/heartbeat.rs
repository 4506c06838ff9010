use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use mavwire_frame::common::{AUTOPILOT_INVALID, STATE_ACTIVE, TYPE_GCS};
use mavwire_frame::{Heartbeat, Message};
use tracing::debug;

use crate::channel::{lock, Channel};

/// Configuration of the periodic heartbeat sent on every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub period: Duration,
    /// `MAV_TYPE` announced by this node.
    pub mav_type: u8,
    /// `MAV_AUTOPILOT` announced by this node.
    pub autopilot: u8,
    pub system_status: u8,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5),
            mav_type: TYPE_GCS,
            autopilot: AUTOPILOT_INVALID,
            system_status: STATE_ACTIVE,
        }
    }
}

impl HeartbeatConfig {
    pub fn message(&self) -> Message {
        Heartbeat {
            custom_mode: 0,
            mav_type: self.mav_type,
            autopilot: self.autopilot,
            base_mode: 0,
            system_status: self.system_status,
            mavlink_version: 3,
        }
        .to_message()
    }
}

/// Stop flag a sleeping heartbeat loop can be woken from.
#[derive(Debug, Default)]
pub(crate) struct StopSignal {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    pub(crate) fn stop(&self) {
        *lock(&self.stopped) = true;
        self.changed.notify_all();
    }

    /// Sleep for `period`. Returns `true` if stopped meanwhile.
    pub(crate) fn sleep(&self, period: Duration) -> bool {
        let stopped = lock(&self.stopped);
        let (stopped, _) = self
            .changed
            .wait_timeout_while(stopped, period, |stopped| !*stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *stopped
    }
}

pub(crate) fn run(
    config: HeartbeatConfig,
    stop: Arc<StopSignal>,
    channels: impl Fn() -> Vec<Arc<Channel>>,
) {
    let message = config.message();
    while !stop.sleep(config.period) {
        for channel in channels() {
            if let Err(error) = channel.send(message.clone()) {
                debug!(channel = %channel, %error, "heartbeat not sent");
            }
        }
    }
    debug!("heartbeat stopped");
}
