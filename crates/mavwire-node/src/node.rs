//! The node: owns the endpoints, the channel set and the event bus.
//!
//! Threads:
//! - one accept thread per endpoint, turning each new stream into a channel
//! - the supervisor, which forgets channels once they report closing and
//!   acknowledges the ones that closed on their own
//! - the optional heartbeat emitter
//!
//! Plus the threads of every channel (see [`crate::channel`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mavwire_frame::{CodecConfig, Dialect, Frame, Message, SigningKey, Version};
use mavwire_transport::{Endpoint, RawStream};
use tracing::{debug, info, warn};

use crate::channel::{lock, Channel, HubContext, Outbound};
use crate::error::{NodeError, Result};
use crate::event::Event;
use crate::heartbeat::{self, HeartbeatConfig, StopSignal};
use crate::observer::FrameObserver;
use crate::stream_request::{StreamRequestConfig, StreamRequester};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Node configuration.
pub struct NodeConfig {
    /// Sources of channels. At least one is required.
    pub endpoints: Vec<Arc<dyn Endpoint>>,
    /// Messages this node can verify and encode.
    pub dialect: Option<Arc<Dialect>>,
    /// Key incoming frames must be signed with.
    pub in_key: Option<SigningKey>,
    pub out_version: Version,
    pub out_system_id: u8,
    pub out_component_id: u8,
    /// Key used to sign outgoing frames.
    pub out_key: Option<SigningKey>,
    /// Events buffered before channel readers block. `0` makes every
    /// publish wait for the consumer.
    pub event_capacity: usize,
    /// Periodic heartbeat on every channel. Needs HEARTBEAT in the dialect.
    pub heartbeat: Option<HeartbeatConfig>,
    /// Automatic stream requests to ArduPilot autopilots. Needs HEARTBEAT
    /// and REQUEST_DATA_STREAM in the dialect.
    pub stream_request: Option<StreamRequestConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            dialect: None,
            in_key: None,
            out_version: Version::V2,
            out_system_id: 255,
            out_component_id: 1,
            out_key: None,
            event_capacity: 0,
            heartbeat: None,
            stream_request: None,
        }
    }
}

impl NodeConfig {
    /// Codec settings shared by every channel.
    pub fn codec(&self) -> CodecConfig {
        CodecConfig {
            dialect: self.dialect.clone(),
            in_key: self.in_key,
            out_version: self.out_version,
            out_system_id: self.out_system_id,
            out_component_id: self.out_component_id,
            out_signature_link_id: 0,
            out_key: self.out_key,
        }
    }

    fn dialect_has(&self, check: impl Fn(&Dialect) -> bool) -> bool {
        self.dialect.as_deref().is_some_and(check)
    }
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let endpoints: Vec<String> = self.endpoints.iter().map(|e| e.describe()).collect();
        f.debug_struct("NodeConfig")
            .field("endpoints", &endpoints)
            .field("codec", &self.codec())
            .field("event_capacity", &self.event_capacity)
            .field("heartbeat", &self.heartbeat)
            .field("stream_request", &self.stream_request)
            .finish()
    }
}

struct Shared {
    // `None` once the node is closed, so no new channel can join.
    hub: Mutex<Option<HubContext>>,
    channels: Mutex<HashMap<u64, Arc<Channel>>>,
    stream_requester: Option<Arc<StreamRequester>>,
    closing: AtomicBool,
}

impl Shared {
    // Closed channels may linger until the supervisor handles their report.
    fn snapshot(&self) -> Vec<Arc<Channel>> {
        lock(&self.channels)
            .values()
            .filter(|channel| !channel.is_closed())
            .cloned()
            .collect()
    }

    fn add_channel(&self, endpoint: &Arc<dyn Endpoint>, label: String, stream: RawStream) {
        let hub = lock(&self.hub).clone();
        let Some(hub) = hub else {
            debug!(%label, "node closed, dropping stream");
            return;
        };

        let channel = match Channel::new(&hub, Arc::clone(endpoint), label, stream) {
            Ok(channel) => channel,
            Err(error) => {
                warn!(endpoint = %endpoint.describe(), %error, "cannot create channel");
                return;
            }
        };

        lock(&self.channels).insert(channel.id(), Arc::clone(&channel));
        if let Err(error) = channel.start() {
            warn!(channel = %channel, %error, "cannot start channel");
            lock(&self.channels).remove(&channel.id());
            channel.terminate();
        }
    }

    fn accept_loop(&self, endpoint: Arc<dyn Endpoint>) {
        loop {
            match endpoint.accept() {
                Ok(Some((label, stream))) => {
                    if self.closing.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!(endpoint = %endpoint.describe(), %label, "new stream");
                    self.add_channel(&endpoint, label, stream);
                }
                Ok(None) => break,
                Err(error) => {
                    if self.closing.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!(endpoint = %endpoint.describe(), %error, "accept failed");
                    thread::sleep(ACCEPT_RETRY_DELAY);
                }
            }
        }
        debug!(endpoint = %endpoint.describe(), "endpoint done");
    }

    fn supervise(&self, reports: Receiver<Arc<Channel>>) {
        for channel in reports.iter() {
            lock(&self.channels).remove(&channel.id());
            if let Some(requester) = &self.stream_requester {
                requester.forget_channel(channel.id());
            }
            debug!(channel = %channel, state = ?channel.state(), "channel reported closed");
            channel.terminate();
        }
    }
}

/// A MAVLink node.
///
/// Dropping the node closes it.
pub struct Node {
    shared: Arc<Shared>,
    endpoints: Vec<Arc<dyn Endpoint>>,
    events: Mutex<Receiver<Event>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    heartbeat_stop: Arc<StopSignal>,
    closed: AtomicBool,
}

impl Node {
    /// Validate `config`, then start accepting on every endpoint.
    pub fn new(config: NodeConfig) -> Result<Self> {
        if config.endpoints.is_empty() {
            return Err(NodeError::InvalidConfig(
                "at least one endpoint is required".to_string(),
            ));
        }
        let codec = config.codec();
        codec.validate().map_err(NodeError::CodecInit)?;

        let stream_requester = match config.stream_request {
            Some(cfg) if config.dialect_has(StreamRequester::supported_by) => {
                Some(Arc::new(StreamRequester::new(cfg)))
            }
            Some(_) => {
                warn!("dialect lacks HEARTBEAT or REQUEST_DATA_STREAM, stream requests disabled");
                None
            }
            None => None,
        };
        let heartbeat = match config.heartbeat {
            Some(cfg) if config.dialect_has(|d| d.contains(mavwire_frame::HEARTBEAT.id)) => {
                Some(cfg)
            }
            Some(_) => {
                warn!("dialect lacks HEARTBEAT, heartbeat disabled");
                None
            }
            None => None,
        };

        let (events_tx, events_rx) = mpsc::sync_channel(config.event_capacity);
        let (reports_tx, reports_rx) = mpsc::channel();
        let mut hub = HubContext::new(codec, events_tx, reports_tx);
        if let Some(requester) = &stream_requester {
            hub = hub.with_observer(Arc::clone(requester) as Arc<dyn FrameObserver>);
        }

        let node = Self {
            shared: Arc::new(Shared {
                hub: Mutex::new(Some(hub)),
                channels: Mutex::new(HashMap::new()),
                stream_requester,
                closing: AtomicBool::new(false),
            }),
            endpoints: config.endpoints,
            events: Mutex::new(events_rx),
            threads: Mutex::new(Vec::new()),
            supervisor: Mutex::new(None),
            heartbeat_stop: Arc::new(StopSignal::default()),
            closed: AtomicBool::new(false),
        };

        // From here on a failure drops `node`, which closes what was started.
        let shared = Arc::clone(&node.shared);
        *lock(&node.supervisor) = Some(spawn("mavwire-supervisor", move || {
            shared.supervise(reports_rx)
        })?);

        for endpoint in &node.endpoints {
            let shared = Arc::clone(&node.shared);
            let endpoint = Arc::clone(endpoint);
            let handle = spawn("mavwire-accept", move || shared.accept_loop(endpoint))?;
            lock(&node.threads).push(handle);
        }

        if let Some(cfg) = heartbeat {
            let shared = Arc::clone(&node.shared);
            let stop = Arc::clone(&node.heartbeat_stop);
            let handle = spawn("mavwire-heartbeat", move || {
                heartbeat::run(cfg, stop, || shared.snapshot())
            })?;
            lock(&node.threads).push(handle);
        }

        info!(
            endpoints = node.endpoints.len(),
            heartbeat = heartbeat.is_some(),
            stream_requests = node.shared.stream_requester.is_some(),
            "node started"
        );
        Ok(node)
    }

    /// Block until the next event. `None` once the node is closed.
    pub fn recv_event(&self) -> Option<Event> {
        lock(&self.events).recv().ok()
    }

    /// Like [`Node::recv_event`], giving up after `timeout`.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<Event> {
        lock(&self.events).recv_timeout(timeout).ok()
    }

    /// Blocking iterator over events, ending when the node is closed.
    pub fn events(&self) -> impl Iterator<Item = Event> + '_ {
        std::iter::from_fn(move || self.recv_event())
    }

    /// Channels currently open.
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.shared.snapshot()
    }

    /// Send `message` on every channel. Returns how many accepted it.
    pub fn write_message_all(&self, message: &Message) -> usize {
        self.broadcast(Outbound::Message(message.clone()), None)
    }

    /// Send `message` on `channel` only.
    pub fn write_message_to(&self, channel: &Channel, message: &Message) -> Result<()> {
        channel.send(message.clone())
    }

    /// Send `message` on every channel but `channel`.
    pub fn write_message_except(&self, channel: &Channel, message: &Message) -> usize {
        self.broadcast(Outbound::Message(message.clone()), Some(channel.id()))
    }

    /// Send `frame` verbatim on every channel. Returns how many accepted it.
    pub fn write_frame_all(&self, frame: &Frame) -> usize {
        self.broadcast(Outbound::Frame(frame.clone()), None)
    }

    /// Send `frame` verbatim on `channel` only.
    pub fn write_frame_to(&self, channel: &Channel, frame: &Frame) -> Result<()> {
        channel.send(frame.clone())
    }

    /// Send `frame` verbatim on every channel but `channel`. Useful for
    /// routing a received frame onward.
    pub fn write_frame_except(&self, channel: &Channel, frame: &Frame) -> usize {
        self.broadcast(Outbound::Frame(frame.clone()), Some(channel.id()))
    }

    fn broadcast(&self, item: Outbound, skip: Option<u64>) -> usize {
        let mut written = 0;
        for channel in self.shared.snapshot() {
            if Some(channel.id()) == skip {
                continue;
            }
            match channel.send(item.clone()) {
                Ok(()) => written += 1,
                Err(error) => debug!(channel = %channel, %error, "broadcast skipped channel"),
            }
        }
        written
    }

    /// Stop accepting, terminate every channel and wait for all threads.
    ///
    /// Events published while closing are discarded. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.closing.store(true, Ordering::SeqCst);
        self.heartbeat_stop.stop();

        for endpoint in &self.endpoints {
            endpoint.close();
        }
        let threads: Vec<JoinHandle<()>> = lock(&self.threads).drain(..).collect();

        // Accept threads end once their endpoint is closed; after that the
        // channel set can only shrink.
        let channels = loop {
            if threads.iter().all(|t| t.is_finished()) {
                break self.shared.snapshot();
            }
            self.drain_once();
        };
        for channel in &channels {
            channel.terminate();
        }
        while !channels.iter().all(|c| c.is_closed()) {
            self.drain_once();
        }

        for handle in threads {
            if handle.join().is_err() {
                warn!("node thread panicked");
            }
        }
        lock(&self.shared.channels).clear();

        // Last hub handle: the supervisor sees its queue end once every
        // channel dropped its own.
        lock(&self.shared.hub).take();
        if let Some(handle) = lock(&self.supervisor).take() {
            if handle.join().is_err() {
                warn!("supervisor panicked");
            }
        }

        self.drain_remaining();
        info!("node closed");
    }

    // Keep channel readers from blocking on the bus while nobody consumes.
    fn drain_once(&self) {
        match self.events.try_lock() {
            Ok(events) => {
                if let Ok(event) = events.recv_timeout(DRAIN_POLL) {
                    debug!(event = %event, "discarding event during close");
                }
            }
            Err(_) => thread::sleep(DRAIN_POLL),
        }
    }

    fn drain_remaining(&self) {
        if let Ok(events) = self.events.try_lock() {
            while events.try_recv().is_ok() {}
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let endpoints: Vec<String> = self.endpoints.iter().map(|e| e.describe()).collect();
        f.debug_struct("Node")
            .field("endpoints", &endpoints)
            .field("channels", &lock(&self.shared.channels).len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(NodeError::Spawn)
}
