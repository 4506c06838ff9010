//! One bidirectional link: a reader thread, a writer thread and the
//! orchestrator that owns their shutdown.
//!
//! Lifecycle:
//!
//! ```text
//! Idle --start--> Running --reader exits / terminate--> Closing --> Closed
//! ```
//!
//! Shutdown takes one of two paths, decided by whichever trigger reaches the
//! orchestrator first:
//!
//! - **Peer closed** (the reader hit EOF or an I/O error): publish
//!   `ChannelClose`, report to the hub, wait for the hub's terminate as an
//!   acknowledgment, stop the writer, close the stream.
//! - **Terminated** (the hub or the owner asked): publish `ChannelClose`,
//!   stop the writer, close the stream to release the reader, join it,
//!   then report the closed channel to the hub.
//!
//! Either way `ChannelClose` is published once, the stream is closed once
//! and both worker threads are joined before the channel reports `Closed`.

use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mavwire_frame::{CodecConfig, Frame, FrameError, FrameReader, FrameWriter, Message};
use mavwire_transport::{Endpoint, RawStream, StreamCloser};
use tracing::{debug, info, warn};

use crate::error::{NodeError, Result};
use crate::event::{Event, FrameEvent};
use crate::observer::FrameObserver;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

type BoxedReader = FrameReader<Box<dyn Read + Send>>;
type BoxedWriter = FrameWriter<Box<dyn Write + Send>>;

/// Lifecycle state of a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created, workers not running.
    Idle,
    /// Reading and writing.
    Running,
    /// Shutdown in progress; writes are refused.
    Closing,
    /// All workers joined and the stream closed.
    Closed,
}

/// Item accepted by [`Channel::send`].
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Wrapped in a new frame by the channel's writer.
    Message(Message),
    /// Written verbatim.
    Frame(Frame),
}

impl From<Message> for Outbound {
    fn from(message: Message) -> Self {
        Outbound::Message(message)
    }
}

impl From<Frame> for Outbound {
    fn from(frame: Frame) -> Self {
        Outbound::Frame(frame)
    }
}

/// What a channel needs from the hub that owns it.
///
/// Cloned into every channel. A channel that ends on its own sends itself
/// on `closed_reports` and then waits for [`Channel::terminate`]. A channel
/// closed by [`Channel::terminate`] sends itself once it is `Closed`.
#[derive(Clone)]
pub struct HubContext {
    codec: CodecConfig,
    events: SyncSender<Event>,
    closed_reports: Sender<Arc<Channel>>,
    observer: Option<Arc<dyn FrameObserver>>,
}

impl HubContext {
    pub fn new(
        codec: CodecConfig,
        events: SyncSender<Event>,
        closed_reports: Sender<Arc<Channel>>,
    ) -> Self {
        Self {
            codec,
            events,
            closed_reports,
            observer: None,
        }
    }

    /// Run `observer` on every valid frame before it is published.
    pub fn with_observer(mut self, observer: Arc<dyn FrameObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn codec(&self) -> &CodecConfig {
        &self.codec
    }
}

impl fmt::Debug for HubContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubContext")
            .field("codec", &self.codec)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

enum Trigger {
    ReaderOpened,
    ReaderDone,
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    PeerClosed,
    Terminated,
}

struct Envelope {
    item: Outbound,
    reply: SyncSender<std::result::Result<(), FrameError>>,
}

// Everything the workers own once the channel is started.
struct ChannelIo {
    reader: BoxedReader,
    writer: BoxedWriter,
    closer: Box<dyn StreamCloser>,
    outbound: Receiver<Envelope>,
    triggers: Receiver<Trigger>,
}

struct Workers {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    closer: Box<dyn StreamCloser>,
}

/// A bidirectional link over one raw stream.
pub struct Channel {
    id: u64,
    label: String,
    endpoint: Arc<dyn Endpoint>,
    observer: Option<Arc<dyn FrameObserver>>,

    // Publishing gate: `None` once `ChannelClose` is out.
    publisher: Mutex<Option<SyncSender<Event>>>,
    // Taken when the channel reports itself to the hub, or at close.
    closed_reports: Mutex<Option<Sender<Arc<Channel>>>>,
    // Rendezvous queue to the writer: `None` once closed.
    outbound: Mutex<Option<SyncSender<Envelope>>>,
    triggers: Sender<Trigger>,
    terminate_requested: AtomicBool,

    io: Mutex<Option<ChannelIo>>,
    state: Mutex<ChannelState>,
    state_changed: Condvar,
}

impl Channel {
    /// Bind a codec to `stream` and create an idle channel.
    ///
    /// Every channel signs with its own random link id.
    pub fn new(
        hub: &HubContext,
        endpoint: Arc<dyn Endpoint>,
        label: impl Into<String>,
        stream: RawStream,
    ) -> Result<Arc<Self>> {
        let label = label.into();
        let mut codec = hub.codec.clone();
        codec.out_signature_link_id = rand::random::<u8>();

        let (read_half, write_half, closer) = stream.into_parts();
        let (reader, writer) = match codec.build(read_half, write_half) {
            Ok(pair) => pair,
            Err(err) => {
                close_stream(&label, closer);
                return Err(NodeError::CodecInit(err));
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::sync_channel(0);
        let (trigger_tx, trigger_rx) = mpsc::channel();

        Ok(Arc::new(Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            label,
            endpoint,
            observer: hub.observer.clone(),
            publisher: Mutex::new(Some(hub.events.clone())),
            closed_reports: Mutex::new(Some(hub.closed_reports.clone())),
            outbound: Mutex::new(Some(outbound_tx)),
            triggers: trigger_tx,
            terminate_requested: AtomicBool::new(false),
            io: Mutex::new(Some(ChannelIo {
                reader,
                writer,
                closer,
                outbound: outbound_rx,
                triggers: trigger_rx,
            })),
            state: Mutex::new(ChannelState::Idle),
            state_changed: Condvar::new(),
        }))
    }

    /// Process-unique channel id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Diagnostic label, e.g. `tcp:127.0.0.1:50122`.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Endpoint that produced this channel's stream.
    pub fn endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.endpoint
    }

    pub fn state(&self) -> ChannelState {
        *lock(&self.state)
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ChannelState::Closed
    }

    /// Spawn the orchestrator, which starts the reader and writer.
    ///
    /// Returns immediately; `ChannelOpen` is published once the writer is
    /// accepting.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let io = {
            let mut state = lock(&self.state);
            if *state != ChannelState::Idle {
                return Err(NodeError::AlreadyStarted(self.label.clone()));
            }
            let Some(io) = lock(&self.io).take() else {
                return Err(NodeError::AlreadyStarted(self.label.clone()));
            };
            *state = ChannelState::Running;
            io
        };

        let this = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("mavwire-ch{}", self.id))
            .spawn(move || this.run(io));
        if let Err(err) = spawned {
            // The closure, and with it the stream, was dropped.
            self.close_outbound();
            self.finish();
            return Err(NodeError::Spawn(err));
        }

        debug!(channel = %self.label, id = self.id, "channel started");
        Ok(())
    }

    /// Ask the channel to shut down. Idempotent, never blocks.
    ///
    /// For a channel that reported itself closed this is the hub's
    /// acknowledgment. A channel that was never started is closed in place.
    pub fn terminate(&self) {
        if self.terminate_requested.swap(true, Ordering::SeqCst) {
            return;
        }

        let idle_io = {
            let state = lock(&self.state);
            if *state == ChannelState::Idle {
                lock(&self.io).take()
            } else {
                None
            }
        };
        if let Some(io) = idle_io {
            close_stream(&self.label, io.closer);
            self.close_outbound();
            self.finish();
            return;
        }

        let _ = self.triggers.send(Trigger::Terminate);
    }

    /// Queue `item` for the writer and wait until it is written.
    ///
    /// Blocks while the writer is busy with earlier items.
    pub fn send(&self, item: impl Into<Outbound>) -> Result<()> {
        let queue = {
            if self.state() == ChannelState::Idle {
                return Err(NodeError::NotStarted(self.label.clone()));
            }
            lock(&self.outbound)
                .clone()
                .ok_or_else(|| NodeError::ChannelClosed(self.label.clone()))?
        };

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let envelope = Envelope {
            item: item.into(),
            reply: reply_tx,
        };
        queue
            .send(envelope)
            .map_err(|_| NodeError::ChannelClosed(self.label.clone()))?;
        drop(queue);

        match reply_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(NodeError::Write {
                channel: self.label.clone(),
                source,
            }),
            Err(_) => Err(NodeError::ChannelClosed(self.label.clone())),
        }
    }

    /// Block until the channel is `Closed`.
    pub fn wait_closed(&self) {
        let mut state = lock(&self.state);
        while *state != ChannelState::Closed {
            state = self
                .state_changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Block until the channel is `Closed` or `timeout` elapses.
    ///
    /// Returns `true` if the channel closed in time.
    pub fn wait_closed_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        while *state != ChannelState::Closed {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .state_changed
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        true
    }

    /// Publish on the event bus unless `ChannelClose` already went out.
    pub(crate) fn publish(&self, event: Event) {
        let publisher = lock(&self.publisher);
        match publisher.as_ref() {
            Some(bus) => {
                if bus.send(event).is_err() {
                    debug!(channel = %self.label, "event bus gone, event dropped");
                }
            }
            None => {
                debug!(channel = %self.label, event = event.name(), "channel closing, event dropped");
            }
        }
    }

    fn publish_close(self: &Arc<Self>) {
        let bus = lock(&self.publisher).take();
        if let Some(bus) = bus {
            let _ = bus.send(Event::ChannelClose {
                channel: Arc::clone(self),
            });
        }
    }

    fn close_outbound(&self) {
        lock(&self.outbound).take();
    }

    fn set_state(&self, next: ChannelState) {
        *lock(&self.state) = next;
        self.state_changed.notify_all();
    }

    fn finish(&self) {
        lock(&self.closed_reports).take();
        lock(&self.publisher).take();
        self.set_state(ChannelState::Closed);
    }

    fn run(self: Arc<Self>, io: ChannelIo) {
        let ChannelIo {
            reader,
            writer,
            closer,
            outbound,
            triggers,
        } = io;

        let Some(workers) = self.spawn_workers(reader, writer, closer, outbound) else {
            self.close_outbound();
            self.finish();
            return;
        };

        let shutdown = self.wait_for_shutdown(&triggers);
        self.set_state(ChannelState::Closing);
        let completion = match shutdown {
            Shutdown::PeerClosed => {
                self.close_after_peer(workers, &triggers);
                None
            }
            Shutdown::Terminated => {
                self.close_on_request(workers);
                lock(&self.closed_reports).take()
            }
        };
        self.finish();
        info!(channel = %self.label, ?shutdown, "channel closed");

        // Terminated channels tell the hub once they are `Closed`; the hub's
        // acknowledging terminate is then a no-op.
        if let Some(hub) = completion {
            let _ = hub.send(Arc::clone(&self));
        }
    }

    fn spawn_workers(
        self: &Arc<Self>,
        reader: BoxedReader,
        writer: BoxedWriter,
        closer: Box<dyn StreamCloser>,
        outbound: Receiver<Envelope>,
    ) -> Option<Workers> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<()>(1);

        let this = Arc::clone(self);
        let writer = match thread::Builder::new()
            .name(format!("mavwire-ch{}-writer", self.id))
            .spawn(move || this.write_loop(writer, outbound, ready_tx))
        {
            Ok(handle) => handle,
            Err(err) => {
                warn!(channel = %self.label, error = %err, "failed to spawn writer");
                close_stream(&self.label, closer);
                return None;
            }
        };

        let this = Arc::clone(self);
        let reader = match thread::Builder::new()
            .name(format!("mavwire-ch{}-reader", self.id))
            .spawn(move || {
                this.read_loop(reader, ready_rx);
                let _ = this.triggers.send(Trigger::ReaderDone);
            }) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(channel = %self.label, error = %err, "failed to spawn reader");
                self.close_outbound();
                join(&self.label, "writer", writer);
                close_stream(&self.label, closer);
                return None;
            }
        };

        Some(Workers {
            reader,
            writer,
            closer,
        })
    }

    // A terminate that arrives before the reader published `ChannelOpen`
    // is held back, so the close event never overtakes the open event.
    fn wait_for_shutdown(&self, triggers: &Receiver<Trigger>) -> Shutdown {
        let mut opened = false;
        let mut terminate_pending = false;
        loop {
            match triggers.recv() {
                Ok(Trigger::ReaderOpened) => opened = true,
                Ok(Trigger::ReaderDone) if terminate_pending => return Shutdown::Terminated,
                Ok(Trigger::ReaderDone) => return Shutdown::PeerClosed,
                Ok(Trigger::Terminate) => terminate_pending = true,
                Err(_) => return Shutdown::Terminated,
            }
            if opened && terminate_pending {
                return Shutdown::Terminated;
            }
        }
    }

    fn close_after_peer(self: &Arc<Self>, workers: Workers, triggers: &Receiver<Trigger>) {
        self.publish_close();

        let report = lock(&self.closed_reports).take();
        let reported = report.is_some_and(|hub| hub.send(Arc::clone(self)).is_ok());
        if reported {
            // The hub's acknowledgment.
            while let Ok(trigger) = triggers.recv() {
                if matches!(trigger, Trigger::Terminate) {
                    break;
                }
            }
        } else {
            debug!(channel = %self.label, "no hub to report to");
        }

        self.close_outbound();
        join(&self.label, "writer", workers.writer);
        close_stream(&self.label, workers.closer);
        join(&self.label, "reader", workers.reader);
    }

    fn close_on_request(self: &Arc<Self>, workers: Workers) {
        self.publish_close();
        self.close_outbound();
        join(&self.label, "writer", workers.writer);
        close_stream(&self.label, workers.closer);
        join(&self.label, "reader", workers.reader);
    }

    fn read_loop(self: &Arc<Self>, mut reader: BoxedReader, ready: Receiver<()>) {
        // Writes sent in reaction to `ChannelOpen` must find the writer listening.
        if ready.recv().is_err() {
            return;
        }
        self.publish(Event::ChannelOpen {
            channel: Arc::clone(self),
        });
        let _ = self.triggers.send(Trigger::ReaderOpened);

        loop {
            match reader.read_frame() {
                Ok(frame) => {
                    let event = FrameEvent {
                        frame,
                        channel: Arc::clone(self),
                    };
                    if let Some(observer) = &self.observer {
                        observer.on_frame(&event);
                    }
                    self.publish(Event::Frame(event));
                }
                Err(error) if error.is_recoverable() => {
                    debug!(channel = %self.label, %error, "dropping invalid frame");
                    self.publish(Event::ParseError {
                        error,
                        channel: Arc::clone(self),
                    });
                }
                Err(error) => {
                    debug!(channel = %self.label, %error, "reader stopped");
                    return;
                }
            }
        }
    }

    fn write_loop(
        &self,
        mut writer: BoxedWriter,
        outbound: Receiver<Envelope>,
        ready: SyncSender<()>,
    ) {
        let _ = ready.send(());
        drop(ready);

        for envelope in outbound.iter() {
            let result = match &envelope.item {
                Outbound::Message(message) => writer.write_message(message),
                Outbound::Frame(frame) => writer.write_frame(frame),
            };
            if let Err(error) = &result {
                warn!(channel = %self.label, %error, "write failed");
            }
            let _ = envelope.reply.send(result);
        }
        debug!(channel = %self.label, "writer stopped");
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("endpoint", &self.endpoint.describe())
            .field("state", &self.state())
            .finish()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn close_stream(label: &str, closer: Box<dyn StreamCloser>) {
    if let Err(error) = closer.close() {
        debug!(channel = %label, %error, "stream close failed");
    }
}

fn join(label: &str, role: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!(channel = %label, role, "worker thread panicked");
    }
}
