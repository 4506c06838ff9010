use crate::event::FrameEvent;

/// Hook run on a channel's reader thread for every valid frame.
///
/// The observer sees the frame before it is published on the event bus,
/// so anything it publishes itself is ordered ahead of the frame event.
/// It may write to the channel; it must not wait on the event bus.
pub trait FrameObserver: Send + Sync {
    fn on_frame(&self, event: &FrameEvent);
}
