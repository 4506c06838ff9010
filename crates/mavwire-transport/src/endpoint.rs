use std::sync::Mutex;

use tracing::debug;

use crate::error::Result;
use crate::stream::RawStream;

/// A source of raw streams.
///
/// An endpoint is a descriptive handle plus a factory: a listening socket
/// yields one stream per accepted connection, a client yields exactly one.
/// Channels keep a shared reference to the endpoint that produced their
/// stream purely for attribution.
pub trait Endpoint: Send + Sync {
    /// Human-readable description, e.g. `tcp-server:0.0.0.0:5760`.
    fn describe(&self) -> String;

    /// Block until the next stream is available.
    ///
    /// Returns the stream together with a diagnostic label for the channel
    /// built on it, or `Ok(None)` once the endpoint is exhausted or closed.
    fn accept(&self) -> Result<Option<(String, RawStream)>>;

    /// Stop producing streams and release a pending [`Endpoint::accept`].
    fn close(&self);
}

/// Endpoint wrapping a single caller-supplied stream.
pub struct CustomEndpoint {
    label: String,
    stream: Mutex<Option<RawStream>>,
}

impl CustomEndpoint {
    /// Create an endpoint that yields `stream` once, labelled `label`.
    pub fn new(label: impl Into<String>, stream: RawStream) -> Self {
        Self {
            label: label.into(),
            stream: Mutex::new(Some(stream)),
        }
    }
}

impl Endpoint for CustomEndpoint {
    fn describe(&self) -> String {
        format!("custom:{}", self.label)
    }

    fn accept(&self) -> Result<Option<(String, RawStream)>> {
        let stream = self
            .stream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        Ok(stream.map(|stream| (self.label.clone(), stream)))
    }

    fn close(&self) {
        let pending = self
            .stream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if pending.is_some() {
            debug!(label = %self.label, "dropping unclaimed custom stream");
        }
    }
}

impl std::fmt::Debug for CustomEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomEndpoint")
            .field("label", &self.label)
            .finish()
    }
}
