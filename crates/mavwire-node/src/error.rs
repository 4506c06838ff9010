use mavwire_frame::FrameError;

/// Errors that can occur in channel and node operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The codec could not be built from the node configuration.
    #[error("codec initialization failed: {0}")]
    CodecInit(FrameError),

    /// The channel has not been started yet.
    #[error("channel {0} not started")]
    NotStarted(String),

    /// The channel was already started once.
    #[error("channel {0} already started")]
    AlreadyStarted(String),

    /// The channel is closing or closed.
    #[error("channel {0} closed")]
    ChannelClosed(String),

    /// The writer accepted the item but writing it to the stream failed.
    #[error("write on channel {channel} failed: {source}")]
    Write { channel: String, source: FrameError },

    /// A worker thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(std::io::Error),

    /// The node configuration is unusable.
    #[error("invalid node configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;
