/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Bytes that do not start a frame were skipped.
    #[error("invalid magic byte, skipped {skipped} bytes")]
    InvalidMagic { skipped: usize },

    /// The frame checksum does not match its content.
    #[error("wrong checksum for message {id} (expected {expected:#06x}, got {actual:#06x})")]
    Checksum { id: u32, expected: u16, actual: u16 },

    /// The message id is not part of the dialect.
    #[error("message {0} is not in the dialect")]
    UnknownMessage(u32),

    /// A signed frame was required but an unsigned one arrived.
    #[error("signature missing")]
    SignatureMissing,

    /// The frame signature does not match the configured key.
    #[error("wrong signature")]
    SignatureMismatch,

    /// The frame carries incompatibility flags this codec does not understand.
    #[error("unsupported incompatibility flags {0:#04x}")]
    UnsupportedIncompatFlags(u8),

    /// The payload does not fit in a frame.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A v1 frame cannot carry a message id above 255.
    #[error("message id {0} does not fit in the frame version")]
    MessageIdOutOfRange(u32),

    /// A message payload is shorter than its layout requires.
    #[error("payload of message {id} too short ({len} bytes, need {need})")]
    PayloadTooShort { id: u32, len: usize, need: usize },

    /// The codec configuration is unusable.
    #[error("invalid codec configuration: {0}")]
    InvalidConfig(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether the error concerns a single corrupt frame.
    ///
    /// Recoverable errors leave the stream usable: the offending bytes have
    /// been consumed and the next read resumes at the following frame.
    /// Everything else means the stream or the configuration is unusable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidMagic { .. }
                | FrameError::Checksum { .. }
                | FrameError::UnknownMessage(_)
                | FrameError::SignatureMissing
                | FrameError::SignatureMismatch
                | FrameError::UnsupportedIncompatFlags(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
