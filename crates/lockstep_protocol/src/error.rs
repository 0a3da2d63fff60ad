//! Protocol error types

use thiserror::Error;

/// Control-channel errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The peer closed the channel. Same-host IPC is assumed reliable, so
    /// this means the other process exited; it is never retried.
    #[error("control channel closed by peer")]
    ChannelClosed,

    /// Transport-level failure
    #[error("control channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message failed to encode or decode
    #[error("control message codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The length prefix exceeds the sanity bound
    #[error("control message of {0} bytes exceeds the size limit")]
    Oversized(u32),
}

/// Result type for channel operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
