//! Error types for the worker.
//!
//! Three layers, innermost first:
//! - [`EncodeError`]: a value could not be turned into a transport-safe form.
//! - [`ChannelError`]: the message channel failed (or ended).
//! - [`WorkerError`]: anything that stops the run loop.

use thiserror::Error;

/// A value could not be converted to primitive wire data.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("value is not transport-encodable: {0}")]
    Unencodable(#[from] serde_json::Error),

    #[error("expected a mapping, got {kind}")]
    NotAMapping { kind: &'static str },
}

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Remote end closed the stream. A normal way for a session to end.
    #[error("channel closed by remote end")]
    EndOfStream,

    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode outgoing message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ChannelError {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The host's own report serialization produced something unencodable.
    #[error("failed to serialize report for `{nodeid}`: {source}")]
    Report {
        nodeid: String,
        #[source]
        source: EncodeError,
    },

    #[error("item index {index} out of range for a plan of {len} items")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("report for `{reported}` arrived while `{expected}` (index {index}) was running")]
    CorrelationMismatch {
        index: usize,
        expected: String,
        reported: String,
    },

    #[error("test report received while no item is running")]
    NoCurrentItem,

    #[error("run loop entered before collection finished")]
    NotCollected,

    /// Reading the next command failed; the outbound side may still work.
    #[error("failed to receive command: {0}")]
    Receive(#[source] ChannelError),
}
