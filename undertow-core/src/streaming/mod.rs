//! Progressive streaming over partially downloaded torrents.
//!
//! The scheduler turns byte ranges into piece priorities and availability
//! waits; the streamer reads gated chunks from disk for HTTP bodies.

pub mod range;
pub mod reader;
pub mod scheduler;

pub use range::{ByteRange, RangeError, parse_range_header};
pub use reader::{FileStreamer, ReadMode};
pub use scheduler::StreamingScheduler;

use crate::session::SessionError;
use crate::swarm::{InfoHash, SwarmError};

/// Errors raised while guaranteeing or reading byte ranges.
#[derive(Debug, thiserror::Error)]
pub enum StreamingError {
    #[error("File {file_index} not found in session {info_hash}")]
    FileNotFound {
        info_hash: InfoHash,
        file_index: usize,
    },

    #[error("Range {start}..{end} outside file of {length} bytes")]
    RangeOutOfBounds { start: u64, end: u64, length: u64 },

    #[error("Download stalled for {info_hash}: {missing} pieces missing after {waited_secs}s")]
    DownloadStalled {
        info_hash: InfoHash,
        missing: usize,
        waited_secs: u64,
    },

    #[error("Session {info_hash} closed while waiting for data")]
    SessionClosed { info_hash: InfoHash },

    #[error("Session error: {reason}")]
    Session { reason: String },

    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SessionError> for StreamingError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::FileNotFound {
                info_hash,
                file_index,
            } => StreamingError::FileNotFound {
                info_hash,
                file_index,
            },
            SessionError::NotFound { info_hash } => StreamingError::SessionClosed { info_hash },
            SessionError::Swarm(e) => StreamingError::Swarm(e),
            other => StreamingError::Session {
                reason: other.to_string(),
            },
        }
    }
}
