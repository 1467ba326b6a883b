//! Undertow Core - torrent-backed progressive media streaming
//!
//! Turns a swarm download into a seekable byte source: content identifiers
//! and the swarm adapter contract, the session registry, the piece-aware
//! streaming scheduler, range parsing and the subtitle pipeline.

pub mod config;
pub mod session;
pub mod streaming;
pub mod subtitles;
pub mod swarm;
pub mod tracing_setup;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;

pub use config::UndertowConfig;
pub use session::{SessionError, SessionRegistryHandle, TorrentSession, spawn_session_registry};
pub use streaming::{FileStreamer, StreamingError, StreamingScheduler};
pub use subtitles::{ProbeCache, SubtitleError, SubtitleService};
pub use swarm::{ContentLocator, InfoHash, SwarmEngine, SwarmError};

/// Errors that can bubble up from any Undertow subsystem.
#[derive(Debug, thiserror::Error)]
pub enum UndertowError {
    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Streaming error: {0}")]
    Streaming(#[from] StreamingError),

    #[error("Subtitle error: {0}")]
    Subtitle(#[from] SubtitleError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UndertowError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            UndertowError::Session(e) => match e {
                SessionError::InvalidIdentifier { reason } => {
                    format!("Invalid magnet link or info hash: {reason}")
                }
                SessionError::NotFound { info_hash } => format!("Torrent {info_hash} not found"),
                SessionError::FileNotFound { file_index, .. } => {
                    format!("File {file_index} does not exist in this torrent")
                }
                SessionError::SwarmUnavailable { .. } => {
                    "No peers could provide this torrent's metadata".to_string()
                }
                _ => "Torrent session error occurred".to_string(),
            },
            UndertowError::Streaming(StreamingError::DownloadStalled { .. }) => {
                "Download stalled, no peers are supplying data".to_string()
            }
            UndertowError::Streaming(StreamingError::RangeOutOfBounds { .. }) => {
                "Requested range is outside the file".to_string()
            }
            UndertowError::Streaming(_) => "Streaming error occurred".to_string(),
            UndertowError::Subtitle(SubtitleError::UnsupportedFormat { format }) => {
                format!("Subtitle format '{format}' cannot be converted")
            }
            UndertowError::Subtitle(_) => "Subtitle error occurred".to_string(),
            UndertowError::Swarm(_) => "Download engine error occurred".to_string(),
            UndertowError::Configuration { .. } => "Configuration error occurred".to_string(),
            UndertowError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            UndertowError::Configuration { .. }
                | UndertowError::Session(SessionError::InvalidIdentifier { .. })
                | UndertowError::Swarm(SwarmError::InvalidInfoHash { .. })
                | UndertowError::Swarm(SwarmError::InvalidLocator { .. })
                | UndertowError::Subtitle(SubtitleError::UnsupportedFormat { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, UndertowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors() {
        let invalid: UndertowError = SessionError::InvalidIdentifier {
            reason: "bad".to_string(),
        }
        .into();
        assert!(invalid.is_user_error());
        assert!(invalid.user_message().contains("Invalid magnet link"));

        let stalled: UndertowError = StreamingError::DownloadStalled {
            info_hash: InfoHash::new([0; 20]),
            missing: 3,
            waited_secs: 20,
        }
        .into();
        assert!(!stalled.is_user_error());
        assert!(stalled.user_message().contains("stalled"));
    }
}
