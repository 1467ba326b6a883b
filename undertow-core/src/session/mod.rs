//! Torrent session registry.
//!
//! Sessions are owned by a single actor task. Callers talk to it through a
//! cloneable [`SessionRegistryHandle`]; the actor serializes create and
//! remove per content identifier so concurrent adds converge on one session.

mod actor;
mod commands;
mod handle;

use std::path::Path;
use std::sync::Arc;

pub use actor::spawn_session_registry;
use chrono::{DateTime, Utc};
pub use handle::SessionRegistryHandle;
use serde::Serialize;

use crate::swarm::{
    FileSpan, InfoHash, PieceLayout, SwarmError, SwarmStats, TorrentMetadata, file_spans,
};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm", "m4v", "wmv", "flv", "ts"];
const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "vtt", "ass", "ssa", "sub"];

/// Coarse classification of a file inside a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Video,
    Subtitle,
    Other,
}

impl FileKind {
    /// Infers the kind from a file name's extension.
    pub fn from_name(name: &str) -> Self {
        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext) => FileKind::Video,
            Some(ext) if SUBTITLE_EXTENSIONS.contains(&ext) => FileKind::Subtitle,
            _ => FileKind::Other,
        }
    }
}

/// One file of a session, addressed by its index in the torrent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub index: usize,
    pub name: String,
    pub length: u64,
    pub kind: FileKind,
    /// Base offset within the concatenated torrent data
    #[serde(skip)]
    pub offset: u64,
}

impl FileEntry {
    /// Placement of this file within the torrent's piece layout.
    pub fn span(&self) -> FileSpan {
        FileSpan {
            index: self.index,
            offset: self.offset,
            length: self.length,
        }
    }

    /// MIME type used when serving this file.
    ///
    /// Video files fall back to `video/mp4` when the extension has no
    /// registered video type.
    pub fn content_type(&self) -> String {
        let guess = mime_guess::from_path(&self.name).first();
        match self.kind {
            FileKind::Video => guess
                .filter(|mime| mime.type_() == mime_guess::mime::VIDEO)
                .map(|mime| mime.essence_str().to_string())
                .unwrap_or_else(|| "video/mp4".to_string()),
            FileKind::Subtitle | FileKind::Other => guess
                .map(|mime| mime.essence_str().to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string()),
        }
    }
}

/// One active download, exclusively owned by the registry.
#[derive(Debug, Clone, Serialize)]
pub struct TorrentSession {
    pub info_hash: InfoHash,
    pub name: String,
    pub files: Vec<FileEntry>,
    pub piece_length: u32,
    pub total_length: u64,
    pub added_at: DateTime<Utc>,
}

impl TorrentSession {
    /// Builds a session from resolved metadata, inferring file kinds.
    pub fn from_metadata(metadata: &TorrentMetadata) -> Self {
        let files = metadata
            .files
            .iter()
            .zip(file_spans(&metadata.files))
            .map(|(file, span)| {
                let name = file.display_path();
                FileEntry {
                    index: span.index,
                    kind: FileKind::from_name(file.file_name()),
                    name,
                    length: file.length,
                    offset: span.offset,
                }
            })
            .collect();

        Self {
            info_hash: metadata.info_hash,
            name: metadata.name.clone(),
            files,
            piece_length: metadata.piece_length,
            total_length: metadata.total_length,
            added_at: Utc::now(),
        }
    }

    /// Piece geometry of the session's concatenated data.
    pub fn layout(&self) -> PieceLayout {
        PieceLayout::new(self.piece_length, self.total_length)
    }

    /// Looks up a file by index.
    ///
    /// # Errors
    ///
    /// - `SessionError::FileNotFound` - Index beyond the file list
    pub fn file(&self, file_index: usize) -> Result<&FileEntry, SessionError> {
        self.files
            .get(file_index)
            .ok_or(SessionError::FileNotFound {
                info_hash: self.info_hash,
                file_index,
            })
    }
}

/// Point-in-time view of a session and its transfer counters.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub info_hash: InfoHash,
    pub name: String,
    pub progress: f64,
    pub download_rate: u64,
    pub upload_rate: u64,
    pub peers: u32,
    pub downloaded_bytes: u64,
    pub pieces_available: u32,
    pub piece_count: u32,
    pub added_at: DateTime<Utc>,
    pub files: Vec<FileEntry>,
}

impl SessionStatus {
    pub fn new(session: &TorrentSession, stats: SwarmStats) -> Self {
        Self {
            info_hash: session.info_hash,
            name: session.name.clone(),
            progress: stats.progress(),
            download_rate: stats.download_rate,
            upload_rate: stats.upload_rate,
            peers: stats.peers,
            downloaded_bytes: stats.downloaded_bytes,
            pieces_available: stats.pieces_available,
            piece_count: stats.piece_count,
            added_at: session.added_at,
            files: session.files.clone(),
        }
    }
}

/// Hook notified when a session is torn down so keyed state can be dropped.
pub trait SessionEvictor: Send + Sync {
    fn evict(&self, info_hash: InfoHash);
}

/// Shared, immutable view of a registered session.
pub type SessionRef = Arc<TorrentSession>;

/// Errors from session registry operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid content identifier: {reason}")]
    InvalidIdentifier { reason: String },

    #[error("Session {info_hash} not found")]
    NotFound { info_hash: InfoHash },

    #[error("File {file_index} not found in session {info_hash}")]
    FileNotFound {
        info_hash: InfoHash,
        file_index: usize,
    },

    #[error("Swarm unavailable for {info_hash}: {reason}")]
    SwarmUnavailable { info_hash: InfoHash, reason: String },

    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("Session registry has shut down")]
    RegistryShutdown,
}

impl SessionError {
    /// Maps locator parse failures onto the identifier taxonomy.
    pub fn from_locator_error(error: SwarmError) -> Self {
        match error {
            SwarmError::InvalidInfoHash { .. } | SwarmError::InvalidLocator { .. } => {
                SessionError::InvalidIdentifier {
                    reason: error.to_string(),
                }
            }
            other => SessionError::Swarm(other),
        }
    }
}
