//! Swarm engine adapter.
//!
//! Defines the narrow capability surface the streaming core needs from a
//! peer-to-peer download engine: resolve a torrent, report per-piece
//! availability, accept piece priority hints and expose where file data is
//! materialized on disk. Wire protocol, DHT and tracker handling live behind
//! this trait and never leak into the scheduler or delivery layers.

pub mod layout;
pub mod magnet;

use std::fmt;
use std::ops::Range;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
pub use layout::{FileSpan, PieceLayout, file_spans};
pub use magnet::ContentLocator;
use serde::{Serialize, Serializer};
use tokio::sync::watch;

/// SHA-1 hash identifying a unique torrent.
///
/// Doubles as the content identifier for sessions, cache entries and URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parses a 40 character hex string.
    ///
    /// # Errors
    ///
    /// - `SwarmError::InvalidInfoHash` - Wrong length or non-hex characters
    pub fn from_hex(value: &str) -> Result<Self, SwarmError> {
        let invalid = || SwarmError::InvalidInfoHash {
            value: value.to_string(),
        };
        if value.len() != 40 {
            return Err(invalid());
        }
        let bytes = hex::decode(value).map_err(|_| invalid())?;
        let hash: [u8; 20] = bytes.try_into().map_err(|_| invalid())?;
        Ok(Self(hash))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for InfoHash {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Zero-based index of a piece within a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Download priority hint for a piece.
///
/// Ordering matters: engines fetch higher priorities first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PiecePriority {
    /// Not selected for download.
    #[default]
    Skip = 0,
    /// Selected, fetched in background order.
    Normal = 1,
    /// Wanted soon, e.g. the container header needed for probing.
    High = 2,
    /// Needed for playback right now.
    Critical = 3,
}

/// Availability of a single piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PieceState {
    Missing,
    InFlight,
    Available,
}

/// Torrent metadata known once the swarm has resolved the info dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentMetadata {
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u32,
    pub total_length: u64,
    pub files: Vec<TorrentFile>,
}

impl TorrentMetadata {
    /// Piece geometry of the concatenated torrent data.
    pub fn layout(&self) -> PieceLayout {
        PieceLayout::new(self.piece_length, self.total_length)
    }

    /// Number of pieces covering the torrent.
    pub fn piece_count(&self) -> u32 {
        self.layout().piece_count()
    }
}

/// Individual file within a torrent.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentFile {
    pub path: Vec<String>,
    pub length: u64,
}

impl TorrentFile {
    /// Relative path joined with `/`.
    pub fn display_path(&self) -> String {
        self.path.join("/")
    }

    /// Final path component.
    pub fn file_name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }
}

/// Transfer counters for one torrent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SwarmStats {
    pub downloaded_bytes: u64,
    pub download_rate: u64,
    pub upload_rate: u64,
    pub peers: u32,
    pub pieces_available: u32,
    pub piece_count: u32,
}

impl SwarmStats {
    /// Completion fraction in `[0.0, 1.0]`.
    pub fn progress(&self) -> f64 {
        if self.piece_count == 0 {
            return 0.0;
        }
        f64::from(self.pieces_available) / f64::from(self.piece_count)
    }
}

/// Errors reported by a swarm engine.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("Invalid info hash: {value}")]
    InvalidInfoHash { value: String },

    #[error("Invalid content locator: {reason}")]
    InvalidLocator { reason: String },

    #[error("Torrent {info_hash} not found")]
    TorrentNotFound { info_hash: InfoHash },

    #[error("Piece {index} out of range ({piece_count} pieces)")]
    PieceOutOfRange { index: u32, piece_count: u32 },

    #[error("File {index} out of range ({file_count} files)")]
    FileOutOfRange { index: usize, file_count: usize },

    #[error("Swarm engine failure: {reason}")]
    Engine { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability surface over a peer-to-peer download engine.
///
/// Priority calls are advisory hints. Concurrent callers may overwrite each
/// other and engines are free to apply them lazily.
#[async_trait]
pub trait SwarmEngine: Send + Sync {
    /// Starts downloading `locator` and suspends until the file list is known.
    ///
    /// Adding a torrent the engine already manages returns its metadata.
    /// The call may suspend indefinitely when no peer can supply metadata;
    /// callers bound it with their own timeout.
    ///
    /// # Errors
    ///
    /// - `SwarmError::Engine` - The engine rejected the torrent
    async fn add_torrent(&self, locator: &ContentLocator) -> Result<TorrentMetadata, SwarmError>;

    /// Stops the download and releases every resource held for it.
    ///
    /// # Errors
    ///
    /// - `SwarmError::TorrentNotFound` - Torrent is not managed
    async fn remove_torrent(&self, info_hash: InfoHash) -> Result<(), SwarmError>;

    /// Reports availability of a single piece.
    ///
    /// # Errors
    ///
    /// - `SwarmError::TorrentNotFound` - Torrent is not managed
    /// - `SwarmError::PieceOutOfRange` - Index beyond the piece count
    fn piece_state(&self, info_hash: InfoHash, piece: PieceIndex)
    -> Result<PieceState, SwarmError>;

    /// Lists the pieces in `pieces` that are not yet available.
    ///
    /// # Errors
    ///
    /// - `SwarmError::TorrentNotFound` - Torrent is not managed
    /// - `SwarmError::PieceOutOfRange` - Range extends beyond the piece count
    fn missing_pieces(
        &self,
        info_hash: InfoHash,
        pieces: Range<u32>,
    ) -> Result<Vec<PieceIndex>, SwarmError> {
        let mut missing = Vec::new();
        for index in pieces {
            let piece = PieceIndex::new(index);
            if self.piece_state(info_hash, piece)? != PieceState::Available {
                missing.push(piece);
            }
        }
        Ok(missing)
    }

    /// Sets the download priority of every piece in `pieces`.
    ///
    /// # Errors
    ///
    /// - `SwarmError::TorrentNotFound` - Torrent is not managed
    fn set_priority(
        &self,
        info_hash: InfoHash,
        pieces: Range<u32>,
        priority: PiecePriority,
    ) -> Result<(), SwarmError>;

    /// Subscribes to piece arrival notifications.
    ///
    /// The value is a generation counter bumped whenever a piece becomes
    /// available; receivers re-check the pieces they wait for on change.
    ///
    /// # Errors
    ///
    /// - `SwarmError::TorrentNotFound` - Torrent is not managed
    fn subscribe(&self, info_hash: InfoHash) -> Result<watch::Receiver<u64>, SwarmError>;

    /// Path where the engine materializes the given file.
    ///
    /// # Errors
    ///
    /// - `SwarmError::TorrentNotFound` - Torrent is not managed
    /// - `SwarmError::FileOutOfRange` - Index beyond the file list
    fn file_path(&self, info_hash: InfoHash, file_index: usize) -> Result<PathBuf, SwarmError>;

    /// Current transfer counters.
    ///
    /// # Errors
    ///
    /// - `SwarmError::TorrentNotFound` - Torrent is not managed
    fn stats(&self, info_hash: InfoHash) -> Result<SwarmStats, SwarmError>;
}
