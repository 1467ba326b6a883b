//! In-process swarm double for tests.
//!
//! File data is written to disk in full at seed time; availability is only
//! the per-piece bitfield, which tests flip by hand to model arrivals.

use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::watch;

use crate::swarm::{
    ContentLocator, InfoHash, PieceIndex, PiecePriority, PieceState, SwarmEngine, SwarmError,
    SwarmStats, TorrentFile, TorrentMetadata,
};

/// Deterministic, non-repeating-per-piece test payload.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

struct MockTorrent {
    metadata: TorrentMetadata,
    available: Vec<bool>,
    priorities: Vec<PiecePriority>,
    priority_log: Vec<(Range<u32>, PiecePriority)>,
    generation: watch::Sender<u64>,
}

/// Swarm engine double with manual piece completion.
pub struct MockSwarm {
    dir: TempDir,
    known: Mutex<HashMap<InfoHash, TorrentMetadata>>,
    active: Mutex<HashMap<InfoHash, MockTorrent>>,
    removed: Mutex<Vec<InfoHash>>,
    add_calls: AtomicUsize,
    add_delay: Mutex<Duration>,
}

impl Default for MockSwarm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSwarm {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create mock swarm directory"),
            known: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            removed: Mutex::new(Vec::new()),
            add_calls: AtomicUsize::new(0),
            add_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Delays every `add_torrent` call, widening race windows.
    pub fn set_add_delay(&self, delay: Duration) {
        *self.add_delay.lock() = delay;
    }

    /// Makes content resolvable and writes its files to disk.
    ///
    /// Unseeded hashes never resolve.
    pub fn seed(
        &self,
        info_hash: InfoHash,
        name: &str,
        files: &[(&str, &[u8])],
        piece_length: u32,
    ) -> TorrentMetadata {
        let torrent_files: Vec<TorrentFile> = files
            .iter()
            .map(|(path, data)| TorrentFile {
                path: vec![name.to_string(), path.to_string()],
                length: data.len() as u64,
            })
            .collect();

        for (file, (_, data)) in torrent_files.iter().zip(files) {
            let path = self.path_for(info_hash, file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("create mock file directory");
            }
            std::fs::write(&path, data).expect("write mock file");
        }

        let metadata = TorrentMetadata {
            info_hash,
            name: name.to_string(),
            piece_length,
            total_length: torrent_files.iter().map(|f| f.length).sum(),
            files: torrent_files,
        };
        self.known.lock().insert(info_hash, metadata.clone());
        metadata
    }

    /// Marks pieces available and notifies subscribers.
    pub fn complete_pieces(&self, info_hash: InfoHash, pieces: Range<u32>) {
        let mut active = self.active.lock();
        let Some(torrent) = active.get_mut(&info_hash) else {
            return;
        };
        for piece in pieces {
            if let Some(slot) = torrent.available.get_mut(piece as usize) {
                *slot = true;
            }
        }
        torrent.generation.send_modify(|generation| *generation += 1);
    }

    /// Marks every piece available.
    pub fn complete_all(&self, info_hash: InfoHash) {
        let count = self
            .active
            .lock()
            .get(&info_hash)
            .map(|torrent| torrent.available.len() as u32)
            .unwrap_or(0);
        self.complete_pieces(info_hash, 0..count);
    }

    /// Current priority of one piece.
    pub fn priority_of(&self, info_hash: InfoHash, piece: u32) -> PiecePriority {
        self.active
            .lock()
            .get(&info_hash)
            .and_then(|torrent| torrent.priorities.get(piece as usize).copied())
            .unwrap_or_default()
    }

    /// Every `set_priority` call in order.
    pub fn priority_log(&self, info_hash: InfoHash) -> Vec<(Range<u32>, PiecePriority)> {
        self.active
            .lock()
            .get(&info_hash)
            .map(|torrent| torrent.priority_log.clone())
            .unwrap_or_default()
    }

    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    /// Hashes passed to `remove_torrent` that were active.
    pub fn removed(&self) -> Vec<InfoHash> {
        self.removed.lock().clone()
    }

    fn path_for(&self, info_hash: InfoHash, file: &TorrentFile) -> PathBuf {
        file.path
            .iter()
            .fold(self.dir.path().join(info_hash.to_string()), |path, part| {
                path.join(part)
            })
    }

    fn with_torrent<T>(
        &self,
        info_hash: InfoHash,
        f: impl FnOnce(&mut MockTorrent) -> Result<T, SwarmError>,
    ) -> Result<T, SwarmError> {
        let mut active = self.active.lock();
        let torrent = active
            .get_mut(&info_hash)
            .ok_or(SwarmError::TorrentNotFound { info_hash })?;
        f(torrent)
    }
}

#[async_trait]
impl SwarmEngine for MockSwarm {
    async fn add_torrent(&self, locator: &ContentLocator) -> Result<TorrentMetadata, SwarmError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.add_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let known = self.known.lock().get(&locator.info_hash).cloned();
        let Some(metadata) = known else {
            return std::future::pending().await;
        };

        let piece_count = metadata.piece_count() as usize;
        self.active
            .lock()
            .entry(locator.info_hash)
            .or_insert_with(|| MockTorrent {
                metadata: metadata.clone(),
                available: vec![false; piece_count],
                priorities: vec![PiecePriority::Skip; piece_count],
                priority_log: Vec::new(),
                generation: watch::channel(0).0,
            });
        Ok(metadata)
    }

    async fn remove_torrent(&self, info_hash: InfoHash) -> Result<(), SwarmError> {
        self.active
            .lock()
            .remove(&info_hash)
            .ok_or(SwarmError::TorrentNotFound { info_hash })?;
        self.removed.lock().push(info_hash);
        Ok(())
    }

    fn piece_state(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
    ) -> Result<PieceState, SwarmError> {
        self.with_torrent(info_hash, |torrent| {
            let piece_count = torrent.available.len() as u32;
            match torrent.available.get(piece.as_u32() as usize) {
                Some(true) => Ok(PieceState::Available),
                Some(false) => Ok(PieceState::Missing),
                None => Err(SwarmError::PieceOutOfRange {
                    index: piece.as_u32(),
                    piece_count,
                }),
            }
        })
    }

    fn set_priority(
        &self,
        info_hash: InfoHash,
        pieces: Range<u32>,
        priority: PiecePriority,
    ) -> Result<(), SwarmError> {
        self.with_torrent(info_hash, |torrent| {
            for piece in pieces.clone() {
                if let Some(slot) = torrent.priorities.get_mut(piece as usize) {
                    *slot = priority;
                }
            }
            torrent.priority_log.push((pieces, priority));
            Ok(())
        })
    }

    fn subscribe(&self, info_hash: InfoHash) -> Result<watch::Receiver<u64>, SwarmError> {
        self.with_torrent(info_hash, |torrent| Ok(torrent.generation.subscribe()))
    }

    fn file_path(&self, info_hash: InfoHash, file_index: usize) -> Result<PathBuf, SwarmError> {
        let file = self.with_torrent(info_hash, |torrent| {
            let file_count = torrent.metadata.files.len();
            torrent
                .metadata
                .files
                .get(file_index)
                .cloned()
                .ok_or(SwarmError::FileOutOfRange {
                    index: file_index,
                    file_count,
                })
        })?;
        Ok(self.path_for(info_hash, &file))
    }

    fn stats(&self, info_hash: InfoHash) -> Result<SwarmStats, SwarmError> {
        self.with_torrent(info_hash, |torrent| {
            let available = torrent.available.iter().filter(|&&a| a).count() as u32;
            Ok(SwarmStats {
                downloaded_bytes: u64::from(available) * u64::from(torrent.metadata.piece_length),
                pieces_available: available,
                piece_count: torrent.available.len() as u32,
                ..Default::default()
            })
        })
    }
}
