//! Simulated swarm engine.
//!
//! Supplies seeded content piece by piece at a configurable rate. Each
//! active torrent runs a delivery task that picks the most urgent missing
//! piece, reads it from the seed source, verifies its hash and writes it
//! into sparse files under the download directory, exactly where a real
//! engine would materialize it.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use undertow_core::config::SimulationConfig;
use undertow_core::swarm::{
    ContentLocator, InfoHash, PieceIndex, PiecePriority, PieceState, SwarmEngine, SwarmError,
    SwarmStats, TorrentFile, TorrentMetadata, file_spans,
};

use crate::SimulationError;
use crate::content::{ContentCreator, SeededContent, is_hidden};

/// Swarm engine backed by locally seeded content.
///
/// Cheap to clone; clones share the same torrents.
#[derive(Clone)]
pub struct SimulatedSwarm {
    state: Arc<SimState>,
}

struct SimState {
    config: SimulationConfig,
    download_dir: PathBuf,
    library: RwLock<HashMap<InfoHash, Arc<SeededContent>>>,
    torrents: RwLock<HashMap<InfoHash, Arc<ActiveTorrent>>>,
}

impl Drop for SimState {
    fn drop(&mut self) {
        for torrent in self.torrents.get_mut().values() {
            torrent.stop();
        }
    }
}

struct ActiveTorrent {
    content: Arc<SeededContent>,
    root: PathBuf,
    book: Mutex<PieceBook>,
    generation: watch::Sender<u64>,
    paused: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Per-piece bookkeeping of one torrent.
struct PieceBook {
    states: Vec<PieceState>,
    priorities: Vec<PiecePriority>,
    available: u32,
    downloaded_bytes: u64,
    download_rate: u64,
    upload_rate: u64,
}

impl PieceBook {
    fn new(piece_count: u32) -> Self {
        Self {
            states: vec![PieceState::Missing; piece_count as usize],
            priorities: vec![PiecePriority::Skip; piece_count as usize],
            available: 0,
            downloaded_bytes: 0,
            download_rate: 0,
            upload_rate: 0,
        }
    }

    fn piece_count(&self) -> u32 {
        self.states.len() as u32
    }

    fn is_complete(&self) -> bool {
        self.available == self.piece_count()
    }

    /// Claims the most urgent wanted piece, lowest index first on ties.
    fn claim_next(&mut self) -> Option<u32> {
        let mut best: Option<(PiecePriority, usize)> = None;
        for (index, (state, priority)) in self.states.iter().zip(&self.priorities).enumerate() {
            if *state != PieceState::Missing || *priority == PiecePriority::Skip {
                continue;
            }
            if best.is_none_or(|(best_priority, _)| *priority > best_priority) {
                best = Some((*priority, index));
            }
        }
        let (_, index) = best?;
        self.states[index] = PieceState::InFlight;
        Some(index as u32)
    }

    fn release(&mut self, piece: u32) {
        if let Some(state) = self.states.get_mut(piece as usize)
            && *state == PieceState::InFlight
        {
            *state = PieceState::Missing;
        }
    }

    fn complete(&mut self, piece: u32, length: u64) {
        if let Some(state) = self.states.get_mut(piece as usize)
            && *state != PieceState::Available
        {
            *state = PieceState::Available;
            self.available += 1;
            self.downloaded_bytes += length;
        }
    }

    /// Exponentially smoothed rates from the bytes moved in one tick.
    fn record_tick(&mut self, delivered: u64, tick: Duration, peers: u32) {
        let instant = (delivered as f64 / tick.as_secs_f64()) as u64;
        self.download_rate = (self.download_rate * 3 + instant) / 4;
        // Peers request already-verified pieces back at a fraction of our rate
        let uploading = if peers == 0 { 0 } else { instant / 8 };
        self.upload_rate = (self.upload_rate * 3 + uploading) / 4;
    }
}

impl ActiveTorrent {
    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    fn file_path(&self, file: &TorrentFile) -> PathBuf {
        file.path.iter().fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Fetches, verifies and stores one claimed piece.
    async fn deliver(&self, piece: u32) -> Result<u64, SimulationError> {
        let data = self.content.read_piece(piece).await?;
        if !self.content.verify_piece(piece, &data) {
            return Err(SimulationError::InvalidContent {
                reason: format!("piece {piece} failed hash verification"),
            });
        }

        let metadata = self.content.metadata();
        let bounds = metadata.layout().piece_bounds(piece);
        for span in file_spans(&metadata.files) {
            let Some(local) = span.intersect(&bounds) else {
                continue;
            };
            let start = (span.offset + local.start - bounds.start) as usize;
            let end = (span.offset + local.end - bounds.start) as usize;

            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .open(self.file_path(&metadata.files[span.index]))
                .await?;
            file.seek(SeekFrom::Start(local.start)).await?;
            file.write_all(&data[start..end]).await?;
            file.flush().await?;
        }

        let length = data.len() as u64;
        self.book.lock().complete(piece, length);
        self.generation.send_modify(|generation| *generation += 1);
        Ok(length)
    }
}

impl SimulatedSwarm {
    /// Creates an empty swarm that materializes files below `download_dir`.
    pub fn new(config: SimulationConfig, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::new(SimState {
                config,
                download_dir: download_dir.into(),
                library: RwLock::new(HashMap::new()),
                torrents: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Makes content available to the swarm and returns its locator.
    pub fn seed(&self, content: SeededContent) -> ContentLocator {
        let locator = ContentLocator {
            info_hash: content.info_hash(),
            display_name: Some(content.metadata().name.clone()),
            trackers: Vec::new(),
        };
        tracing::info!(
            info_hash = %locator.info_hash,
            name = %content.metadata().name,
            "Seeded simulated torrent"
        );
        self.state
            .library
            .write()
            .insert(locator.info_hash, Arc::new(content));
        locator
    }

    /// Seeds one torrent per top-level entry of `library_dir`.
    ///
    /// Entries that cannot be seeded, such as empty files, are skipped with
    /// a warning.
    ///
    /// # Errors
    /// - `SimulationError::Io` - Library directory unreadable
    pub async fn seed_library(
        &self,
        library_dir: &Path,
        creator: &ContentCreator,
    ) -> Result<Vec<ContentLocator>, SimulationError> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(library_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| !is_hidden(name))
            {
                entries.push(path);
            }
        }
        entries.sort();

        let mut locators = Vec::new();
        for path in entries {
            match creator.from_path(&path).await {
                Ok(content) => locators.push(self.seed(content)),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping library entry"),
            }
        }
        Ok(locators)
    }

    /// Stops or resumes delivery for one torrent.
    ///
    /// # Errors
    /// - `SwarmError::TorrentNotFound` - Torrent is not active
    pub fn set_paused(&self, info_hash: InfoHash, paused: bool) -> Result<(), SwarmError> {
        self.torrent(info_hash)?.paused.store(paused, Ordering::SeqCst);
        tracing::debug!(%info_hash, paused, "Simulated delivery toggled");
        Ok(())
    }

    /// Number of torrents currently downloading or complete.
    pub fn active_count(&self) -> usize {
        self.state.torrents.read().len()
    }

    fn torrent(&self, info_hash: InfoHash) -> Result<Arc<ActiveTorrent>, SwarmError> {
        self.state
            .torrents
            .read()
            .get(&info_hash)
            .cloned()
            .ok_or(SwarmError::TorrentNotFound { info_hash })
    }

    fn delivery_seed(&self, info_hash: InfoHash) -> u64 {
        match self.state.config.seed {
            Some(seed) => {
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&info_hash.as_bytes()[..8]);
                seed ^ u64::from_le_bytes(prefix)
            }
            None => rand::random(),
        }
    }
}

/// Creates every file of the torrent at full length without writing data.
async fn allocate_files(root: &Path, files: &[TorrentFile]) -> Result<(), SwarmError> {
    for file in files {
        let path = file.path.iter().fold(root.to_path_buf(), |path, part| path.join(part));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let handle = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .await?;
        handle.set_len(file.length).await?;
    }
    Ok(())
}

/// Delivers pieces of one torrent until it is complete or aborted.
async fn delivery_loop(torrent: Arc<ActiveTorrent>, config: SimulationConfig, seed: u64) {
    let info_hash = torrent.content.info_hash();
    let tick = config.tick_interval.max(Duration::from_millis(1));
    let per_tick = (config.download_speed as f64 * tick.as_secs_f64()) as u64;
    let burst_limit = per_tick + u64::from(torrent.content.metadata().piece_length);
    let layout = torrent.content.metadata().layout();

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut allowance = 0u64;

    loop {
        ticker.tick().await;

        if config.peers == 0 || torrent.paused.load(Ordering::SeqCst) {
            allowance = 0;
            torrent.book.lock().record_tick(0, tick, 0);
            continue;
        }

        // Throughput wobbles by up to 20% either way
        let jitter: f64 = rng.random_range(0.8..1.2);
        allowance = (allowance + (per_tick as f64 * jitter) as u64).min(burst_limit);

        let mut delivered = 0u64;
        loop {
            let claimed = torrent.book.lock().claim_next();
            let Some(piece) = claimed else {
                break;
            };
            let bounds = layout.piece_bounds(piece);
            let size = bounds.end - bounds.start;
            if allowance < size {
                torrent.book.lock().release(piece);
                break;
            }
            match torrent.deliver(piece).await {
                Ok(length) => {
                    allowance -= size;
                    delivered += length;
                }
                Err(e) => {
                    tracing::warn!(%info_hash, piece, error = %e, "Simulated piece delivery failed");
                    torrent.book.lock().release(piece);
                    break;
                }
            }
        }

        let complete = {
            let mut book = torrent.book.lock();
            book.record_tick(delivered, tick, config.peers);
            book.is_complete()
        };
        if complete {
            let mut book = torrent.book.lock();
            book.download_rate = 0;
            book.upload_rate = 0;
            tracing::info!(%info_hash, "Simulated download complete");
            return;
        }
    }
}

#[async_trait]
impl SwarmEngine for SimulatedSwarm {
    async fn add_torrent(&self, locator: &ContentLocator) -> Result<TorrentMetadata, SwarmError> {
        let info_hash = locator.info_hash;
        let existing = self
            .state
            .torrents
            .read()
            .get(&info_hash)
            .map(|torrent| torrent.content.metadata().clone());
        if let Some(metadata) = existing {
            return Ok(metadata);
        }

        let content = self.state.library.read().get(&info_hash).cloned();
        let Some(content) = content else {
            tracing::debug!(%info_hash, "No simulated peer has this torrent");
            return std::future::pending().await;
        };

        let delay = self.state.config.metadata_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let root = self.state.download_dir.join(info_hash.to_string());
        allocate_files(&root, &content.metadata().files).await?;

        let metadata = content.metadata().clone();
        let torrent = Arc::new(ActiveTorrent {
            book: Mutex::new(PieceBook::new(metadata.piece_count())),
            content,
            root,
            generation: watch::channel(0).0,
            paused: AtomicBool::new(false),
            task: Mutex::new(None),
        });

        {
            let mut torrents = self.state.torrents.write();
            if torrents.contains_key(&info_hash) {
                return Ok(metadata);
            }
            torrents.insert(info_hash, Arc::clone(&torrent));
        }

        let task = tokio::spawn(delivery_loop(
            Arc::clone(&torrent),
            self.state.config.clone(),
            self.delivery_seed(info_hash),
        ));
        *torrent.task.lock() = Some(task);

        tracing::info!(
            %info_hash,
            name = %metadata.name,
            pieces = metadata.piece_count(),
            "Simulated torrent started"
        );
        Ok(metadata)
    }

    async fn remove_torrent(&self, info_hash: InfoHash) -> Result<(), SwarmError> {
        let torrent = self
            .state
            .torrents
            .write()
            .remove(&info_hash)
            .ok_or(SwarmError::TorrentNotFound { info_hash })?;
        torrent.stop();

        if let Err(e) = tokio::fs::remove_dir_all(&torrent.root).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(%info_hash, error = %e, "Failed to delete simulated download");
        }
        tracing::info!(%info_hash, "Simulated torrent removed");
        Ok(())
    }

    fn piece_state(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
    ) -> Result<PieceState, SwarmError> {
        let torrent = self.torrent(info_hash)?;
        let book = torrent.book.lock();
        book.states
            .get(piece.as_u32() as usize)
            .copied()
            .ok_or(SwarmError::PieceOutOfRange {
                index: piece.as_u32(),
                piece_count: book.piece_count(),
            })
    }

    fn missing_pieces(
        &self,
        info_hash: InfoHash,
        pieces: Range<u32>,
    ) -> Result<Vec<PieceIndex>, SwarmError> {
        let torrent = self.torrent(info_hash)?;
        let book = torrent.book.lock();
        if pieces.end > book.piece_count() {
            return Err(SwarmError::PieceOutOfRange {
                index: pieces.end.saturating_sub(1),
                piece_count: book.piece_count(),
            });
        }
        Ok(pieces
            .filter(|index| book.states[*index as usize] != PieceState::Available)
            .map(PieceIndex::new)
            .collect())
    }

    fn set_priority(
        &self,
        info_hash: InfoHash,
        pieces: Range<u32>,
        priority: PiecePriority,
    ) -> Result<(), SwarmError> {
        let torrent = self.torrent(info_hash)?;
        let mut book = torrent.book.lock();
        let end = pieces.end.min(book.piece_count());
        for index in pieces.start.min(end)..end {
            book.priorities[index as usize] = priority;
        }
        Ok(())
    }

    fn subscribe(&self, info_hash: InfoHash) -> Result<watch::Receiver<u64>, SwarmError> {
        Ok(self.torrent(info_hash)?.generation.subscribe())
    }

    fn file_path(&self, info_hash: InfoHash, file_index: usize) -> Result<PathBuf, SwarmError> {
        let torrent = self.torrent(info_hash)?;
        let files = &torrent.content.metadata().files;
        files
            .get(file_index)
            .map(|file| torrent.file_path(file))
            .ok_or(SwarmError::FileOutOfRange {
                index: file_index,
                file_count: files.len(),
            })
    }

    fn stats(&self, info_hash: InfoHash) -> Result<SwarmStats, SwarmError> {
        let torrent = self.torrent(info_hash)?;
        let paused = torrent.paused.load(Ordering::SeqCst);
        let book = torrent.book.lock();
        Ok(SwarmStats {
            downloaded_bytes: book.downloaded_bytes,
            download_rate: book.download_rate,
            upload_rate: book.upload_rate,
            peers: if paused { 0 } else { self.state.config.peers },
            pieces_available: book.available,
            piece_count: book.piece_count(),
        })
    }
}
