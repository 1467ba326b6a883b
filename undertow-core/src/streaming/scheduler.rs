//! Piece scheduling for progressive playback.
//!
//! Each open stream, identified by (content, file), has a read cursor. A
//! request moves the cursor and raises the lookahead window ahead of it to
//! critical priority; the rest of the torrent stays selected at normal
//! priority. A request far from the previous cursor is a seek: the old
//! window is demoted before the new one is raised.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::{Instant, timeout_at};

use super::StreamingError;
use crate::config::StreamingConfig;
use crate::session::{SessionEvictor, TorrentSession};
use crate::swarm::{InfoHash, PiecePriority, SwarmEngine};

#[derive(Debug, Clone)]
struct StreamCursor {
    /// File-relative offset just past the last byte requested
    position: u64,
    /// Pieces currently raised to critical for this stream
    window: Range<u32>,
}

/// Guarantees byte ranges become readable while steering swarm priorities.
pub struct StreamingScheduler {
    swarm: Arc<dyn SwarmEngine>,
    config: StreamingConfig,
    cursors: Mutex<HashMap<(InfoHash, usize), StreamCursor>>,
}

impl StreamingScheduler {
    pub fn new(swarm: Arc<dyn SwarmEngine>, config: StreamingConfig) -> Self {
        Self {
            swarm,
            config,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Suspends until every piece under the file-relative `range` is available.
    ///
    /// Moves the stream cursor to `range.start` and raises the lookahead
    /// window before waiting. Unrelated streams are never blocked.
    ///
    /// # Errors
    ///
    /// - `StreamingError::FileNotFound` - Unknown file index
    /// - `StreamingError::RangeOutOfBounds` - Range extends past the file
    /// - `StreamingError::DownloadStalled` - No progress within the stall timeout
    pub async fn ensure_range(
        &self,
        session: &TorrentSession,
        file_index: usize,
        range: Range<u64>,
    ) -> Result<(), StreamingError> {
        let pieces = self.pieces_for(session, file_index, &range)?;
        if range.is_empty() {
            return Ok(());
        }
        self.prioritize(session, file_index, &range)?;
        self.wait_available(session.info_hash, pieces).await
    }

    /// Raises the first `prefix_bytes` of a file to high priority and waits.
    ///
    /// Pieces inside any active playback window keep their critical
    /// priority, so probing never slows a running stream.
    ///
    /// # Errors
    ///
    /// - `StreamingError::FileNotFound` - Unknown file index
    /// - `StreamingError::DownloadStalled` - No progress within the stall timeout
    pub async fn ensure_prefix(
        &self,
        session: &TorrentSession,
        file_index: usize,
        prefix_bytes: u64,
    ) -> Result<(), StreamingError> {
        let file = session.file(file_index)?;
        let range = 0..prefix_bytes.min(file.length);
        let pieces = self.pieces_for(session, file_index, &range)?;
        if pieces.is_empty() {
            return Ok(());
        }

        let protected: Vec<Range<u32>> = self
            .cursors
            .lock()
            .iter()
            .filter(|((info_hash, _), _)| *info_hash == session.info_hash)
            .map(|(_, cursor)| cursor.window.clone())
            .collect();

        for run in uncovered_runs(pieces.clone(), &protected) {
            self.swarm
                .set_priority(session.info_hash, run, PiecePriority::High)?;
        }

        tracing::debug!(
            info_hash = %session.info_hash,
            file_index,
            pieces = ?pieces,
            "Waiting for probe prefix"
        );
        self.wait_available(session.info_hash, pieces).await
    }

    /// Waits for a range without touching priorities.
    ///
    /// Used by background readers that must not compete with playback.
    ///
    /// # Errors
    ///
    /// Same as [`StreamingScheduler::ensure_range`].
    pub async fn wait_range(
        &self,
        session: &TorrentSession,
        file_index: usize,
        range: Range<u64>,
    ) -> Result<(), StreamingError> {
        let pieces = self.pieces_for(session, file_index, &range)?;
        self.wait_available(session.info_hash, pieces).await
    }

    /// Whether every piece of the file is already available.
    ///
    /// # Errors
    ///
    /// - `StreamingError::FileNotFound` - Unknown file index
    pub fn is_file_complete(
        &self,
        session: &TorrentSession,
        file_index: usize,
    ) -> Result<bool, StreamingError> {
        let file = session.file(file_index)?;
        let pieces = self.pieces_for(session, file_index, &(0..file.length))?;
        Ok(self
            .swarm
            .missing_pieces(session.info_hash, pieces)?
            .is_empty())
    }

    /// Piece range under a file-relative byte range, validated against the file.
    fn pieces_for(
        &self,
        session: &TorrentSession,
        file_index: usize,
        range: &Range<u64>,
    ) -> Result<Range<u32>, StreamingError> {
        let file = session.file(file_index)?;
        if range.start > range.end || range.end > file.length {
            return Err(StreamingError::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                length: file.length,
            });
        }
        Ok(session
            .layout()
            .pieces_for(file.span().to_global(range.clone())))
    }

    /// Moves the cursor and re-centers the critical window on it.
    fn prioritize(
        &self,
        session: &TorrentSession,
        file_index: usize,
        range: &Range<u64>,
    ) -> Result<(), StreamingError> {
        let info_hash = session.info_hash;
        let file = session.file(file_index)?;
        let span = file.span();

        let window_end = range
            .end
            .max(range.start.saturating_add(self.config.lookahead_bytes))
            .min(file.length);
        let window = session
            .layout()
            .pieces_for(span.to_global(range.start..window_end));

        let previous = {
            let mut cursors = self.cursors.lock();
            cursors.insert(
                (info_hash, file_index),
                StreamCursor {
                    position: range.end,
                    window: window.clone(),
                },
            )
        };

        match previous {
            Some(previous) if previous.position.abs_diff(range.start) > self.config.seek_threshold => {
                tracing::info!(
                    %info_hash,
                    file_index,
                    from = previous.position,
                    to = range.start,
                    "Seek detected, re-centering window"
                );
                self.swarm
                    .set_priority(info_hash, previous.window, PiecePriority::Normal)?;
            }
            Some(previous) if previous.window == window => return Ok(()),
            _ => {}
        }

        tracing::trace!(%info_hash, file_index, window = ?window, "Raising playback window");
        self.swarm
            .set_priority(info_hash, window, PiecePriority::Critical)?;
        Ok(())
    }

    /// Suspends until `pieces` are available.
    ///
    /// The stall deadline restarts whenever one of the awaited pieces
    /// arrives, so slow but steady progress never times out.
    async fn wait_available(
        &self,
        info_hash: InfoHash,
        pieces: Range<u32>,
    ) -> Result<(), StreamingError> {
        if pieces.is_empty() {
            return Ok(());
        }

        let mut changes = self.swarm.subscribe(info_hash)?;
        let mut missing = self.swarm.missing_pieces(info_hash, pieces.clone())?.len();
        let mut deadline = Instant::now() + self.config.stall_timeout;

        while missing > 0 {
            match timeout_at(deadline, changes.changed()).await {
                Err(_) => {
                    tracing::warn!(
                        %info_hash,
                        pieces = ?pieces,
                        missing,
                        "Download stalled"
                    );
                    return Err(StreamingError::DownloadStalled {
                        info_hash,
                        missing,
                        waited_secs: self.config.stall_timeout.as_secs(),
                    });
                }
                Ok(Err(_)) => return Err(StreamingError::SessionClosed { info_hash }),
                Ok(Ok(())) => {}
            }

            let now_missing = self.swarm.missing_pieces(info_hash, pieces.clone())?.len();
            if now_missing < missing {
                deadline = Instant::now() + self.config.stall_timeout;
            }
            missing = now_missing;
        }
        Ok(())
    }
}

impl SessionEvictor for StreamingScheduler {
    fn evict(&self, info_hash: InfoHash) {
        self.cursors
            .lock()
            .retain(|(cursor_hash, _), _| *cursor_hash != info_hash);
    }
}

/// Splits `pieces` into maximal runs not covered by any of `protected`.
fn uncovered_runs(pieces: Range<u32>, protected: &[Range<u32>]) -> Vec<Range<u32>> {
    let mut runs = Vec::new();
    let mut run_start = None;
    for piece in pieces.clone() {
        let covered = protected.iter().any(|window| window.contains(&piece));
        match (covered, run_start) {
            (false, None) => run_start = Some(piece),
            (true, Some(start)) => {
                runs.push(start..piece);
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        runs.push(start..pieces.end);
    }
    runs
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::swarm::{ContentLocator, SwarmEngine};
    use crate::test_fixtures::{MockSwarm, patterned_bytes};

    const PIECE: u32 = 1024;

    fn config() -> StreamingConfig {
        StreamingConfig {
            lookahead_bytes: 4 * PIECE as u64,
            seek_threshold: 4 * PIECE as u64,
            stall_timeout: Duration::from_secs(2),
            chunk_size: PIECE as usize,
        }
    }

    async fn setup() -> (Arc<MockSwarm>, StreamingScheduler, TorrentSession) {
        let swarm = Arc::new(MockSwarm::new());
        let info_hash = InfoHash::new([5; 20]);
        let intro = patterned_bytes(PIECE as usize / 2);
        let video = patterned_bytes(64 * PIECE as usize);
        let metadata = swarm.seed(
            info_hash,
            "show",
            &[("intro.txt", &intro), ("episode.mp4", &video)],
            PIECE,
        );
        swarm
            .add_torrent(&ContentLocator::from_info_hash(info_hash))
            .await
            .unwrap();
        let scheduler = StreamingScheduler::new(swarm.clone(), config());
        (swarm, scheduler, TorrentSession::from_metadata(&metadata))
    }

    #[tokio::test]
    async fn test_available_range_returns_immediately() {
        let (swarm, scheduler, session) = setup().await;
        swarm.complete_all(session.info_hash);

        scheduler
            .ensure_range(&session, 1, 0..10_000)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_range_beyond_file_is_rejected() {
        let (_swarm, scheduler, session) = setup().await;
        let length = session.files[1].length;

        let result = scheduler.ensure_range(&session, 1, 0..length + 1).await;
        assert!(matches!(
            result,
            Err(StreamingError::RangeOutOfBounds { .. })
        ));

        let result = scheduler.ensure_range(&session, 7, 0..1).await;
        assert!(matches!(result, Err(StreamingError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn test_window_uses_file_base_offset() {
        let (swarm, scheduler, session) = setup().await;
        swarm.complete_all(session.info_hash);

        // File 1 starts half a piece into the torrent
        scheduler.ensure_range(&session, 1, 0..100).await.unwrap();

        let log = swarm.priority_log(session.info_hash);
        assert_eq!(log.last(), Some(&(0..5, PiecePriority::Critical)));
    }

    #[tokio::test]
    async fn test_waits_for_straddling_piece() {
        let (swarm, scheduler, session) = setup().await;
        let scheduler = Arc::new(scheduler);
        let info_hash = session.info_hash;
        swarm.complete_pieces(info_hash, 0..3);

        // Global bytes 2560..3584 straddle pieces 2 and 3
        let waiter = {
            let scheduler = scheduler.clone();
            let session = session.clone();
            tokio::spawn(async move { scheduler.ensure_range(&session, 1, 2048..3072).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        swarm.complete_pieces(info_hash, 3..4);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_times_out() {
        let (_swarm, scheduler, session) = setup().await;
        let started = Instant::now();

        let result = scheduler.ensure_range(&session, 1, 0..PIECE as u64).await;

        assert!(matches!(
            result,
            Err(StreamingError::DownloadStalled { .. })
        ));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2));
        assert!(waited < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_seek_recenters_window() {
        let (swarm, scheduler, session) = setup().await;
        let info_hash = session.info_hash;
        swarm.complete_all(info_hash);

        scheduler.ensure_range(&session, 1, 0..PIECE as u64).await.unwrap();
        let far = 40 * PIECE as u64;
        scheduler
            .ensure_range(&session, 1, far..far + PIECE as u64)
            .await
            .unwrap();

        // Old window demoted, then window around the new cursor raised
        let log = swarm.priority_log(info_hash);
        let tail = &log[log.len() - 2..];
        assert_eq!(tail[0], (0..5, PiecePriority::Normal));
        assert_eq!(tail[1], (40..45, PiecePriority::Critical));
        assert_eq!(swarm.priority_of(info_hash, 42), PiecePriority::Critical);
        assert_eq!(swarm.priority_of(info_hash, 1), PiecePriority::Normal);
    }

    #[tokio::test]
    async fn test_seek_does_not_wait_for_old_window() {
        let (swarm, scheduler, session) = setup().await;
        let info_hash = session.info_hash;
        let scheduler = Arc::new(scheduler);

        // Playback starts but nothing arrives
        let stalled = {
            let scheduler = scheduler.clone();
            let session = session.clone();
            tokio::spawn(async move { scheduler.ensure_range(&session, 1, 0..1024).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Only the pieces around the seek target arrive
        swarm.complete_pieces(info_hash, 40..42);
        let far = 40 * PIECE as u64;
        scheduler
            .ensure_range(&session, 1, far..far + 512)
            .await
            .unwrap();

        stalled.abort();
    }

    #[tokio::test]
    async fn test_sequential_reads_are_not_seeks() {
        let (swarm, scheduler, session) = setup().await;
        let info_hash = session.info_hash;
        swarm.complete_all(info_hash);

        for chunk in 0..8u64 {
            let start = chunk * PIECE as u64;
            scheduler
                .ensure_range(&session, 1, start..start + PIECE as u64)
                .await
                .unwrap();
        }

        let demotions = swarm
            .priority_log(info_hash)
            .into_iter()
            .filter(|(_, priority)| *priority == PiecePriority::Normal)
            .count();
        // Only the registry-style initial selection would demote, and there is none here
        assert_eq!(demotions, 0);
    }

    #[tokio::test]
    async fn test_prefix_keeps_playback_window_critical() {
        let (swarm, scheduler, session) = setup().await;
        let info_hash = session.info_hash;
        swarm.complete_all(info_hash);

        scheduler.ensure_range(&session, 1, 0..512).await.unwrap();
        scheduler
            .ensure_prefix(&session, 1, 8 * PIECE as u64)
            .await
            .unwrap();

        assert_eq!(swarm.priority_of(info_hash, 0), PiecePriority::Critical);
        assert_eq!(swarm.priority_of(info_hash, 4), PiecePriority::Critical);
        assert_eq!(swarm.priority_of(info_hash, 5), PiecePriority::High);
        assert_eq!(swarm.priority_of(info_hash, 8), PiecePriority::High);
    }

    #[tokio::test]
    async fn test_evict_forgets_cursors() {
        let (swarm, scheduler, session) = setup().await;
        swarm.complete_all(session.info_hash);
        scheduler.ensure_range(&session, 1, 0..512).await.unwrap();

        scheduler.evict(session.info_hash);
        assert!(scheduler.cursors.lock().is_empty());
    }

    #[test]
    fn test_uncovered_runs() {
        assert_eq!(uncovered_runs(0..10, &[]), vec![0..10]);
        assert_eq!(uncovered_runs(0..10, &[2..4, 6..7]), vec![0..2, 4..6, 7..10]);
        assert!(uncovered_runs(0..3, &[0..5]).is_empty());
    }
}
