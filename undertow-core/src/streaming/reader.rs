//! Piece-gated file reads.
//!
//! Bodies are produced in bounded chunks. Each chunk is only read from disk
//! once the scheduler reports every piece under it available, so no byte
//! leaves the process before the swarm has it. Dropping the stream drops the
//! pending wait with it.

use std::io::SeekFrom;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use futures::stream;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{StreamingError, StreamingScheduler};
use crate::session::{SessionRef, TorrentSession};
use crate::swarm::SwarmEngine;

/// How a read interacts with piece priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Moves the playback cursor and raises the lookahead window.
    Playback,
    /// Waits for data without touching priorities.
    Background,
}

/// Reads file ranges through the scheduler's availability gate.
#[derive(Clone)]
pub struct FileStreamer {
    scheduler: Arc<StreamingScheduler>,
    swarm: Arc<dyn SwarmEngine>,
}

struct ReadState {
    streamer: FileStreamer,
    session: SessionRef,
    file_index: usize,
    mode: ReadMode,
    position: u64,
    end: u64,
    file: Option<File>,
    failed: bool,
}

impl FileStreamer {
    pub fn new(scheduler: Arc<StreamingScheduler>, swarm: Arc<dyn SwarmEngine>) -> Self {
        Self { scheduler, swarm }
    }

    pub fn scheduler(&self) -> &Arc<StreamingScheduler> {
        &self.scheduler
    }

    /// Streams the file-relative `range` in strictly increasing order.
    ///
    /// The first error ends the stream.
    pub fn stream(
        &self,
        session: SessionRef,
        file_index: usize,
        range: Range<u64>,
        mode: ReadMode,
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let state = ReadState {
            streamer: self.clone(),
            session,
            file_index,
            mode,
            position: range.start,
            end: range.end,
            file: None,
            failed: false,
        };

        stream::unfold(state, |mut state| async move {
            if state.failed || state.position >= state.end {
                return None;
            }

            match state.next_chunk().await {
                Ok(bytes) => {
                    state.position += bytes.len() as u64;
                    Some((Ok(bytes), state))
                }
                Err(e) => {
                    tracing::warn!(
                        info_hash = %state.session.info_hash,
                        file_index = state.file_index,
                        position = state.position,
                        error = %e,
                        "Range read failed"
                    );
                    state.failed = true;
                    Some((Err(std::io::Error::other(e)), state))
                }
            }
        })
    }

    /// Reads a whole file into memory once it is fully available.
    ///
    /// Intended for small files such as sidecar subtitles.
    ///
    /// # Errors
    ///
    /// - `StreamingError::FileNotFound` - Unknown file index
    /// - `StreamingError::DownloadStalled` - No progress within the stall timeout
    /// - `StreamingError::Io` - File could not be read
    pub async fn read_all(
        &self,
        session: &TorrentSession,
        file_index: usize,
    ) -> Result<Vec<u8>, StreamingError> {
        let length = session.file(file_index)?.length;
        self.scheduler
            .ensure_range(session, file_index, 0..length)
            .await?;

        let path = self.swarm.file_path(session.info_hash, file_index)?;
        let mut data = tokio::fs::read(path).await?;
        data.truncate(length as usize);
        Ok(data)
    }
}

impl ReadState {
    async fn next_chunk(&mut self) -> Result<Bytes, StreamingError> {
        let chunk_size = self.streamer.scheduler.config().chunk_size.max(1) as u64;
        let chunk = self.position..(self.position + chunk_size).min(self.end);

        match self.mode {
            ReadMode::Playback => {
                self.streamer
                    .scheduler
                    .ensure_range(&self.session, self.file_index, chunk.clone())
                    .await?
            }
            ReadMode::Background => {
                self.streamer
                    .scheduler
                    .wait_range(&self.session, self.file_index, chunk.clone())
                    .await?
            }
        }

        let file = match &mut self.file {
            Some(file) => file,
            slot => {
                let path = self
                    .streamer
                    .swarm
                    .file_path(self.session.info_hash, self.file_index)?;
                let mut file = File::open(&path).await?;
                file.seek(SeekFrom::Start(chunk.start)).await?;
                slot.insert(file)
            }
        };

        let mut buffer = vec![0u8; (chunk.end - chunk.start) as usize];
        file.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;
    use crate::config::StreamingConfig;
    use crate::swarm::{ContentLocator, InfoHash};
    use crate::test_fixtures::{MockSwarm, patterned_bytes};

    const PIECE: u32 = 1024;

    async fn setup() -> (Arc<MockSwarm>, FileStreamer, SessionRef, Vec<u8>) {
        let swarm = Arc::new(MockSwarm::new());
        let info_hash = InfoHash::new([6; 20]);
        let header = vec![0xee; 300];
        let video = patterned_bytes(20 * PIECE as usize + 77);
        let metadata = swarm.seed(
            info_hash,
            "pack",
            &[("header.bin", &header), ("movie.mkv", &video)],
            PIECE,
        );
        swarm
            .add_torrent(&ContentLocator::from_info_hash(info_hash))
            .await
            .unwrap();

        let config = StreamingConfig {
            lookahead_bytes: 4 * PIECE as u64,
            seek_threshold: 4 * PIECE as u64,
            stall_timeout: Duration::from_secs(2),
            chunk_size: 700,
        };
        let scheduler = Arc::new(StreamingScheduler::new(swarm.clone(), config));
        let streamer = FileStreamer::new(scheduler, swarm.clone());
        let session = Arc::new(TorrentSession::from_metadata(&metadata));
        (swarm, streamer, session, video)
    }

    async fn collect(
        stream: impl Stream<Item = Result<Bytes, std::io::Error>>,
    ) -> Result<Vec<u8>, std::io::Error> {
        let mut out = Vec::new();
        let mut stream = std::pin::pin!(stream);
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_stream_matches_reference_slice() {
        let (swarm, streamer, session, video) = setup().await;
        swarm.complete_all(session.info_hash);

        for range in [0..1, 0..video.len() as u64, 1000..5000, 20_000..video.len() as u64] {
            let body = collect(streamer.stream(session.clone(), 1, range.clone(), ReadMode::Playback))
                .await
                .unwrap();
            assert_eq!(body.len() as u64, range.end - range.start);
            assert_eq!(body, video[range.start as usize..range.end as usize]);
        }
    }

    #[tokio::test]
    async fn test_stream_waits_for_pieces() {
        let (swarm, streamer, session, video) = setup().await;
        let info_hash = session.info_hash;

        let reader = tokio::spawn(collect(streamer.stream(
            session.clone(),
            1,
            0..3000,
            ReadMode::Playback,
        )));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!reader.is_finished());

        swarm.complete_pieces(info_hash, 0..4);
        let body = reader.await.unwrap().unwrap();
        assert_eq!(body, video[..3000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_ends_with_error() {
        let (_swarm, streamer, session, _video) = setup().await;

        let result = collect(streamer.stream(session, 1, 0..100, ReadMode::Playback)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_background_read_leaves_priorities_alone() {
        let (swarm, streamer, session, video) = setup().await;
        swarm.complete_all(session.info_hash);

        let body = collect(streamer.stream(session.clone(), 1, 0..2048, ReadMode::Background))
            .await
            .unwrap();

        assert_eq!(body, video[..2048]);
        assert!(swarm.priority_log(session.info_hash).is_empty());
    }

    #[tokio::test]
    async fn test_read_all() {
        let (swarm, streamer, session, _video) = setup().await;
        swarm.complete_all(session.info_hash);

        let data = streamer.read_all(&session, 0).await.unwrap();
        assert_eq!(data, vec![0xee; 300]);
    }
}
