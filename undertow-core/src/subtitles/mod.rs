//! Subtitle pipeline.
//!
//! Three independent capabilities share a session's file data: probing a
//! container for embedded tracks, extracting one track as a live WebVTT
//! stream, and converting sidecar subtitle files.

pub mod cache;
pub mod extract;
pub mod inspector;
pub mod sidecar;

use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use serde::Serialize;

pub use cache::ProbeCache;
pub use extract::{ExtractionInput, ExtractionTracker, FfmpegExtractor};
pub use inspector::{FfprobeInspector, MediaInspector};
pub use sidecar::{SidecarFormat, srt_to_vtt, to_webvtt};

use crate::config::SubtitleConfig;
use crate::session::{FileKind, SessionError, SessionRef, TorrentSession};
use crate::streaming::{FileStreamer, ReadMode, StreamingError};
use crate::swarm::{InfoHash, SwarmEngine};

/// One embedded subtitle stream of a media container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtitleTrack {
    /// Absolute stream index within the container
    pub stream_index: u32,
    pub codec: String,
    pub language: Option<String>,
    pub title: Option<String>,
    pub forced: bool,
    pub default: bool,
    /// False for image-based codecs that cannot be converted to text
    pub text_based: bool,
}

/// Errors from subtitle probing, extraction and conversion.
#[derive(Debug, thiserror::Error)]
pub enum SubtitleError {
    #[error("File {file_index} not found in session {info_hash}")]
    FileNotFound {
        info_hash: InfoHash,
        file_index: usize,
    },

    #[error("Subtitle track {stream_index} not found")]
    TrackNotFound { stream_index: u32 },

    #[error("Subtitle track {stream_index} uses image codec {codec}")]
    UnsupportedTrack { stream_index: u32, codec: String },

    #[error("Unsupported subtitle format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Probe failed: {reason}")]
    ProbeFailed { reason: String },

    #[error("Extraction failed: {reason}")]
    ExtractionFailed { reason: String },

    #[error("Streaming error: {0}")]
    Streaming(#[from] StreamingError),

    #[error("Swarm error: {0}")]
    Swarm(#[from] crate::swarm::SwarmError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SessionError> for SubtitleError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::FileNotFound {
                info_hash,
                file_index,
            } => SubtitleError::FileNotFound {
                info_hash,
                file_index,
            },
            other => SubtitleError::Streaming(other.into()),
        }
    }
}

/// Probes, extracts and converts subtitles for session files.
pub struct SubtitleService {
    swarm: Arc<dyn SwarmEngine>,
    streamer: FileStreamer,
    inspector: Arc<dyn MediaInspector>,
    extractor: FfmpegExtractor,
    cache: ProbeCache,
    tracker: ExtractionTracker,
    config: SubtitleConfig,
}

impl SubtitleService {
    pub fn new(
        swarm: Arc<dyn SwarmEngine>,
        streamer: FileStreamer,
        inspector: Arc<dyn MediaInspector>,
        cache: ProbeCache,
        config: SubtitleConfig,
    ) -> Self {
        Self {
            swarm,
            streamer,
            inspector,
            extractor: FfmpegExtractor::new(config.ffmpeg_path.clone()),
            cache,
            tracker: ExtractionTracker::default(),
            config,
        }
    }

    pub fn cache(&self) -> &ProbeCache {
        &self.cache
    }

    /// Number of extraction subprocesses currently alive.
    pub fn active_extractions(&self) -> usize {
        self.tracker.active()
    }

    /// Lists embedded subtitle tracks of a file.
    ///
    /// Waits for the leading bytes of the file at high priority, then
    /// probes. Any probe failure, including the timeout, yields an empty
    /// list; only successful probes are cached.
    ///
    /// # Errors
    /// - `SubtitleError::FileNotFound` - Unknown file index
    pub async fn list_tracks(
        &self,
        session: &TorrentSession,
        file_index: usize,
    ) -> Result<Vec<SubtitleTrack>, SubtitleError> {
        session.file(file_index)?;
        let info_hash = session.info_hash;

        if let Some(tracks) = self.cache.get(info_hash, file_index) {
            tracing::debug!(%info_hash, file_index, "Probe cache hit");
            return Ok(tracks);
        }

        let generation = self.cache.generation(info_hash);
        let probe = async {
            self.streamer
                .scheduler()
                .ensure_prefix(session, file_index, self.config.probe_prefix_bytes)
                .await?;
            let path = self.swarm.file_path(info_hash, file_index)?;
            Ok::<_, SubtitleError>(self.inspector.probe(&path).await?)
        };

        match tokio::time::timeout(self.config.probe_timeout, probe).await {
            Ok(Ok(tracks)) => {
                tracing::info!(%info_hash, file_index, tracks = tracks.len(), "Probe complete");
                if !self
                    .cache
                    .insert(info_hash, file_index, generation, tracks.clone())
                {
                    tracing::debug!(%info_hash, file_index, "Session removed during probe, result not cached");
                }
                Ok(tracks)
            }
            Ok(Err(e)) => {
                tracing::warn!(%info_hash, file_index, error = %e, "Probe failed, reporting no subtitles");
                Ok(Vec::new())
            }
            Err(_) => {
                tracing::warn!(
                    %info_hash,
                    file_index,
                    timeout_secs = self.config.probe_timeout.as_secs(),
                    "Probe timed out, reporting no subtitles"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Starts extracting one track as a WebVTT byte stream.
    ///
    /// A complete file is read from disk by the subprocess; otherwise the
    /// file is piped in as pieces arrive, without raising priorities.
    /// Dropping the returned stream kills the subprocess.
    ///
    /// # Errors
    /// - `SubtitleError::FileNotFound` - Unknown file index
    /// - `SubtitleError::TrackNotFound` - No probed track with this stream index
    /// - `SubtitleError::UnsupportedTrack` - Image-based codec
    /// - `SubtitleError::ExtractionFailed` - Subprocess could not start
    pub async fn extract(
        &self,
        session: SessionRef,
        file_index: usize,
        stream_index: u32,
    ) -> Result<impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static, SubtitleError>
    {
        let tracks = self.list_tracks(&session, file_index).await?;
        let track = tracks
            .into_iter()
            .find(|track| track.stream_index == stream_index)
            .ok_or(SubtitleError::TrackNotFound { stream_index })?;
        if !track.text_based {
            return Err(SubtitleError::UnsupportedTrack {
                stream_index,
                codec: track.codec,
            });
        }

        let length = session.file(file_index)?.length;
        let input = if self
            .streamer
            .scheduler()
            .is_file_complete(&session, file_index)?
        {
            ExtractionInput::File(self.swarm.file_path(session.info_hash, file_index)?)
        } else {
            let feed = self.streamer.stream(
                Arc::clone(&session),
                file_index,
                0..length,
                ReadMode::Background,
            );
            ExtractionInput::Feed(Box::pin(feed))
        };

        tracing::info!(
            info_hash = %session.info_hash,
            file_index,
            stream_index,
            codec = %track.codec,
            "Extracting subtitle track"
        );
        let job = self.extractor.spawn(input, stream_index, &self.tracker)?;
        Ok(job.into_stream())
    }

    /// Serves a standalone subtitle file as WebVTT.
    ///
    /// # Errors
    /// - `SubtitleError::FileNotFound` - Unknown file index
    /// - `SubtitleError::UnsupportedFormat` - Not a subtitle file, or a format
    ///   that cannot be converted
    pub async fn sidecar(
        &self,
        session: &TorrentSession,
        file_index: usize,
    ) -> Result<String, SubtitleError> {
        let file = session.file(file_index)?;
        if file.kind != FileKind::Subtitle {
            return Err(SubtitleError::UnsupportedFormat {
                format: format!("{:?}", file.kind).to_lowercase(),
            });
        }

        let data = self.streamer.read_all(session, file_index).await?;
        sidecar::to_webvtt(&file.name, &data)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::StreamingConfig;
    use crate::session::SessionEvictor;
    use crate::streaming::StreamingScheduler;
    use crate::swarm::ContentLocator;
    use crate::test_fixtures::{MockSwarm, patterned_bytes};

    const PIECE: u32 = 1024;

    struct CountingInspector {
        calls: AtomicUsize,
        result: Result<Vec<SubtitleTrack>, String>,
    }

    #[async_trait]
    impl MediaInspector for CountingInspector {
        async fn probe(&self, _path: &Path) -> Result<Vec<SubtitleTrack>, SubtitleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .clone()
                .map_err(|reason| SubtitleError::ProbeFailed { reason })
        }
    }

    fn track(stream_index: u32, codec: &str, text_based: bool) -> SubtitleTrack {
        SubtitleTrack {
            stream_index,
            codec: codec.to_string(),
            language: None,
            title: None,
            forced: false,
            default: false,
            text_based,
        }
    }

    struct Fixture {
        swarm: Arc<MockSwarm>,
        service: SubtitleService,
        inspector: Arc<CountingInspector>,
        session: SessionRef,
    }

    async fn fixture(result: Result<Vec<SubtitleTrack>, String>) -> Fixture {
        let swarm = Arc::new(MockSwarm::new());
        let info_hash = InfoHash::new([8; 20]);
        let video = patterned_bytes(32 * PIECE as usize);
        let srt = b"1\n00:00:01,000 --> 00:00:02,000\nHello\n".to_vec();
        let ass = b"[Script Info]\n".to_vec();
        let metadata = swarm.seed(
            info_hash,
            "movie",
            &[("movie.mkv", &video), ("movie.srt", &srt), ("movie.ass", &ass)],
            PIECE,
        );
        swarm
            .add_torrent(&ContentLocator::from_info_hash(info_hash))
            .await
            .unwrap();

        let streaming = StreamingConfig {
            lookahead_bytes: 4 * PIECE as u64,
            seek_threshold: 4 * PIECE as u64,
            stall_timeout: Duration::from_secs(1),
            chunk_size: PIECE as usize,
        };
        let scheduler = Arc::new(StreamingScheduler::new(swarm.clone(), streaming));
        let streamer = FileStreamer::new(scheduler, swarm.clone());
        let inspector = Arc::new(CountingInspector {
            calls: AtomicUsize::new(0),
            result,
        });
        let config = SubtitleConfig {
            probe_prefix_bytes: 4 * PIECE as u64,
            probe_timeout: Duration::from_millis(300),
            ffmpeg_path: "/nonexistent/undertow-ffmpeg".into(),
            ..Default::default()
        };
        let service = SubtitleService::new(
            swarm.clone(),
            streamer,
            inspector.clone(),
            ProbeCache::new(Duration::from_secs(60)),
            config,
        );

        Fixture {
            swarm,
            service,
            inspector,
            session: Arc::new(TorrentSession::from_metadata(&metadata)),
        }
    }

    #[tokio::test]
    async fn test_probe_results_are_cached() {
        let f = fixture(Ok(vec![track(2, "subrip", true)])).await;
        f.swarm.complete_all(f.session.info_hash);

        let first = f.service.list_tracks(&f.session, 0).await.unwrap();
        let second = f.service.list_tracks(&f.session, 0).await.unwrap();

        assert_eq!(first, vec![track(2, "subrip", true)]);
        assert_eq!(first, second);
        assert_eq!(f.inspector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_tracks_is_not_an_error() {
        let f = fixture(Ok(Vec::new())).await;
        f.swarm.complete_all(f.session.info_hash);

        let tracks = f.service.list_tracks(&f.session, 0).await.unwrap();
        assert!(tracks.is_empty());
        assert_eq!(f.service.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_probe_failure_yields_empty_list_uncached() {
        let f = fixture(Err("corrupt container".to_string())).await;
        f.swarm.complete_all(f.session.info_hash);

        assert!(f.service.list_tracks(&f.session, 0).await.unwrap().is_empty());
        assert!(f.service.list_tracks(&f.session, 0).await.unwrap().is_empty());
        assert_eq!(f.inspector.calls.load(Ordering::SeqCst), 2);
        assert!(f.service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_probe_outliving_session_is_not_cached() {
        use crate::session::SessionEvictor;

        let f = fixture(Ok(vec![track(2, "subrip", true)])).await;
        let info_hash = f.session.info_hash;

        // Session goes away while the probe waits for its prefix
        let remove_midway = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            f.service.cache().evict(info_hash);
            f.swarm.complete_all(info_hash);
        };
        let (tracks, ()) = tokio::join!(f.service.list_tracks(&f.session, 0), remove_midway);

        assert_eq!(tracks.unwrap(), vec![track(2, "subrip", true)]);
        assert_eq!(f.inspector.calls.load(Ordering::SeqCst), 1);
        assert!(f.service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_probe_timeout_yields_empty_list() {
        let f = fixture(Ok(vec![track(2, "subrip", true)])).await;

        // No pieces ever arrive, so the prefix wait outlives the probe timeout
        let tracks = f.service.list_tracks(&f.session, 0).await.unwrap();
        assert!(tracks.is_empty());
        assert_eq!(f.inspector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_probe_prefix_is_high_priority() {
        let f = fixture(Ok(Vec::new())).await;
        f.swarm.complete_all(f.session.info_hash);

        f.service.list_tracks(&f.session, 0).await.unwrap();

        assert_eq!(
            f.swarm.priority_of(f.session.info_hash, 0),
            crate::swarm::PiecePriority::High
        );
        assert_eq!(
            f.swarm.priority_of(f.session.info_hash, 10),
            crate::swarm::PiecePriority::Skip
        );
    }

    #[tokio::test]
    async fn test_unknown_file_is_not_found() {
        let f = fixture(Ok(Vec::new())).await;
        assert!(matches!(
            f.service.list_tracks(&f.session, 9).await,
            Err(SubtitleError::FileNotFound { file_index: 9, .. })
        ));
    }

    #[tokio::test]
    async fn test_extract_rejects_unknown_and_bitmap_tracks() {
        let f = fixture(Ok(vec![track(3, "hdmv_pgs_subtitle", false)])).await;
        f.swarm.complete_all(f.session.info_hash);

        let unknown = f.service.extract(f.session.clone(), 0, 7).await;
        assert!(matches!(unknown, Err(SubtitleError::TrackNotFound { .. })));

        let bitmap = f.service.extract(f.session.clone(), 0, 3).await;
        assert!(matches!(bitmap, Err(SubtitleError::UnsupportedTrack { .. })));
        assert_eq!(f.service.active_extractions(), 0);
    }

    #[tokio::test]
    async fn test_extract_reports_missing_binary() {
        let f = fixture(Ok(vec![track(2, "subrip", true)])).await;
        f.swarm.complete_all(f.session.info_hash);

        let result = f.service.extract(f.session.clone(), 0, 2).await;
        assert!(matches!(result, Err(SubtitleError::ExtractionFailed { .. })));
    }

    #[tokio::test]
    async fn test_sidecar_conversion() {
        let f = fixture(Ok(Vec::new())).await;
        f.swarm.complete_all(f.session.info_hash);

        let vtt = f.service.sidecar(&f.session, 1).await.unwrap();
        assert_eq!(vtt, "WEBVTT\n\n1\n00:00:01.000 --> 00:00:02.000\nHello\n");

        assert!(matches!(
            f.service.sidecar(&f.session, 2).await,
            Err(SubtitleError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            f.service.sidecar(&f.session, 0).await,
            Err(SubtitleError::UnsupportedFormat { .. })
        ));
    }

    #[tokio::test]
    async fn test_cache_eviction_forces_reprobe() {
        let f = fixture(Ok(Vec::new())).await;
        f.swarm.complete_all(f.session.info_hash);

        f.service.list_tracks(&f.session, 0).await.unwrap();
        f.service.cache().evict(f.session.info_hash);
        f.service.list_tracks(&f.session, 0).await.unwrap();

        assert_eq!(f.inspector.calls.load(Ordering::SeqCst), 2);
    }
}
