//! Subtitle track extraction through an `ffmpeg` subprocess.
//!
//! A running extraction is an [`ExtractionJob`]. The job owns the child
//! process and the task feeding its stdin; dropping the job, which happens
//! when the response body is dropped on client disconnect, kills the child
//! and aborts the feeder. Completion and failure take the same path.

use std::collections::HashSet;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::SubtitleError;

const READ_BUFFER_SIZE: usize = 8192;

/// Byte stream fed to the subprocess stdin.
pub type FeedStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Where the subprocess reads the container from.
pub enum ExtractionInput {
    /// Complete file on disk.
    File(PathBuf),
    /// Partially available file, piped in as it arrives.
    Feed(FeedStream),
}

/// Builds `ffmpeg` invocations that emit one stream as WebVTT on stdout.
#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    program: PathBuf,
}

impl FfmpegExtractor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, input: &ExtractionInput, stream_index: u32) -> Command {
        let mut command = Command::new(&self.program);
        command.args(["-v", "error", "-i"]);
        match input {
            ExtractionInput::File(path) => {
                command.arg(path).stdin(Stdio::null());
            }
            ExtractionInput::Feed(_) => {
                command.arg("pipe:0").stdin(Stdio::piped());
            }
        }
        command
            .args(["-map", &format!("0:{stream_index}"), "-c:s", "webvtt", "-f", "webvtt", "pipe:1"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }

    /// Spawns the subprocess and registers it with `tracker`.
    ///
    /// # Errors
    /// - `SubtitleError::ExtractionFailed` - The binary could not be started
    pub fn spawn(
        &self,
        input: ExtractionInput,
        stream_index: u32,
        tracker: &ExtractionTracker,
    ) -> Result<ExtractionJob, SubtitleError> {
        let mut child = self
            .command(&input, stream_index)
            .spawn()
            .map_err(|e| SubtitleError::ExtractionFailed {
                reason: format!("failed to start {}: {e}", self.program.display()),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SubtitleError::ExtractionFailed {
                reason: "subprocess stdout unavailable".to_string(),
            })?;

        let feeder = match (input, child.stdin.take()) {
            (ExtractionInput::Feed(feed), Some(stdin)) => Some(tokio::spawn(pump(feed, stdin))),
            _ => None,
        };

        let id = tracker.register();
        tracing::debug!(%id, stream_index, pid = ?child.id(), "Extraction started");

        Ok(ExtractionJob {
            id,
            child,
            stdout: Some(stdout),
            feeder,
            tracker: tracker.clone(),
        })
    }
}

/// Copies the feed into the subprocess stdin, closing it at the end.
///
/// A failing feed is returned so the caption stream can report it; the
/// subprocess only sees a short input and would otherwise exit cleanly.
async fn pump(mut feed: FeedStream, mut stdin: ChildStdin) -> Result<(), std::io::Error> {
    while let Some(chunk) = feed.next().await {
        let bytes = chunk.inspect_err(|e| {
            tracing::warn!(error = %e, "Extraction input ended early");
        })?;
        if let Err(e) = stdin.write_all(&bytes).await {
            // Subprocess stopped reading, its exit status decides the outcome
            tracing::debug!(error = %e, "Extraction stdin closed");
            return Ok(());
        }
    }
    let _ = stdin.shutdown().await;
    Ok(())
}

/// Set of running extraction jobs.
#[derive(Debug, Clone, Default)]
pub struct ExtractionTracker {
    jobs: Arc<Mutex<HashSet<Uuid>>>,
}

impl ExtractionTracker {
    /// Number of jobs whose subprocess has not been released yet.
    pub fn active(&self) -> usize {
        self.jobs.lock().len()
    }

    fn register(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.jobs.lock().insert(id);
        id
    }

    fn finish(&self, id: Uuid) {
        self.jobs.lock().remove(&id);
    }
}

/// Scoped ownership of one extraction subprocess.
pub struct ExtractionJob {
    id: Uuid,
    child: Child,
    stdout: Option<ChildStdout>,
    feeder: Option<JoinHandle<Result<(), std::io::Error>>>,
    tracker: ExtractionTracker,
}

impl ExtractionJob {
    /// Operating system id of the subprocess, while it runs.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Turns the job into the caption byte stream.
    ///
    /// A non-zero exit after the output ends surfaces as a final error
    /// item, so a client sees a broken transfer rather than a short file.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send {
        let stdout = self.stdout.take();
        stream::unfold(
            (self, stdout),
            |(mut job, stdout)| async move {
                let mut stdout = stdout?;
                let mut buffer = vec![0u8; READ_BUFFER_SIZE];
                match stdout.read(&mut buffer).await {
                    Ok(0) => {
                        let error = match job.feed_failure().await {
                            Some(error) => Some(error),
                            None => job.exit_status().await,
                        };
                        error.map(|error| (Err(error), (job, None)))
                    }
                    Ok(n) => {
                        buffer.truncate(n);
                        Some((Ok(Bytes::from(buffer)), (job, Some(stdout))))
                    }
                    Err(e) => Some((Err(e), (job, None))),
                }
            },
        )
    }

    /// Waits for the stdin feeder and returns its failure, if any.
    async fn feed_failure(&mut self) -> Option<std::io::Error> {
        let feeder = self.feeder.take()?;
        match feeder.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(e) if e.is_cancelled() => None,
            Err(e) => Some(std::io::Error::other(format!("extraction feeder panicked: {e}"))),
        }
    }

    /// Waits for exit; returns an error item unless the exit was clean.
    async fn exit_status(&mut self) -> Option<std::io::Error> {
        match self.child.wait().await {
            Ok(status) if status.success() => {
                tracing::debug!(id = %self.id, "Extraction finished");
                None
            }
            Ok(status) => {
                tracing::warn!(id = %self.id, %status, "Extraction subprocess failed");
                Some(std::io::Error::other(format!(
                    "subtitle extraction exited with {status}"
                )))
            }
            Err(e) => Some(e),
        }
    }
}

impl Drop for ExtractionJob {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        // Errors here mean the child has already exited
        if self.child.start_kill().is_ok() {
            tracing::debug!(id = %self.id, "Extraction subprocess killed");
        }
        self.tracker.finish(self.id);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Duration;

    use super::*;

    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    async fn collect_all(
        stream: impl Stream<Item = Result<Bytes, std::io::Error>>,
    ) -> (Vec<u8>, Option<std::io::Error>) {
        let mut stream = std::pin::pin!(stream);
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(e) => return (out, Some(e)),
            }
        }
        (out, None)
    }

    fn process_gone(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            // Field after the parenthesised command name is the state
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn test_file_input_streams_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ffmpeg(dir.path(), "printf 'WEBVTT\\n\\n00:00.000 --> 00:01.000\\nhi\\n'");
        let tracker = ExtractionTracker::default();

        let job = FfmpegExtractor::new(program)
            .spawn(ExtractionInput::File(dir.path().join("in.mkv")), 2, &tracker)
            .unwrap();
        assert_eq!(tracker.active(), 1);

        let (out, error) = collect_all(job.into_stream()).await;
        assert!(error.is_none());
        assert!(String::from_utf8(out).unwrap().starts_with("WEBVTT"));
        assert_eq!(tracker.active(), 0);
    }

    #[tokio::test]
    async fn test_feed_input_reaches_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ffmpeg(dir.path(), "exec cat");
        let tracker = ExtractionTracker::default();
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"first ")),
            Ok(Bytes::from_static(b"second")),
        ];

        let job = FfmpegExtractor::new(program)
            .spawn(
                ExtractionInput::Feed(Box::pin(stream::iter(chunks))),
                0,
                &tracker,
            )
            .unwrap();

        let (out, error) = collect_all(job.into_stream()).await;
        assert!(error.is_none());
        assert_eq!(out, b"first second");
    }

    #[tokio::test]
    async fn test_failed_feed_is_mid_stream_error() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ffmpeg(dir.path(), "exec cat");
        let tracker = ExtractionTracker::default();
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"partial ")),
            Err(std::io::Error::other("download stalled")),
        ];

        let job = FfmpegExtractor::new(program)
            .spawn(
                ExtractionInput::Feed(Box::pin(stream::iter(chunks))),
                0,
                &tracker,
            )
            .unwrap();

        let (out, error) = collect_all(job.into_stream()).await;
        assert_eq!(out, b"partial ");
        let error = error.expect("feed failure must reach the caption stream");
        assert!(error.to_string().contains("download stalled"));
        assert_eq!(tracker.active(), 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_mid_stream_error() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ffmpeg(dir.path(), "printf 'WEBVTT\\n\\n'\nexit 3");
        let tracker = ExtractionTracker::default();

        let job = FfmpegExtractor::new(program)
            .spawn(ExtractionInput::File(dir.path().join("in.mkv")), 0, &tracker)
            .unwrap();

        let (out, error) = collect_all(job.into_stream()).await;
        assert_eq!(out, b"WEBVTT\n\n");
        assert!(error.is_some());
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_start() {
        let tracker = ExtractionTracker::default();
        let result = FfmpegExtractor::new("/nonexistent/undertow-ffmpeg").spawn(
            ExtractionInput::File(PathBuf::from("/tmp/in.mkv")),
            0,
            &tracker,
        );
        assert!(matches!(result, Err(SubtitleError::ExtractionFailed { .. })));
        assert_eq!(tracker.active(), 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_dropping_stream_kills_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ffmpeg(dir.path(), "printf 'WEBVTT\\n\\n'\nexec sleep 30");
        let tracker = ExtractionTracker::default();

        let job = FfmpegExtractor::new(program)
            .spawn(ExtractionInput::File(dir.path().join("in.mkv")), 0, &tracker)
            .unwrap();
        let pid = job.pid().unwrap();

        let mut stream = Box::pin(job.into_stream());
        let first = stream.next().await.unwrap().unwrap();
        assert!(first.starts_with(b"WEBVTT"));
        assert!(!process_gone(pid));

        drop(stream);
        assert_eq!(tracker.active(), 0);

        let mut waited = Duration::ZERO;
        while !process_gone(pid) && waited < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        assert!(process_gone(pid), "subprocess {pid} survived disconnect");
    }
}
