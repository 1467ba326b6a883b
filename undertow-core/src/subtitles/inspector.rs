//! Media container inspection.
//!
//! Enumerates subtitle streams by running `ffprobe` against the file and
//! parsing its JSON stream listing.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{SubtitleError, SubtitleTrack};

/// Codecs carrying images rather than text; these cannot become WebVTT.
const BITMAP_CODECS: &[&str] = &[
    "hdmv_pgs_subtitle",
    "dvd_subtitle",
    "dvb_subtitle",
    "dvb_teletext",
    "xsub",
];

/// Abstraction over probing a container for subtitle streams.
#[async_trait]
pub trait MediaInspector: Send + Sync {
    /// Lists subtitle streams of the file at `path`.
    ///
    /// # Errors
    /// - `SubtitleError::ProbeFailed` - Inspector could not run or parse the container
    async fn probe(&self, path: &Path) -> Result<Vec<SubtitleTrack>, SubtitleError>;
}

/// Inspector backed by the `ffprobe` binary.
pub struct FfprobeInspector {
    program: PathBuf,
}

impl FfprobeInspector {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl MediaInspector for FfprobeInspector {
    async fn probe(&self, path: &Path) -> Result<Vec<SubtitleTrack>, SubtitleError> {
        let output = Command::new(&self.program)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_streams",
                "-select_streams",
                "s",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SubtitleError::ProbeFailed {
                reason: format!("failed to run {}: {e}", self.program.display()),
            })?;

        if !output.status.success() {
            return Err(SubtitleError::ProbeFailed {
                reason: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        parse_probe_output(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    #[serde(default)]
    tags: std::collections::HashMap<String, String>,
    #[serde(default)]
    disposition: Disposition,
}

#[derive(Debug, Default, Deserialize)]
struct Disposition {
    #[serde(default)]
    default: u8,
    #[serde(default)]
    forced: u8,
}

impl ProbeStream {
    fn tag(&self, key: &str) -> Option<String> {
        self.tags
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.clone())
            .filter(|value| !value.is_empty())
    }
}

/// Converts `ffprobe -print_format json -show_streams` output into tracks.
///
/// # Errors
/// - `SubtitleError::ProbeFailed` - Output is not the expected JSON
pub fn parse_probe_output(json: &[u8]) -> Result<Vec<SubtitleTrack>, SubtitleError> {
    let output: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| SubtitleError::ProbeFailed {
            reason: format!("unreadable probe output: {e}"),
        })?;

    Ok(output
        .streams
        .into_iter()
        .filter(|stream| stream.codec_type.as_deref().is_none_or(|kind| kind == "subtitle"))
        .map(|stream| {
            let codec = stream
                .codec_name
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            SubtitleTrack {
                stream_index: stream.index,
                language: stream.tag("language"),
                title: stream.tag("title"),
                forced: stream.disposition.forced != 0,
                default: stream.disposition.default != 0,
                text_based: !BITMAP_CODECS.contains(&codec.as_str()),
                codec,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {
                "index": 2,
                "codec_name": "subrip",
                "codec_type": "subtitle",
                "disposition": { "default": 1, "forced": 0, "dub": 0 },
                "tags": { "language": "eng", "title": "English" }
            },
            {
                "index": 3,
                "codec_name": "hdmv_pgs_subtitle",
                "codec_type": "subtitle",
                "disposition": { "default": 0, "forced": 1 },
                "tags": { "LANGUAGE": "ger" }
            },
            {
                "index": 4,
                "codec_name": "ass",
                "codec_type": "subtitle"
            }
        ]
    }"#;

    #[test]
    fn test_parse_probe_output() {
        let tracks = parse_probe_output(SAMPLE.as_bytes()).unwrap();

        assert_eq!(tracks.len(), 3);
        assert_eq!(tracks[0].stream_index, 2);
        assert_eq!(tracks[0].codec, "subrip");
        assert_eq!(tracks[0].language.as_deref(), Some("eng"));
        assert_eq!(tracks[0].title.as_deref(), Some("English"));
        assert!(tracks[0].default);
        assert!(tracks[0].text_based);

        assert_eq!(tracks[1].language.as_deref(), Some("ger"));
        assert!(tracks[1].forced);
        assert!(!tracks[1].text_based);

        assert!(tracks[2].language.is_none());
        assert!(!tracks[2].default);
    }

    #[test]
    fn test_no_subtitle_streams() {
        assert!(parse_probe_output(b"{}").unwrap().is_empty());
        assert!(parse_probe_output(br#"{"streams": []}"#).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_output_is_probe_failure() {
        assert!(matches!(
            parse_probe_output(b"not json"),
            Err(SubtitleError::ProbeFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_probe_failure() {
        let inspector = FfprobeInspector::new("/nonexistent/undertow-ffprobe");
        let result = inspector.probe(Path::new("/tmp/whatever.mkv")).await;
        assert!(matches!(result, Err(SubtitleError::ProbeFailed { .. })));
    }
}
