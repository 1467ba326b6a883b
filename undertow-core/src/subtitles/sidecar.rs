//! Sidecar subtitle conversion to WebVTT.
//!
//! SubRip differs from WebVTT in two places: the file header and the comma
//! before the milliseconds in timing lines. Everything else passes through
//! byte for byte, including line endings.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::SubtitleError;

const WEBVTT_HEADER: &str = "WEBVTT\n\n";
const BOM: char = '\u{feff}';

static SRT_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+:\d{2}:\d{2}),(\d{3})").expect("valid timestamp regex"));
static SRT_TIMING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\d+:\d{2}:\d{2},\d{3}\s*-->").expect("valid timing line regex")
});

/// Sidecar subtitle formats recognized by extension or content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarFormat {
    SubRip,
    WebVtt,
    SubStationAlpha,
    MicroDvd,
}

impl SidecarFormat {
    /// Detects the format, letting a WebVTT signature override the extension.
    pub fn detect(name: &str, content: &str) -> Option<Self> {
        let content = content.trim_start_matches(BOM);
        if content.starts_with("WEBVTT") {
            return Some(SidecarFormat::WebVtt);
        }

        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("srt") => Some(SidecarFormat::SubRip),
            Some("vtt") => Some(SidecarFormat::WebVtt),
            Some("ass" | "ssa") => Some(SidecarFormat::SubStationAlpha),
            Some("sub") => Some(SidecarFormat::MicroDvd),
            _ if SRT_TIMING_LINE.is_match(content) => Some(SidecarFormat::SubRip),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SidecarFormat::SubRip => "srt",
            SidecarFormat::WebVtt => "vtt",
            SidecarFormat::SubStationAlpha => "ass",
            SidecarFormat::MicroDvd => "sub",
        }
    }
}

/// Converts SubRip text to WebVTT.
///
/// Strips a leading BOM, prepends the header and rewrites `HH:MM:SS,mmm`
/// to `HH:MM:SS.mmm` on `-->` lines only.
pub fn srt_to_vtt(input: &str) -> String {
    let input = input.strip_prefix(BOM).unwrap_or(input);
    let mut output = String::with_capacity(input.len() + WEBVTT_HEADER.len());
    output.push_str(WEBVTT_HEADER);

    for line in input.split_inclusive('\n') {
        if line.contains("-->") {
            output.push_str(&SRT_TIMESTAMP.replace_all(line, "$1.$2"));
        } else {
            output.push_str(line);
        }
    }
    output
}

/// Produces WebVTT for a sidecar file, converting when needed.
///
/// # Errors
/// - `SubtitleError::UnsupportedFormat` - Format cannot be converted
pub fn to_webvtt(name: &str, data: &[u8]) -> Result<String, SubtitleError> {
    let content = String::from_utf8_lossy(data);
    match SidecarFormat::detect(name, &content) {
        Some(SidecarFormat::WebVtt) => Ok(content.into_owned()),
        Some(SidecarFormat::SubRip) => Ok(srt_to_vtt(&content)),
        Some(other) => Err(SubtitleError::UnsupportedFormat {
            format: other.name().to_string(),
        }),
        None => Err(SubtitleError::UnsupportedFormat {
            format: "unknown".to_string(),
        }),
    }
}
