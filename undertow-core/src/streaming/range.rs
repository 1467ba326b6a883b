//! `Range` header parsing for single byte ranges.
//!
//! Only the first range of a multi-range header is honored; the rest are
//! ignored and the response is a plain single-part `206`.

use std::ops::Range;

/// Inclusive byte range that is known to be satisfiable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered, i.e. the `Content-Length` of the response.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Half-open form used by the scheduler and readers.
    pub fn as_exclusive(&self) -> Range<u64> {
        self.start..self.end + 1
    }

    /// `Content-Range` header value for a resource of `total` bytes.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Why a `Range` header cannot be served.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("Malformed range header: {header}")]
    Malformed { header: String },

    #[error("Range not satisfiable for {total} byte resource")]
    Unsatisfiable { total: u64 },
}

impl RangeError {
    /// `Content-Range` value for a `416` response.
    pub fn unsatisfied_content_range(total: u64) -> String {
        format!("bytes */{total}")
    }
}

/// Resolves an optional `Range` header against a resource length.
///
/// Returns `Ok(None)` when no header was sent and the whole resource should
/// be served with `200`.
///
/// # Errors
///
/// - `RangeError::Malformed` - Unit is not `bytes` or the spec cannot be parsed
/// - `RangeError::Unsatisfiable` - Start beyond the end, start after end,
///   zero-length suffix or empty resource
pub fn parse_range_header(header: Option<&str>, total: u64) -> Result<Option<ByteRange>, RangeError> {
    let Some(header) = header else {
        return Ok(None);
    };
    let malformed = || RangeError::Malformed {
        header: header.to_string(),
    };

    let (unit, specs) = header.trim().split_once('=').ok_or_else(malformed)?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return Err(malformed());
    }

    let mut specs = specs.split(',');
    let first = specs.next().map(str::trim).unwrap_or_default();
    if specs.next().is_some() {
        tracing::debug!(header, "Multi-range request, serving first range only");
    }

    let (start, end) = first.split_once('-').ok_or_else(malformed)?;
    let (start, end) = (start.trim(), end.trim());
    let unsatisfiable = RangeError::Unsatisfiable { total };

    if start.is_empty() {
        let suffix: u64 = end.parse().map_err(|_| malformed())?;
        if suffix == 0 || total == 0 {
            return Err(unsatisfiable);
        }
        return Ok(Some(ByteRange {
            start: total.saturating_sub(suffix),
            end: total - 1,
        }));
    }

    let start: u64 = start.parse().map_err(|_| malformed())?;
    let end: Option<u64> = if end.is_empty() {
        None
    } else {
        Some(end.parse().map_err(|_| malformed())?)
    };

    if end.is_some_and(|end| start > end) || start >= total {
        return Err(unsatisfiable);
    }

    Ok(Some(ByteRange {
        start,
        end: end.map_or(total - 1, |end| end.min(total - 1)),
    }))
}
