//! Byte-range to piece translation.
//!
//! A torrent's files are concatenated into one logical byte sequence that is
//! cut into fixed-size pieces; only the last piece may be shorter. Files keep
//! their own relative offsets, so every lookup goes through the file's base
//! offset within the concatenation.

use std::ops::Range;

use super::TorrentFile;

/// Piece geometry of a torrent's concatenated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceLayout {
    piece_length: u64,
    total_length: u64,
}

impl PieceLayout {
    /// Creates layout for `total_length` bytes cut into `piece_length` pieces.
    pub fn new(piece_length: u32, total_length: u64) -> Self {
        Self {
            piece_length: u64::from(piece_length.max(1)),
            total_length,
        }
    }

    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Number of pieces, counting a trailing partial piece.
    pub fn piece_count(&self) -> u32 {
        self.total_length.div_ceil(self.piece_length) as u32
    }

    /// Global byte range covered by `piece`, clamped to the data length.
    pub fn piece_bounds(&self, piece: u32) -> Range<u64> {
        let start = u64::from(piece) * self.piece_length;
        let end = (start + self.piece_length).min(self.total_length);
        start.min(self.total_length)..end
    }

    /// Half-open range of piece indices intersecting the global byte range.
    ///
    /// An empty byte range maps to an empty piece range.
    pub fn pieces_for(&self, bytes: Range<u64>) -> Range<u32> {
        let end = bytes.end.min(self.total_length);
        if bytes.start >= end {
            let at = (bytes.start / self.piece_length) as u32;
            return at..at;
        }
        let first = (bytes.start / self.piece_length) as u32;
        let last = ((end - 1) / self.piece_length) as u32;
        first..last + 1
    }
}

/// Placement of one file within the concatenated torrent data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSpan {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
}

impl FileSpan {
    /// Converts a file-relative byte range into a global one.
    pub fn to_global(&self, file_range: Range<u64>) -> Range<u64> {
        self.offset + file_range.start..self.offset + file_range.end
    }

    /// File-relative part of `global` that lands inside this file.
    pub fn intersect(&self, global: &Range<u64>) -> Option<Range<u64>> {
        let start = global.start.max(self.offset);
        let end = global.end.min(self.offset + self.length);
        (start < end).then(|| start - self.offset..end - self.offset)
    }
}

/// Computes base offsets of every file in declaration order.
pub fn file_spans(files: &[TorrentFile]) -> Vec<FileSpan> {
    let mut offset = 0u64;
    files
        .iter()
        .enumerate()
        .map(|(index, file)| {
            let span = FileSpan {
                index,
                offset,
                length: file.length,
            };
            offset += file.length;
            span
        })
        .collect()
}
