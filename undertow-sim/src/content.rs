//! Seeded content for the simulated swarm.
//!
//! Local files or in-memory buffers are split into pieces and hashed the
//! way a real torrent would be, so the simulated swarm can verify every
//! piece it delivers and derive a stable info hash from the content.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use undertow_core::swarm::{InfoHash, PieceLayout, TorrentFile, TorrentMetadata, file_spans};

use crate::SimulationError;

/// Standard BitTorrent piece size (256KB)
pub const DEFAULT_PIECE_SIZE: u32 = 262_144;

/// Where the seeded bytes of each file come from.
#[derive(Debug, Clone)]
enum ContentSource {
    /// One path per torrent file, in file order.
    Disk(Vec<PathBuf>),
    /// One buffer per torrent file, in file order.
    Memory(Vec<Bytes>),
}

/// Content a simulated swarm can supply, with its piece hashes.
#[derive(Debug, Clone)]
pub struct SeededContent {
    metadata: TorrentMetadata,
    piece_hashes: Vec<[u8; 20]>,
    source: ContentSource,
}

impl SeededContent {
    pub fn metadata(&self) -> &TorrentMetadata {
        &self.metadata
    }

    pub fn info_hash(&self) -> InfoHash {
        self.metadata.info_hash
    }

    /// Reads the original bytes of one piece from the seed source.
    ///
    /// # Errors
    /// - `SimulationError::InvalidContent` - Piece index beyond the content
    /// - `SimulationError::Io` - Seed file unreadable or truncated
    pub async fn read_piece(&self, piece: u32) -> Result<Vec<u8>, SimulationError> {
        let layout = self.metadata.layout();
        if piece >= layout.piece_count() {
            return Err(SimulationError::InvalidContent {
                reason: format!("piece {piece} beyond {} pieces", layout.piece_count()),
            });
        }
        let bounds = layout.piece_bounds(piece);
        let mut data = Vec::with_capacity((bounds.end - bounds.start) as usize);

        for span in file_spans(&self.metadata.files) {
            let Some(local) = span.intersect(&bounds) else {
                continue;
            };
            match &self.source {
                ContentSource::Memory(buffers) => {
                    let buffer = &buffers[span.index];
                    data.extend_from_slice(&buffer[local.start as usize..local.end as usize]);
                }
                ContentSource::Disk(paths) => {
                    let mut file = File::open(&paths[span.index]).await?;
                    file.seek(SeekFrom::Start(local.start)).await?;
                    let start = data.len();
                    data.resize(start + (local.end - local.start) as usize, 0);
                    file.read_exact(&mut data[start..]).await?;
                }
            }
        }
        Ok(data)
    }

    /// Checks `data` against the recorded hash of `piece`.
    pub fn verify_piece(&self, piece: u32, data: &[u8]) -> bool {
        self.piece_hashes
            .get(piece as usize)
            .is_some_and(|expected| *expected == sha1_digest(data))
    }
}

/// Builds [`SeededContent`] from local paths or buffers.
pub struct ContentCreator {
    piece_size: u32,
}

impl Default for ContentCreator {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentCreator {
    /// Creates content creator with default piece size (256KB)
    pub fn new() -> Self {
        Self {
            piece_size: DEFAULT_PIECE_SIZE,
        }
    }

    /// Creates content creator with custom piece size
    pub fn with_piece_size(piece_size: u32) -> Self {
        Self {
            piece_size: piece_size.max(1),
        }
    }

    /// Seeds a single file or a whole directory tree.
    ///
    /// A directory becomes a multi-file torrent named after the directory,
    /// with every non-hidden file below it in sorted path order.
    ///
    /// # Errors
    /// - `SimulationError::InvalidContent` - Path missing, unnamed or empty
    /// - `SimulationError::Io` - Read failure while hashing
    pub async fn from_path(&self, path: &Path) -> Result<SeededContent, SimulationError> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            SimulationError::InvalidContent {
                reason: format!("{}: {e}", path.display()),
            }
        })?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SimulationError::InvalidContent {
                reason: format!("unusable file name: {}", path.display()),
            })?
            .to_string();

        let (files, sources) = if metadata.is_dir() {
            let found = collect_files(path).await?;
            let files = found
                .iter()
                .map(|(relative, length)| {
                    let mut components = vec![name.clone()];
                    components.extend(relative.iter().cloned());
                    TorrentFile {
                        path: components,
                        length: *length,
                    }
                })
                .collect();
            let sources = found
                .iter()
                .map(|(relative, _)| relative.iter().fold(path.to_path_buf(), |p, c| p.join(c)))
                .collect();
            (files, sources)
        } else {
            let file = TorrentFile {
                path: vec![name.clone()],
                length: metadata.len(),
            };
            (vec![file], vec![path.to_path_buf()])
        };

        self.build(name, files, ContentSource::Disk(sources)).await
    }

    /// Seeds in-memory files under a torrent directory called `name`.
    ///
    /// # Errors
    /// - `SimulationError::InvalidContent` - No bytes to seed
    pub async fn from_memory(
        &self,
        name: &str,
        files: Vec<(String, Bytes)>,
    ) -> Result<SeededContent, SimulationError> {
        let torrent_files = files
            .iter()
            .map(|(file_name, data)| TorrentFile {
                path: vec![name.to_string(), file_name.clone()],
                length: data.len() as u64,
            })
            .collect();
        let buffers = files.into_iter().map(|(_, data)| data).collect();
        self.build(name.to_string(), torrent_files, ContentSource::Memory(buffers))
            .await
    }

    async fn build(
        &self,
        name: String,
        files: Vec<TorrentFile>,
        source: ContentSource,
    ) -> Result<SeededContent, SimulationError> {
        let total_length: u64 = files.iter().map(|f| f.length).sum();
        if total_length == 0 {
            return Err(SimulationError::InvalidContent {
                reason: format!("'{name}' contains no data"),
            });
        }

        let mut content = SeededContent {
            metadata: TorrentMetadata {
                info_hash: InfoHash::new([0; 20]),
                name,
                piece_length: self.piece_size,
                total_length,
                files,
            },
            piece_hashes: Vec::new(),
            source,
        };

        let piece_count = PieceLayout::new(self.piece_size, total_length).piece_count();
        let mut piece_hashes = Vec::with_capacity(piece_count as usize);
        for piece in 0..piece_count {
            piece_hashes.push(sha1_digest(&content.read_piece(piece).await?));
        }

        content.metadata.info_hash = info_hash(&content.metadata, &piece_hashes);
        content.piece_hashes = piece_hashes;
        tracing::debug!(
            info_hash = %content.metadata.info_hash,
            name = %content.metadata.name,
            pieces = piece_count,
            "Seeded content hashed"
        );
        Ok(content)
    }
}

/// Non-hidden regular files below `root` as (relative components, length).
async fn collect_files(root: &Path) -> Result<Vec<(Vec<String>, u64)>, SimulationError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_hidden(name) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                pending.push(path);
            } else if metadata.is_file() {
                let relative: Vec<String> = path
                    .strip_prefix(root)
                    .map_err(|_| SimulationError::InvalidContent {
                        reason: format!("{} escapes {}", path.display(), root.display()),
                    })?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push((relative, metadata.len()));
            }
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Hidden and editor backup files are never seeded.
pub(crate) fn is_hidden(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('~')
}

fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&Sha1::digest(data));
    hash
}

/// SHA-1 over the bencoded info dictionary.
fn info_hash(metadata: &TorrentMetadata, piece_hashes: &[[u8; 20]]) -> InfoHash {
    let mut info = Vec::new();
    info.push(b'd');

    // Keys in lexicographic order as bencode requires
    let single = metadata.files.len() == 1 && metadata.files[0].path.len() == 1;
    if single {
        encode_key(&mut info, "length");
        encode_int(&mut info, metadata.total_length);
    } else {
        encode_key(&mut info, "files");
        info.push(b'l');
        for file in &metadata.files {
            info.push(b'd');
            encode_key(&mut info, "length");
            encode_int(&mut info, file.length);
            encode_key(&mut info, "path");
            info.push(b'l');
            // The leading component is the torrent name, not part of the path
            for component in file.path.iter().skip(1) {
                encode_bytes(&mut info, component.as_bytes());
            }
            info.push(b'e');
            info.push(b'e');
        }
        info.push(b'e');
    }
    encode_key(&mut info, "name");
    encode_bytes(&mut info, metadata.name.as_bytes());
    encode_key(&mut info, "piece length");
    encode_int(&mut info, u64::from(metadata.piece_length));
    encode_key(&mut info, "pieces");
    encode_bytes(&mut info, &piece_hashes.concat());
    info.push(b'e');

    InfoHash::new(sha1_digest(&info))
}

fn encode_key(out: &mut Vec<u8>, key: &str) {
    encode_bytes(out, key.as_bytes());
}

fn encode_bytes(out: &mut Vec<u8>, value: &[u8]) {
    out.extend_from_slice(value.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(value);
}

fn encode_int(out: &mut Vec<u8>, value: u64) {
    out.push(b'i');
    out.extend_from_slice(value.to_string().as_bytes());
    out.push(b'e');
}
