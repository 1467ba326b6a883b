//! Probe result cache keyed by (content identifier, file index).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use super::SubtitleTrack;
use crate::session::SessionEvictor;
use crate::swarm::InfoHash;

#[derive(Debug, Clone)]
struct CacheEntry {
    tracks: Vec<SubtitleTrack>,
    probed_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<(InfoHash, usize), CacheEntry>,
    /// Evictions seen per session
    generations: HashMap<InfoHash, u64>,
}

/// Memoized subtitle probes with a fixed time-to-live.
///
/// Entries are advisory: a stale or missing entry only means the caller
/// probes again. Inserts carry the session generation read before probing,
/// so a probe outliving its session's eviction is dropped.
#[derive(Debug, Clone)]
pub struct ProbeCache {
    state: Arc<RwLock<CacheState>>,
    ttl: Duration,
}

impl ProbeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(CacheState::default())),
            ttl,
        }
    }

    /// Fresh tracks for the file, if any.
    pub fn get(&self, info_hash: InfoHash, file_index: usize) -> Option<Vec<SubtitleTrack>> {
        self.state
            .read()
            .entries
            .get(&(info_hash, file_index))
            .filter(|entry| entry.probed_at.elapsed() < self.ttl)
            .map(|entry| entry.tracks.clone())
    }

    /// Current eviction generation of a session.
    pub fn generation(&self, info_hash: InfoHash) -> u64 {
        self.state
            .read()
            .generations
            .get(&info_hash)
            .copied()
            .unwrap_or_default()
    }

    /// Stores tracks unless the session was evicted since `generation`.
    ///
    /// Returns whether the entry was stored.
    pub fn insert(
        &self,
        info_hash: InfoHash,
        file_index: usize,
        generation: u64,
        tracks: Vec<SubtitleTrack>,
    ) -> bool {
        let mut state = self.state.write();
        let current = state.generations.get(&info_hash).copied().unwrap_or_default();
        if current != generation {
            return false;
        }
        state.entries.insert(
            (info_hash, file_index),
            CacheEntry {
                tracks,
                probed_at: Instant::now(),
            },
        );
        true
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionEvictor for ProbeCache {
    fn evict(&self, info_hash: InfoHash) {
        let mut state = self.state.write();
        state
            .entries
            .retain(|(entry_hash, _), _| *entry_hash != info_hash);
        *state.generations.entry(info_hash).or_default() += 1;
    }
}
