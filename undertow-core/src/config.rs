//! Centralized configuration for Undertow.
//!
//! All tunable parameters live here so timeouts and window sizes are never
//! hard-coded in the components that use them.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Undertow components.
///
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct UndertowConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub streaming: StreamingConfig,
    pub subtitles: SubtitleConfig,
    pub simulation: SimulationConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound for resolving torrent metadata from the swarm
    pub join_timeout: Duration,
    /// Where swarm engines materialize downloaded files
    pub download_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(30),
            download_dir: std::env::temp_dir().join("undertow"),
        }
    }
}

/// Streaming scheduler settings.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Bytes ahead of the read cursor fetched at critical priority
    pub lookahead_bytes: u64,
    /// Cursor jump beyond which a request counts as a seek
    pub seek_threshold: u64,
    /// Longest wait without any requested piece arriving
    pub stall_timeout: Duration,
    /// Size of body chunks read from disk
    pub chunk_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            lookahead_bytes: 8 * 1024 * 1024, // 8 MiB
            seek_threshold: 8 * 1024 * 1024,
            stall_timeout: Duration::from_secs(20),
            chunk_size: 256 * 1024, // 256 KiB
        }
    }
}

/// Subtitle probing and extraction settings.
#[derive(Debug, Clone)]
pub struct SubtitleConfig {
    /// Leading bytes that must be present before probing
    pub probe_prefix_bytes: u64,
    /// Bound on prefix wait plus probe subprocess
    pub probe_timeout: Duration,
    /// Age after which cached probe results are re-probed
    pub cache_ttl: Duration,
    pub ffprobe_path: PathBuf,
    pub ffmpeg_path: PathBuf,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            probe_prefix_bytes: 4 * 1024 * 1024, // 4 MiB
            probe_timeout: Duration::from_secs(15),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            ffprobe_path: PathBuf::from("ffprobe"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

/// Simulated swarm parameters used in development and tests.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Aggregate download speed in bytes per second
    pub download_speed: u64,
    /// Number of simulated peers; zero means nothing is ever supplied
    pub peers: u32,
    /// Delay before metadata resolves
    pub metadata_delay: Duration,
    /// Interval between delivery rounds
    pub tick_interval: Duration,
    /// Deterministic seed for throughput jitter
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            download_speed: 4 * 1024 * 1024, // 4 MiB/s
            peers: 24,
            metadata_delay: Duration::from_millis(250),
            tick_interval: Duration::from_millis(50),
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Fast, jitter-free swarm for tests.
    pub fn deterministic_testing() -> Self {
        Self {
            download_speed: 64 * 1024 * 1024,
            peers: 8,
            metadata_delay: Duration::ZERO,
            tick_interval: Duration::from_millis(5),
            seed: Some(42),
        }
    }
}

impl UndertowConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparsable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("UNDERTOW_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("UNDERTOW_PORT") {
            config.server.port = port;
        }
        if let Some(bytes) = env_parse::<u64>("UNDERTOW_LOOKAHEAD_BYTES") {
            config.streaming.lookahead_bytes = bytes;
            config.streaming.seek_threshold = bytes;
        }
        if let Some(seconds) = env_parse::<u64>("UNDERTOW_STALL_TIMEOUT_SECS") {
            config.streaming.stall_timeout = Duration::from_secs(seconds);
        }
        if let Some(seconds) = env_parse::<u64>("UNDERTOW_JOIN_TIMEOUT_SECS") {
            config.session.join_timeout = Duration::from_secs(seconds);
        }
        if let Some(seconds) = env_parse::<u64>("UNDERTOW_PROBE_TIMEOUT_SECS") {
            config.subtitles.probe_timeout = Duration::from_secs(seconds);
        }
        if let Some(seconds) = env_parse::<u64>("UNDERTOW_CACHE_TTL_SECS") {
            config.subtitles.cache_ttl = Duration::from_secs(seconds);
        }
        if let Ok(dir) = std::env::var("UNDERTOW_DOWNLOAD_DIR") {
            config.session.download_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("UNDERTOW_FFPROBE") {
            config.subtitles.ffprobe_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("UNDERTOW_FFMPEG") {
            config.subtitles.ffmpeg_path = PathBuf::from(path);
        }

        config
    }

    /// Creates a configuration with short timeouts for tests.
    pub fn for_testing() -> Self {
        Self {
            session: SessionConfig {
                join_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            streaming: StreamingConfig {
                lookahead_bytes: 64 * 1024,
                seek_threshold: 64 * 1024,
                stall_timeout: Duration::from_secs(2),
                chunk_size: 16 * 1024,
            },
            subtitles: SubtitleConfig {
                probe_prefix_bytes: 32 * 1024,
                probe_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            simulation: SimulationConfig::deterministic_testing(),
            ..Default::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}
