//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Subcommand;
use undertow_core::config::UndertowConfig;
use undertow_core::subtitles::{FfprobeInspector, MediaInspector, SubtitleTrack, to_webvtt};
use undertow_sim::{ContentCreator, SimulatedSwarm};
use undertow_web::{AppState, run_server};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming server backed by the simulated swarm
    Server {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
        /// Directory whose top-level entries are seeded as torrents
        #[arg(long)]
        library: Option<PathBuf>,
        /// Directory where downloaded files are materialized
        #[arg(long)]
        download_dir: Option<PathBuf>,
    },
    /// List embedded subtitle tracks of a local media file
    Probe {
        /// Media file to inspect
        file: PathBuf,
    },
    /// Convert a sidecar subtitle file to WebVTT
    Convert {
        /// SubRip or WebVTT input file
        input: PathBuf,
        /// Output path; stdout when omitted
        output: Option<PathBuf>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Server {
            host,
            port,
            library,
            download_dir,
        } => start_server(host, port, library, download_dir).await,
        Commands::Probe { file } => probe_file(&file).await,
        Commands::Convert { input, output } => convert_file(&input, output.as_deref()).await,
    }
}

/// Start the HTTP server, seeding the library first when one is given.
///
/// # Errors
/// - Library directory unreadable
/// - Listening address unavailable
pub async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    library: Option<PathBuf>,
    download_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = UndertowConfig::from_env();
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(download_dir) = download_dir {
        config.session.download_dir = download_dir;
    }

    tokio::fs::create_dir_all(&config.session.download_dir)
        .await
        .with_context(|| {
            format!(
                "creating download directory {}",
                config.session.download_dir.display()
            )
        })?;

    let swarm = SimulatedSwarm::new(
        config.simulation.clone(),
        config.session.download_dir.clone(),
    );

    match library {
        Some(library) => {
            let locators = swarm
                .seed_library(&library, &ContentCreator::new())
                .await
                .with_context(|| format!("seeding library {}", library.display()))?;
            println!(
                "Seeded {} torrents from {}",
                locators.len(),
                library.display()
            );
            for locator in &locators {
                println!("  {}", locator.to_magnet());
            }
        }
        None => {
            tracing::warn!("No --library given, added torrents will never resolve");
        }
    }

    let state = AppState::new(Arc::new(swarm), &config);
    println!(
        "Undertow streaming server running on http://{}:{}",
        config.server.host, config.server.port
    );
    run_server(state, &config.server)
        .await
        .map_err(|e| anyhow::anyhow!(e))
}

/// Print subtitle tracks of a local file.
///
/// # Errors
/// - File missing
/// - `ffprobe` failed to run or produced unreadable output
pub async fn probe_file(file: &Path) -> anyhow::Result<()> {
    if !file.is_file() {
        bail!("{} is not a file", file.display());
    }
    let config = UndertowConfig::from_env();
    let inspector = FfprobeInspector::new(config.subtitles.ffprobe_path);
    let tracks = inspector
        .probe(file)
        .await
        .with_context(|| format!("probing {}", file.display()))?;

    if tracks.is_empty() {
        println!("No subtitle tracks in {}", file.display());
        return Ok(());
    }
    for track in &tracks {
        println!("{}", describe_track(track));
    }
    Ok(())
}

fn describe_track(track: &SubtitleTrack) -> String {
    let mut line = format!(
        "#{:<3} {:<20} {}",
        track.stream_index,
        track.codec,
        track.language.as_deref().unwrap_or("und")
    );
    if let Some(title) = &track.title {
        line.push_str(&format!(" \"{title}\""));
    }
    if track.default {
        line.push_str(" [default]");
    }
    if track.forced {
        line.push_str(" [forced]");
    }
    if !track.text_based {
        line.push_str(" [image]");
    }
    line
}

/// Convert a sidecar subtitle file to WebVTT.
///
/// # Errors
/// - Input unreadable or output unwritable
/// - `SubtitleError::UnsupportedFormat` - Input is not SubRip or WebVTT
pub async fn convert_file(input: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let data = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    let name = input
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let vtt = to_webvtt(name, &data)?;

    match output {
        Some(output) => {
            tokio::fs::write(output, vtt)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            tracing::info!(input = %input.display(), output = %output.display(), "Converted subtitles");
        }
        None => print!("{vtt}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_track() {
        let track = SubtitleTrack {
            stream_index: 3,
            codec: "hdmv_pgs_subtitle".to_string(),
            language: None,
            title: Some("Signs".to_string()),
            forced: true,
            default: false,
            text_based: false,
        };
        let line = describe_track(&track);
        assert!(line.starts_with("#3"));
        assert!(line.contains("und"));
        assert!(line.contains("\"Signs\""));
        assert!(line.ends_with("[forced] [image]"));
    }

    #[tokio::test]
    async fn test_convert_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("movie.srt");
        let output = dir.path().join("movie.vtt");
        std::fs::write(&input, "1\n00:00:01,000 --> 00:00:02,000\nHi\n").unwrap();

        convert_file(&input, Some(&output)).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "WEBVTT\n\n1\n00:00:01.000 --> 00:00:02.000\nHi\n"
        );
    }

    #[tokio::test]
    async fn test_convert_rejects_ass() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("movie.ass");
        std::fs::write(&input, "[Script Info]\n").unwrap();
        assert!(convert_file(&input, None).await.is_err());
    }
}
