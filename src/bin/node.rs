//! Mesh Node Application
//!
//! Joins the LAN mesh, keeps trust state, plays whatever the mesh streams and
//! optionally streams the playlist directory to every device.

use anyhow::{Context as _, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_audio_mesh::{
    audio::{AudioOutput, Playlist, SymphoniaOpener, ToneSource},
    bus::BusHandle,
    config::AppConfig,
    context::Context,
    error::{BusError, Error},
    identity::DeviceId,
    node::Node,
    shutdown::ShutdownSignal,
    sync::{StreamStats, Streamer},
};

const TEST_TONE_HZ: f64 = 440.0;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LAN Audio Mesh node");

    let config = load_config()?;
    let device_id = DeviceId::load_or_create(&DeviceId::default_dir()?)
        .context("could not establish device identity")?;
    let ctx = Context::new(device_id, config);
    tracing::info!("Device id {}", ctx.device_id());

    let mut node = Node::start(ctx.clone())
        .with_context(|| format!("could not start on port {}", ctx.config.discovery.port))?;

    let mut output = match AudioOutput::start(node.renderer(), ctx.sample_rate()) {
        Ok(output) => Some(output),
        Err(e) => {
            tracing::warn!("No audio output, continuing without playback: {}", e);
            None
        }
    };

    let streamer = if ctx.config.streamer.auto_start {
        Some(spawn_streamer(
            ctx.clone(),
            node.bus().clone(),
            node.shutdown_signal(),
        )?)
    } else {
        None
    };

    tracing::info!("Node running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    node.begin_shutdown();

    if let Some(streamer) = streamer {
        match streamer.join() {
            Ok(Ok(stats)) => tracing::info!(
                "Streamed {} chunks ({} frames, {} re-anchors)",
                stats.chunks,
                stats.frames,
                stats.reanchors
            ),
            Ok(Err(Error::Bus(BusError::Closed))) => {
                tracing::info!("Streamer stopped with the bus")
            }
            Ok(Err(e)) => tracing::warn!("Streamer stopped with error: {}", e),
            Err(_) => tracing::error!("Streamer thread panicked"),
        }
    }

    if let Some(output) = output.as_mut() {
        if let Some(e) = output.check_errors() {
            tracing::warn!("Output reported: {}", e);
        }
        tracing::info!("Played {} frames", output.frames_played());
        output.stop();
    }

    let report = node.shutdown();
    tracing::info!(
        "Playout: {} received, {} released, {} late",
        report.playout.received,
        report.playout.released,
        report.playout.late
    );
    if let Some(trust) = &report.trust {
        tracing::info!("Mesh knew {} devices", trust.len());
    }
    tracing::info!(
        "Transport: {} sent, {} received, {} invalid, {} peers seen",
        report.transport.packets_sent,
        report.transport.datagrams_received,
        report.transport.invalid_datagrams,
        report.transport.peers_discovered
    );
    tracing::info!(
        "Bus: {} published, {} dropped",
        report.bus.published,
        report.bus.dropped
    );

    tracing::info!("Node stopped");
    Ok(())
}

/// Stream the playlist directory, or a test tone when it holds nothing
fn spawn_streamer(
    ctx: Arc<Context>,
    bus: BusHandle,
    shutdown: ShutdownSignal,
) -> Result<JoinHandle<Result<StreamStats, Error>>> {
    let handle = thread::Builder::new()
        .name("streamer".into())
        .spawn(move || {
            let streamer = Streamer::new(&ctx, bus);
            let dir = &ctx.config.streamer.playlist_dir;

            let playlist = match Playlist::scan(dir) {
                Ok(playlist) => playlist,
                Err(e) => {
                    tracing::warn!("{}", e);
                    Playlist::default()
                }
            };
            tracing::info!("Streamer started. {} files found", playlist.len());

            if playlist.is_empty() {
                tracing::info!("Nothing to play, streaming a {} Hz test tone", TEST_TONE_HZ);
                let mut tone = ToneSource::new(TEST_TONE_HZ, ctx.sample_rate());
                return streamer.stream(&mut tone, &shutdown);
            }

            let opener = SymphoniaOpener::new(ctx.sample_rate());
            streamer.play_playlist(&playlist, &opener, &shutdown)
        })?;
    Ok(handle)
}

/// Config from the first argument, else the per-user default location
fn load_config() -> Result<AppConfig> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(AppConfig::default_path);

    let config = match path {
        Some(path) => {
            tracing::info!("Loading config from {}", path.display());
            AppConfig::load(&path)?
        }
        None => AppConfig::default(),
    };
    config.validate()?;
    Ok(config)
}
