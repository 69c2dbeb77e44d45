//! Audio Player (cadenza-ap) - Main entry point
//!
//! Plays the files given on the command line through the transport engine
//! and reads simple transport commands from stdin.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cadenza_ap::audio::{
    device_session, list_devices, AudioSink, DeviceOptions, NullSink, WavCaptureSink,
};
use cadenza_ap::playback::Track;
use cadenza_ap::services::InMemoryCatalog;
use cadenza_ap::snapshot::TransportSnapshot;
use cadenza_ap::{Engine, TransportHandle};
use cadenza_common::config::TransportSettings;
use cadenza_common::events::TransportEvent;
use cadenza_common::time::format_secs;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for cadenza-ap
#[derive(Parser, Debug)]
#[command(name = "cadenza-ap")]
#[command(about = "Crossfading audio transport")]
#[command(version)]
struct Args {
    /// Audio files to queue, in order
    files: Vec<PathBuf>,

    /// Settings file (TOML)
    #[arg(short, long, env = "CADENZA_CONFIG")]
    config: Option<PathBuf>,

    /// Crossfade length in seconds (overrides the settings file)
    #[arg(long)]
    crossfade: Option<f64>,

    /// Disable crossfading
    #[arg(long, conflicts_with = "crossfade")]
    no_crossfade: bool,

    /// Output device name (default: the system default device)
    #[arg(long, env = "CADENZA_DEVICE")]
    device: Option<String>,

    /// Frames per device callback (default: chosen by the device)
    #[arg(long)]
    buffer_frames: Option<u32>,

    /// Print the available output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Write the mixed output to a WAV file instead of playing it
    #[arg(long, conflicts_with = "null_output")]
    capture: Option<PathBuf>,

    /// Render without any output device, discarding the audio
    #[arg(long)]
    null_output: bool,

    /// Persist and restore the transport snapshot at this path
    #[arg(long, env = "CADENZA_SNAPSHOT")]
    snapshot: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadenza_ap=info,cadenza_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        for name in list_devices().context("Failed to list output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    info!(
        "Starting cadenza-ap {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("CADENZA_GIT_HASH"),
        env!("CADENZA_BUILD_TIMESTAMP"),
        env!("CADENZA_BUILD_PROFILE")
    );

    let mut settings =
        TransportSettings::resolve(args.config.as_deref()).context("Failed to load settings")?;
    if let Some(secs) = args.crossfade {
        settings.crossfade.duration_secs = secs;
        settings.crossfade.max_duration_secs = settings.crossfade.max_duration_secs.max(secs);
    }
    if args.no_crossfade {
        settings.crossfade.enabled = false;
    }
    if args.snapshot.is_some() {
        settings.snapshot_path = args.snapshot.clone();
    }
    settings.validate().context("Invalid settings")?;

    let tracks: Vec<Track> = args.files.iter().map(|p| Track::from_path(p)).collect();
    let catalog: Arc<InMemoryCatalog> = Arc::new(tracks.iter().cloned().collect());

    let restore_from = settings
        .snapshot_path
        .clone()
        .filter(|path| path.exists());

    let use_device = args.capture.is_none() && !args.null_output;
    let session = if use_device {
        let session = device_session(args.device.as_deref())
            .context("Failed to open the output device (try --capture or --null-output)")?;
        Some(Arc::new(session))
    } else {
        None
    };

    let mut builder = Engine::builder(settings).catalog(catalog);
    if let Some(session) = &session {
        builder = builder.session(session.clone());
    }
    let mut engine = builder.start();
    let handle = engine.handle();

    match (&args.capture, session) {
        (_, Some(session)) => {
            let options = DeviceOptions {
                device_name: args.device.clone(),
                buffer_frames: args.buffer_frames,
                session: Some(session),
            };
            engine
                .spawn_device_output(options)
                .await
                .context("Failed to start audio output")?;
        }
        (Some(path), None) => {
            let format = engine.render_graph().format();
            let sink: Box<dyn AudioSink> = Box::new(
                WavCaptureSink::create(path, format)
                    .with_context(|| format!("Failed to create {}", path.display()))?,
            );
            engine
                .spawn_output(sink)
                .context("Failed to start capture output")?;
        }
        (None, None) => {
            info!("Discarding output (--null-output)");
            engine
                .spawn_output(Box::new(NullSink::new()))
                .context("Failed to start null output")?;
        }
    }

    tokio::spawn(log_events(handle.subscribe()));

    match (restore_from, tracks.first()) {
        (Some(path), _) => {
            let snapshot = TransportSnapshot::load(&path)
                .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
            info!("Restoring transport from {}", path.display());
            handle.restore(snapshot).await?;
        }
        (None, Some(first)) => {
            handle.play_track(first.clone(), tracks.clone()).await?;
        }
        (None, None) => info!("Nothing queued; pass audio files to play"),
    }

    tokio::select! {
        result = command_loop(handle.clone()) => {
            if let Err(e) = result {
                error!("Command input failed: {:#}", e);
            }
        }
        _ = shutdown_signal() => {}
    }

    engine.shutdown().await.context("Engine shutdown failed")?;
    info!("Shutdown complete");
    Ok(())
}

/// Read transport commands from stdin until `quit` or end of input
async fn command_loop(handle: TransportHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let result = match command {
            "play" => handle.play().await,
            "pause" => handle.pause().await,
            "stop" => handle.stop().await,
            "next" => handle.next().await,
            "prev" => handle.previous().await,
            "seek" => match words.next().and_then(|w| w.parse::<f64>().ok()) {
                Some(secs) => handle.seek(secs).await,
                None => {
                    println!("usage: seek <seconds>");
                    continue;
                }
            },
            "shuffle" => handle.toggle_shuffle().await.map(|on| {
                println!("shuffle {}", if on { "on" } else { "off" });
            }),
            "loop" => handle
                .cycle_loop_mode()
                .await
                .map(|mode| println!("loop {}", mode)),
            "xfade" => match words.next().and_then(|w| w.parse::<usize>().ok()) {
                Some(index) => {
                    let secs = words.next().and_then(|w| w.parse::<f64>().ok());
                    handle.crossfade_to(index, secs).await
                }
                None => {
                    println!("usage: xfade <index> [seconds]");
                    continue;
                }
            },
            "status" => handle.status().await.map(|status| {
                let title = status
                    .current_track
                    .as_ref()
                    .map(|t| t.title.as_str())
                    .unwrap_or("-");
                println!(
                    "{} '{}' {}/{} [{}/{}]{}{}",
                    status.state,
                    title,
                    format_secs(status.playback_time),
                    format_secs(status.duration),
                    status.current_index + usize::from(!status.queue.is_empty()),
                    status.queue.len(),
                    if status.is_shuffled { " shuffle" } else { "" },
                    if status.is_crossfading { " crossfading" } else { "" },
                );
            }),
            "quit" | "exit" => return Ok(()),
            other => {
                println!(
                    "unknown command '{}' (play pause stop next prev seek shuffle loop xfade status quit)",
                    other
                );
                continue;
            }
        };
        if let Err(e) = result {
            println!("error: {}", e);
        }
    }
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<TransportEvent>) {
    loop {
        match events.recv().await {
            Ok(TransportEvent::PlaybackProgress { .. }) => {}
            Ok(TransportEvent::TrackChanged { title, index, .. }) => {
                info!("Now playing [{}] {}", index, title.as_deref().unwrap_or("-"));
            }
            Ok(TransportEvent::TrackUnavailable { reason, .. }) => {
                warn!("Track unavailable: {}", reason);
            }
            Ok(event) => info!("Event: {}", event.event_type()),
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Event log skipped {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
