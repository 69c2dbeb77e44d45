//! Transport engine
//!
//! **Module Structure:**
//! - `core.rs`: controller state, owner loop, published status
//! - `commands.rs`: user command handlers
//! - `crossfade.rs`: crossfade preparation, ramp, completion and abort
//! - `lifecycle.rs`: load results, render completions, ticks, session signals
//!
//! `Engine::builder(..).start()` spawns the owner task and returns the
//! engine; `TransportHandle` is the cloneable command surface.

mod commands;
mod core;
mod crossfade;
mod lifecycle;

use self::core::TransportController;
use super::events::{Command, EngineMessage, Reply};
use super::generation::GenerationGuard;
use super::loader::LoaderServices;
use super::render::{RenderGraph, Renderer};
use super::types::Track;
use crate::audio::decoder::{SourceOpener, SymphoniaOpener};
use crate::audio::device::{DeviceOptions, DeviceOutput};
use crate::audio::output::{spawn_render_thread, AudioSink, RenderThread, RENDER_QUANTUM_FRAMES};
use crate::error::{Error, Result};
use crate::services::{
    BookmarkResolver, Catalog, CloudCollaborator, ConfigStore, InMemoryCatalog, LocalOnlyCloud,
    NoBookmarks, SettingsStore,
};
use crate::session::{SessionAdapter, SoftwareSession};
use crate::snapshot::TransportSnapshot;
use crate::state::{PlayerStatus, SharedState};
use cadenza_common::config::TransportSettings;
use cadenza_common::events::{LoopMode, TransportEvent};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Collaborators handed to the controller
pub(crate) struct EngineServices {
    pub catalog: Arc<dyn Catalog>,
    pub config: Arc<dyn ConfigStore>,
    pub session: Arc<dyn SessionAdapter>,
    pub loader: LoaderServices,
}

pub struct EngineBuilder {
    settings: TransportSettings,
    opener: Arc<dyn SourceOpener>,
    catalog: Arc<dyn Catalog>,
    cloud: Arc<dyn CloudCollaborator>,
    bookmarks: Arc<dyn BookmarkResolver>,
    config: Option<Arc<dyn ConfigStore>>,
    session: Arc<dyn SessionAdapter>,
    shuffle_seed: Option<u64>,
}

impl EngineBuilder {
    pub fn new(settings: TransportSettings) -> Self {
        Self {
            settings,
            opener: Arc::new(SymphoniaOpener),
            catalog: Arc::new(InMemoryCatalog::new()),
            cloud: Arc::new(LocalOnlyCloud),
            bookmarks: Arc::new(NoBookmarks),
            config: None,
            session: Arc::new(SoftwareSession::default()),
            shuffle_seed: None,
        }
    }

    pub fn opener(mut self, opener: Arc<dyn SourceOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn cloud(mut self, cloud: Arc<dyn CloudCollaborator>) -> Self {
        self.cloud = cloud;
        self
    }

    pub fn bookmarks(mut self, bookmarks: Arc<dyn BookmarkResolver>) -> Self {
        self.bookmarks = bookmarks;
        self
    }

    /// Live crossfade settings; defaults to a store seeded from the settings
    pub fn config_store(mut self, config: Arc<dyn ConfigStore>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn session(mut self, session: Arc<dyn SessionAdapter>) -> Self {
        self.session = session;
        self
    }

    /// Deterministic shuffle order
    pub fn shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Spawn the owner task; must be called inside a tokio runtime
    pub fn start(self) -> Engine {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SharedState::default());
        let guard = Arc::new(GenerationGuard::new());
        let graph = RenderGraph::new(self.session.output_format(), tx.clone());

        let config = self
            .config
            .unwrap_or_else(|| Arc::new(SettingsStore::new(self.settings.crossfade.clone())));
        let services = EngineServices {
            catalog: self.catalog,
            config,
            session: Arc::clone(&self.session),
            loader: LoaderServices {
                opener: self.opener,
                bookmarks: self.bookmarks,
                cloud: self.cloud,
            },
        };
        let rng = match self.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        forward_session_signals(self.session.subscribe(), tx.clone());

        let controller = TransportController::new(
            self.settings,
            services,
            Arc::clone(&graph),
            tx.clone(),
            Arc::clone(&shared),
            guard,
            rng,
        );
        let task = tokio::spawn(controller.run(rx));
        info!("Transport engine started");

        Engine {
            handle: TransportHandle { tx, shared },
            graph,
            task: Some(task),
            output: None,
        }
    }
}

fn forward_session_signals(
    mut signals: broadcast::Receiver<crate::session::SessionSignal>,
    tx: mpsc::UnboundedSender<EngineMessage>,
) {
    tokio::spawn(async move {
        loop {
            match signals.recv().await {
                Ok(signal) => {
                    if tx.send(EngineMessage::Session(signal)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Dropped {} session signals", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Whatever is pulling frames from the render graph
enum ActiveOutput {
    Render(RenderThread),
    Device(DeviceOutput),
}

impl ActiveOutput {
    fn stop(self) {
        match self {
            ActiveOutput::Render(thread) => thread.stop(),
            ActiveOutput::Device(device) => device.stop(),
        }
    }
}

/// A running transport engine
pub struct Engine {
    handle: TransportHandle,
    graph: Arc<RenderGraph>,
    task: Option<JoinHandle<()>>,
    output: Option<ActiveOutput>,
}

impl Engine {
    pub fn builder(settings: TransportSettings) -> EngineBuilder {
        EngineBuilder::new(settings)
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    pub fn render_graph(&self) -> Arc<RenderGraph> {
        Arc::clone(&self.graph)
    }

    /// Renderer for driving the graph by hand instead of a render thread
    pub fn renderer(&self) -> Renderer {
        self.graph.renderer()
    }

    /// Start the render thread feeding `sink`
    pub fn spawn_output(&mut self, sink: Box<dyn AudioSink>) -> Result<()> {
        if self.output.is_some() {
            return Err(Error::InvalidState("output already running".to_string()));
        }
        self.output = Some(ActiveOutput::Render(spawn_render_thread(
            Arc::clone(&self.graph),
            sink,
            RENDER_QUANTUM_FRAMES,
        )?));
        Ok(())
    }

    /// Play through an audio device; its callback drives the render clock
    ///
    /// Returns the name of the opened device.
    pub async fn spawn_device_output(&mut self, options: DeviceOptions) -> Result<String> {
        if self.output.is_some() {
            return Err(Error::InvalidState("output already running".to_string()));
        }
        let graph = Arc::clone(&self.graph);
        let device = tokio::task::spawn_blocking(move || DeviceOutput::start(graph, options))
            .await
            .map_err(|e| Error::AudioOutput(format!("device startup failed: {}", e)))??;
        let name = device.device_name().to_string();
        info!("Playing through '{}'", name);
        self.output = Some(ActiveOutput::Device(device));
        Ok(name)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.handle.subscribe()
    }

    /// Stop playback, persist the snapshot and wait for the owner task
    pub async fn shutdown(mut self) -> Result<()> {
        let result = self.handle.shutdown().await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        if let Some(output) = self.output.take() {
            tokio::task::spawn_blocking(move || output.stop())
                .await
                .map_err(|e| Error::AudioOutput(format!("output thread join failed: {}", e)))?;
        }
        result
    }
}

/// Cloneable command surface of the engine
#[derive(Clone)]
pub struct TransportHandle {
    tx: mpsc::UnboundedSender<EngineMessage>,
    shared: Arc<SharedState>,
}

impl TransportHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineMessage::Command(make(reply)))
            .map_err(|_| Error::EngineShutdown)?;
        rx.await.map_err(|_| Error::EngineShutdown)?
    }

    pub async fn play(&self) -> Result<()> {
        self.request(Command::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Command::Pause).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    pub async fn seek(&self, time_secs: f64) -> Result<()> {
        self.request(|reply| Command::Seek(time_secs, reply)).await
    }

    pub async fn next(&self) -> Result<()> {
        self.request(|reply| Command::Next {
            autoplay: None,
            reply,
        })
        .await
    }

    pub async fn next_with(&self, autoplay: bool) -> Result<()> {
        self.request(|reply| Command::Next {
            autoplay: Some(autoplay),
            reply,
        })
        .await
    }

    pub async fn previous(&self) -> Result<()> {
        self.request(|reply| Command::Previous {
            autoplay: None,
            reply,
        })
        .await
    }

    pub async fn previous_with(&self, autoplay: bool) -> Result<()> {
        self.request(|reply| Command::Previous {
            autoplay: Some(autoplay),
            reply,
        })
        .await
    }

    /// Replace the queue with `queue` and play `track` from it
    pub async fn play_track(&self, track: Track, queue: Vec<Track>) -> Result<()> {
        self.request(|reply| Command::PlayTrack { track, queue, reply })
            .await
    }

    pub async fn load_track(&self, track: Track, preserve_position: bool) -> Result<()> {
        self.request(|reply| Command::LoadTrack {
            track,
            preserve_position,
            reply,
        })
        .await
    }

    /// Returns the new shuffle flag
    pub async fn toggle_shuffle(&self) -> Result<bool> {
        self.request(Command::ToggleShuffle).await
    }

    pub async fn cycle_loop_mode(&self) -> Result<LoopMode> {
        self.request(Command::CycleLoopMode).await
    }

    /// Crossfade to the queue entry at `index` (configured duration if None)
    pub async fn crossfade_to(&self, index: usize, duration_secs: Option<f64>) -> Result<()> {
        self.request(|reply| Command::CrossfadeTo {
            index,
            duration_secs,
            reply,
        })
        .await
    }

    pub async fn restore(&self, snapshot: TransportSnapshot) -> Result<()> {
        self.request(|reply| Command::Restore(Box::new(snapshot), reply))
            .await
    }

    /// Status as of now, after all previously sent commands
    pub async fn status(&self) -> Result<PlayerStatus> {
        self.request(Command::Status).await
    }

    /// Last published status, without a round trip to the owner task
    pub async fn published_status(&self) -> PlayerStatus {
        self.shared.status().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.subscribe()
    }
}
