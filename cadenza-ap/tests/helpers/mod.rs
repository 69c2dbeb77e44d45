//! Test harness for transport engine integration tests
//!
//! Provides:
//! - MemoryOpener: in-memory sources keyed by path, with drop counting
//! - GatedOpener: holds every open until the test releases it
//! - TestEngine: engine wrapper that renders and advances the paused tokio
//!   clock in lockstep, 10 ms per step

#![allow(dead_code)]

use async_trait::async_trait;
use cadenza_ap::audio::{FrameSource, PcmSource, SourceOpener};
use cadenza_ap::error::LoadError;
use cadenza_ap::playback::{Locator, Renderer, Track};
use cadenza_ap::session::{SessionAdapter, SoftwareSession};
use cadenza_ap::{Engine, EngineBuilder, PlayerStatus, TransportHandle};
use cadenza_common::config::TransportSettings;
use cadenza_common::events::TransportEvent;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};

pub const RATE: u32 = 44_100;
pub const STEP_MS: u64 = 10;

/// Frames rendered per lockstep step
pub const STEP_FRAMES: usize = (RATE as u64 * STEP_MS / 1000) as usize;

/// Source that counts its own drops
pub struct CountedSource {
    inner: PcmSource,
    drops: Arc<AtomicUsize>,
    /// Reads fail once this many frames were delivered
    fail_at: Option<u64>,
    delivered: u64,
}

impl FrameSource for CountedSource {
    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn frame_length(&self) -> u64 {
        self.inner.frame_length()
    }

    fn seek(&mut self, frame: u64) {
        self.inner.seek(frame)
    }

    fn read(&mut self, out: &mut [f32]) -> cadenza_ap::Result<usize> {
        if self.fail_at.is_some_and(|at| self.delivered >= at) {
            return Err(cadenza_ap::Error::Decode("corrupt packet".to_string()));
        }
        let frames = self.inner.read(out)?;
        self.delivered += frames as u64;
        Ok(frames)
    }
}

impl Drop for CountedSource {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct MemoryFile {
    secs: f64,
    rate: u32,
    level: f32,
    fail_after_secs: Option<f64>,
}

/// Opener serving constant-level stereo PCM from memory
#[derive(Default)]
pub struct MemoryOpener {
    files: Mutex<HashMap<PathBuf, MemoryFile>>,
    opens: Mutex<HashMap<PathBuf, usize>>,
    drops: Mutex<HashMap<PathBuf, Arc<AtomicUsize>>>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, path: &str, secs: f64, rate: u32, level: f32) {
        self.files.lock().unwrap().insert(
            PathBuf::from(path),
            MemoryFile {
                secs,
                rate,
                level,
                fail_after_secs: None,
            },
        );
    }

    /// File whose reads start failing `fail_after_secs` into playback
    pub fn add_failing(&self, path: &str, secs: f64, fail_after_secs: f64) {
        self.files.lock().unwrap().insert(
            PathBuf::from(path),
            MemoryFile {
                secs,
                rate: RATE,
                level: 0.5,
                fail_after_secs: Some(fail_after_secs),
            },
        );
    }

    /// Times `path` was opened
    pub fn opens(&self, path: &str) -> usize {
        self.opens
            .lock()
            .unwrap()
            .get(Path::new(path))
            .copied()
            .unwrap_or(0)
    }

    /// Sources opened from `path` that have since been dropped
    pub fn drops(&self, path: &str) -> usize {
        self.drops
            .lock()
            .unwrap()
            .get(Path::new(path))
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn open_now(&self, path: &Path) -> Result<Box<dyn FrameSource>, LoadError> {
        let file = self
            .files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| LoadError::FileNotFound(path.to_path_buf()))?;
        let inner = PcmSource::constant(file.level, file.secs, file.rate, 2)
            .map_err(|e| LoadError::InvalidAudioFile(e.to_string()))?;
        *self.opens.lock().unwrap().entry(path.to_path_buf()).or_default() += 1;
        let drops = Arc::clone(
            self.drops
                .lock()
                .unwrap()
                .entry(path.to_path_buf())
                .or_default(),
        );
        Ok(Box::new(CountedSource {
            inner,
            drops,
            fail_at: file
                .fail_after_secs
                .map(|secs| (secs * file.rate as f64) as u64),
            delivered: 0,
        }))
    }
}

#[async_trait]
impl SourceOpener for MemoryOpener {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, LoadError> {
        self.open_now(path)
    }
}

/// Opener that blocks every open until permits are released
pub struct GatedOpener {
    inner: Arc<MemoryOpener>,
    gate: Semaphore,
    started: AtomicUsize,
}

impl GatedOpener {
    pub fn new(inner: Arc<MemoryOpener>) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
        }
    }

    pub fn release(&self, opens: usize) {
        self.gate.add_permits(opens);
    }

    /// Opens that reached the gate
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceOpener for GatedOpener {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, LoadError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| LoadError::InvalidAudioFile(e.to_string()))?;
        permit.forget();
        self.inner.open_now(path)
    }
}

pub fn track(path: &str, title: &str) -> Track {
    Track::new(title, Locator::local(path))
}

/// Default settings with the given crossfade length and no resume fade
pub fn settings(crossfade_secs: f64) -> TransportSettings {
    let mut settings = TransportSettings::default();
    settings.crossfade.duration_secs = crossfade_secs;
    settings.resume_fade_in_ms = 0;
    settings
}

pub struct TestEngine {
    pub engine: Engine,
    pub handle: TransportHandle,
    pub renderer: Renderer,
    pub session: Arc<SoftwareSession>,
    pub events: broadcast::Receiver<TransportEvent>,
}

impl TestEngine {
    pub fn start(settings: TransportSettings, opener: Arc<dyn SourceOpener>) -> Self {
        Self::start_with(settings, opener, |builder| builder)
    }

    /// Start with extra builder configuration (catalog, bookmarks, cloud)
    pub fn start_with(
        settings: TransportSettings,
        opener: Arc<dyn SourceOpener>,
        configure: impl FnOnce(EngineBuilder) -> EngineBuilder,
    ) -> Self {
        Self::start_on(
            settings,
            opener,
            Arc::new(SoftwareSession::default()),
            configure,
        )
    }

    /// Start against a prepared session (restricted rates, preset format)
    pub fn start_on(
        settings: TransportSettings,
        opener: Arc<dyn SourceOpener>,
        session: Arc<SoftwareSession>,
        configure: impl FnOnce(EngineBuilder) -> EngineBuilder,
    ) -> Self {
        let builder = Engine::builder(settings)
            .opener(opener)
            .session(Arc::clone(&session) as Arc<dyn SessionAdapter>)
            .shuffle_seed(7);
        let engine = configure(builder).start();
        let handle = engine.handle();
        let renderer = engine.renderer();
        let events = engine.subscribe();
        Self {
            engine,
            handle,
            renderer,
            session,
            events,
        }
    }

    /// Let spawned loads, timers and the owner task drain their queues
    pub async fn settle(&self) {
        for _ in 0..3 {
            for _ in 0..16 {
                tokio::task::yield_now().await;
            }
            let _ = self.handle.status().await;
        }
    }

    /// Render `ms` of output and advance the clock with it
    pub async fn run_for(&mut self, ms: u64) {
        for _ in 0..(ms / STEP_MS) {
            self.renderer.render_frames(STEP_FRAMES);
            tokio::time::advance(Duration::from_millis(STEP_MS)).await;
            self.settle().await;
        }
    }

    /// Render until `done` holds or `max_ms` passes; returns the final status
    pub async fn run_until(
        &mut self,
        max_ms: u64,
        done: impl Fn(&PlayerStatus) -> bool,
    ) -> PlayerStatus {
        for _ in 0..(max_ms / STEP_MS) {
            let status = self.status().await;
            if done(&status) {
                return status;
            }
            self.run_for(STEP_MS).await;
        }
        self.status().await
    }

    pub async fn status(&self) -> PlayerStatus {
        self.handle.status().await.expect("engine running")
    }

    /// Event types received so far
    pub fn drain_events(&mut self) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => out.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        out
    }

    pub async fn shutdown(self) {
        self.engine.shutdown().await.expect("clean shutdown");
    }
}
