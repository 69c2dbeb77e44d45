//! Persisted transport snapshot
//!
//! Restores the UI (queue, selection, position, modes) after a restart.
//! Restoring never starts audio.

use crate::error::Result;
use cadenza_common::events::LoopMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSnapshot {
    pub current_track_id: Option<Uuid>,
    pub playback_time: f64,
    pub queue: Vec<Uuid>,
    #[serde(default)]
    pub loop_mode: LoopMode,
    #[serde(default)]
    pub shuffled: bool,
    pub saved_at: DateTime<Utc>,
}

impl TransportSnapshot {
    /// Write atomically (temp file + rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_vec_pretty(self).map_err(cadenza_common::Error::from)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let snapshot = serde_json::from_slice(&bytes).map_err(cadenza_common::Error::from)?;
        Ok(snapshot)
    }
}

/// Background writer; snapshots are written in submission order and
/// bursts collapse to the newest one
pub struct SnapshotWriter {
    tx: mpsc::UnboundedSender<TransportSnapshot>,
    task: JoinHandle<()>,
}

impl SnapshotWriter {
    pub fn spawn(path: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<TransportSnapshot>();
        let task = tokio::spawn(async move {
            while let Some(mut snapshot) = rx.recv().await {
                while let Ok(newer) = rx.try_recv() {
                    snapshot = newer;
                }
                let path = path.clone();
                match tokio::task::spawn_blocking(move || snapshot.save(&path)).await {
                    Ok(Ok(())) => debug!("Snapshot saved"),
                    Ok(Err(e)) => warn!("Failed to save snapshot: {}", e),
                    Err(e) => warn!("Snapshot writer task failed: {}", e),
                }
            }
        });
        Self { tx, task }
    }

    pub fn submit(&self, snapshot: TransportSnapshot) {
        let _ = self.tx.send(snapshot);
    }

    /// Write everything submitted so far, then stop
    pub async fn close(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}
