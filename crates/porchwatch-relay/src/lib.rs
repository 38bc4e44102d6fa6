//! Live relay: feeds frames to an external HLS transcoder through a bounded,
//! drop-oldest queue and restarts the transcoder when its pipe fails.

mod feeder;
mod queue;
mod transcoder;

use std::{
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use porchwatch_types::{
    config::RelayConfig,
    telemetry::{RelayState, RelayStats},
    vision::Frame,
    PorchwatchError, Result,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use feeder::{Feeder, FrameQueue, RelayItem};

pub use queue::{DropOldestQueue, PushOutcome};
pub use transcoder::{
    purge_artifacts, resolve_binary, FfmpegLauncher, FfmpegProcess, TranscoderLauncher,
    TranscoderParams, TranscoderProcess,
};

/// Relay counters shared between the producer side and the feeder task.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    frames_written: AtomicU64,
    frames_dropped: AtomicU64,
    launches: AtomicU64,
    restarts: AtomicU64,
}

impl RelayMetrics {
    fn record_written(&self) {
        self.frames_written.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_launch(&self) {
        self.launches.fetch_add(1, Ordering::Relaxed);
    }

    fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStats {
        RelayStats {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            launches: self.launches.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

type FeederHandle = JoinHandle<Option<Box<dyn TranscoderProcess>>>;

pub struct LiveRelay {
    config: RelayConfig,
    launcher: Arc<dyn TranscoderLauncher>,
    enabled: bool,
    queue: Mutex<Option<Arc<FrameQueue>>>,
    feeder: tokio::sync::Mutex<Option<FeederHandle>>,
    state: Arc<watch::Sender<RelayState>>,
    metrics: Arc<RelayMetrics>,
}

impl LiveRelay {
    pub fn new(config: RelayConfig, launcher: Arc<dyn TranscoderLauncher>) -> Self {
        let enabled = config.enabled && launcher.is_available();
        if config.enabled && !enabled {
            warn!(
                "transcoder '{}' not found; live relay disabled",
                config.ffmpeg_path
            );
        }
        let initial = if enabled {
            RelayState::Stopped
        } else {
            RelayState::Disabled
        };
        let (state, _) = watch::channel(initial);
        Self {
            config,
            launcher,
            enabled,
            queue: Mutex::new(None),
            feeder: tokio::sync::Mutex::new(None),
            state: Arc::new(state),
            metrics: Arc::new(RelayMetrics::default()),
        }
    }

    /// Relay backed by the ffmpeg binary named in the config.
    pub fn with_ffmpeg(config: RelayConfig) -> Self {
        let launcher = Arc::new(FfmpegLauncher::new(&config));
        Self::new(config, launcher)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> RelayStats {
        self.metrics.snapshot()
    }

    pub fn playlist_path(&self) -> &Path {
        &self.config.playlist_path
    }

    pub fn playlist_ready(&self) -> bool {
        self.enabled && self.config.playlist_path.exists()
    }

    /// Number of frames waiting for the feeder.
    pub fn queued(&self) -> usize {
        self.lock_queue().as_ref().map_or(0, |queue| queue.len())
    }

    fn lock_queue(&self) -> MutexGuard<'_, Option<Arc<FrameQueue>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn start(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut feeder = self.feeder.lock().await;
        if let Some(handle) = feeder.as_ref() {
            let halted = self
                .lock_queue()
                .as_ref()
                .map_or(true, |queue| queue.is_closed());
            if !halted && !handle.is_finished() {
                return Ok(());
            }
        }
        if let Some(finished) = feeder.take() {
            // A feeder that halted on launch failure owns no process.
            let _ = finished.await;
        }

        let dir = self.config.segment_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| relay_error(format!("cannot create {dir:?}: {err}")))?;
        purge_artifacts(&self.config.playlist_path).await?;

        let queue = Arc::new(FrameQueue::new(self.config.queue_size));
        *self.lock_queue() = Some(Arc::clone(&queue));
        self.state.send_replace(RelayState::Stopped);

        let task = Feeder {
            config: self.config.clone(),
            launcher: Arc::clone(&self.launcher),
            queue,
            state: Arc::clone(&self.state),
            metrics: Arc::clone(&self.metrics),
        };
        *feeder = Some(tokio::spawn(task.run()));
        info!(
            "Live relay started -> {:?} (queue {})",
            self.config.playlist_path, self.config.queue_size
        );
        Ok(())
    }

    pub async fn stop(&self) {
        let mut feeder = self.feeder.lock().await;
        let Some(mut handle) = feeder.take() else {
            return;
        };
        if let Some(queue) = self.lock_queue().take() {
            queue.push(RelayItem::Stop);
        }

        let timeout = self.config.stop_timeout();
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Some(mut process))) => process.shutdown(timeout).await,
            Ok(Ok(None)) => {}
            Ok(Err(err)) => warn!("relay feeder ended abnormally: {err}"),
            Err(_) => {
                warn!("relay feeder did not drain within {:?}; aborting", timeout);
                // Aborting drops the process handle, which kills the child.
                handle.abort();
            }
        }
        self.state.send_replace(RelayState::Stopped);
        info!("Live relay stopped");
    }

    /// Hand a frame to the feeder without ever blocking the caller.
    pub fn publish(&self, frame: Frame, fps: u32) {
        if !self.enabled {
            return;
        }
        let Some(queue) = self.lock_queue().as_ref().map(Arc::clone) else {
            return;
        };
        match queue.push(RelayItem::Frame { frame, fps }) {
            PushOutcome::Queued | PushOutcome::Closed => {}
            PushOutcome::ReplacedOldest | PushOutcome::Dropped => self.metrics.record_dropped(),
        }
    }
}

pub fn relay_error(message: impl Into<String>) -> PorchwatchError {
    PorchwatchError::Relay(message.into())
}

pub fn launch_error(message: impl Into<String>) -> PorchwatchError {
    PorchwatchError::Launch(message.into())
}

#[cfg(test)]
mod tests;
