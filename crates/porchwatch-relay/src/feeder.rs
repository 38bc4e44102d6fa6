use std::sync::Arc;

use porchwatch_types::{config::RelayConfig, telemetry::RelayState, vision::Frame, Result};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::{
    queue::DropOldestQueue,
    transcoder::{TranscoderLauncher, TranscoderParams, TranscoderProcess},
    RelayMetrics,
};

pub(crate) enum RelayItem {
    Frame { frame: Frame, fps: u32 },
    Stop,
}

pub(crate) type FrameQueue = DropOldestQueue<RelayItem>;

struct Running {
    process: Box<dyn TranscoderProcess>,
    params: TranscoderParams,
}

/// Single consumer of the relay queue; sole owner of the transcoder process.
pub(crate) struct Feeder {
    pub(crate) config: RelayConfig,
    pub(crate) launcher: Arc<dyn TranscoderLauncher>,
    pub(crate) queue: Arc<FrameQueue>,
    pub(crate) state: Arc<watch::Sender<RelayState>>,
    pub(crate) metrics: Arc<RelayMetrics>,
}

impl Feeder {
    /// Runs until the stop sentinel or a launch failure. Hands back the live
    /// process, if any, so the caller can terminate it after joining.
    pub(crate) async fn run(self) -> Option<Box<dyn TranscoderProcess>> {
        let mut current: Option<Running> = None;

        while let Some(item) = self.queue.pop().await {
            let (frame, fps) = match item {
                RelayItem::Stop => {
                    debug!("relay feeder received stop");
                    break;
                }
                RelayItem::Frame { frame, fps } => (frame, fps),
            };
            let params = TranscoderParams::for_frame(&self.config, &frame, fps);

            let alive = current.as_mut().map(|running| running.process.is_alive());
            let relaunch = match current.as_ref() {
                None => true,
                Some(_) if alive == Some(false) => {
                    warn!("transcoder exited on its own; relaunching");
                    true
                }
                Some(running) if running.params != params => {
                    debug!(
                        "stream geometry changed to {}x{} @ {}fps; relaunching",
                        params.width, params.height, params.fps
                    );
                    true
                }
                Some(_) => false,
            };

            if relaunch {
                if let Some(mut previous) = current.take() {
                    previous.process.shutdown(self.config.stop_timeout()).await;
                    self.metrics.record_restart();
                }
                match self.launch(&params).await {
                    Ok(process) => current = Some(Running { process, params }),
                    Err(err) => return self.halt(err),
                }
            }

            let Some(running) = current.as_mut() else {
                continue;
            };
            match running.process.write_frame(frame.data()).await {
                Ok(()) => self.metrics.record_written(),
                Err(err) => {
                    warn!("relay pipe failed ({err}); restarting transcoder");
                    self.state.send_replace(RelayState::Failed);
                    let params = running.params.clone();
                    if let Some(mut failed) = current.take() {
                        failed.process.shutdown(self.config.stop_timeout()).await;
                    }
                    self.metrics.record_restart();
                    match self.launch(&params).await {
                        Ok(process) => current = Some(Running { process, params }),
                        Err(err) => return self.halt(err),
                    }
                }
            }
        }

        current.map(|running| running.process)
    }

    async fn launch(&self, params: &TranscoderParams) -> Result<Box<dyn TranscoderProcess>> {
        self.state.send_replace(RelayState::Starting);
        let process = self.launcher.launch(params).await?;
        self.metrics.record_launch();
        self.state.send_replace(RelayState::Running);
        Ok(process)
    }

    fn halt(&self, err: porchwatch_types::PorchwatchError) -> Option<Box<dyn TranscoderProcess>> {
        error!("Unable to start transcoder; live relay halted until restarted: {err}");
        self.queue.close();
        self.state.send_replace(RelayState::Failed);
        None
    }
}
