//! Event engine: capture and sensor loops around the rolling buffer, the live
//! relay and the arming/confirmation window.

mod window;

use std::{
    future::pending,
    ops::ControlFlow,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use futures::StreamExt;
use porchwatch_buffer::{ClipEncoder, RollingBuffer};
use porchwatch_bus::EventBus;
use porchwatch_hardware::{capture_error, distance_readings, Camera, DistanceSensor, IndicatorLeds};
use porchwatch_ops::{EventStore, Notifier};
use porchwatch_relay::LiveRelay;
use porchwatch_types::{
    clip::{ClipHandle, EventMetadata, PromotedEvent},
    config::PorchwatchConfig,
    events::{
        ArmedEvent, EventKind, EventPayload, LifecyclePhase, ModeEvent, PromotionEvent,
        RelayEvent, SystemEvent,
    },
    telemetry::EngineStatus,
    vision::{BoundingBox, Detection, Frame},
    PorchwatchError, Result,
};
use porchwatch_vision::{write_snapshot, PersonDetector};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{sleep, Instant},
};
use tracing::{debug, error, info, warn};

pub use window::EventWindow;

pub const NOTIFY_TITLE: &str = "Visitor detected";
pub const NOTIFY_BODY: &str = "Tap to open live feed";

/// Everything the engine talks to, injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub camera: Arc<dyn Camera>,
    pub sensor: Arc<dyn DistanceSensor>,
    pub leds: Arc<dyn IndicatorLeds>,
    pub detector: Arc<dyn PersonDetector>,
    pub encoder: Arc<dyn ClipEncoder>,
    pub store: Arc<dyn EventStore>,
    pub notifier: Arc<dyn Notifier>,
    pub bus: Arc<dyn EventBus>,
}

type LoopHandle = (&'static str, JoinHandle<Result<()>>);

pub struct EventEngine {
    core: Arc<EngineCore>,
    tasks: tokio::sync::Mutex<Vec<LoopHandle>>,
}

struct EngineCore {
    config: PorchwatchConfig,
    collaborators: Collaborators,
    buffer: RollingBuffer,
    relay: Arc<LiveRelay>,
    window: Mutex<EventWindow>,
    shutdown: watch::Sender<bool>,
    fault: watch::Sender<Option<String>>,
    camera_closed: AtomicBool,
}

impl EventEngine {
    /// Opens the camera; an unavailable camera fails construction.
    pub fn new(
        config: PorchwatchConfig,
        collaborators: Collaborators,
        relay: Arc<LiveRelay>,
    ) -> Result<Self> {
        config.validate()?;
        collaborators.camera.open()?;

        let fps = config.hardware.camera_fps;
        let buffer = RollingBuffer::new(
            config.buffer.clone(),
            fps,
            Arc::clone(&collaborators.encoder),
        );
        let window = EventWindow::new(config.out_of_home);
        collaborators.leds.set_privacy(config.out_of_home);
        let (shutdown, _) = watch::channel(false);
        let (fault, _) = watch::channel(None);

        info!(
            "Event engine ready: {}x{} @ {} fps, buffer {} frames, relay {}",
            config.hardware.camera_resolution.0,
            config.hardware.camera_resolution.1,
            fps,
            buffer.capacity(),
            if relay.enabled() { "enabled" } else { "disabled" }
        );
        Ok(Self {
            core: Arc::new(EngineCore {
                config,
                collaborators,
                buffer,
                relay,
                window: Mutex::new(window),
                shutdown,
                fault,
                camera_closed: AtomicBool::new(false),
            }),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// Start the relay, then the capture, sensor and relay-state loops. Idempotent.
    pub async fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Ok(());
        }
        let core = &self.core;
        if core.camera_closed.load(Ordering::SeqCst) {
            core.collaborators.camera.open()?;
            core.camera_closed.store(false, Ordering::SeqCst);
        }
        core.shutdown.send_replace(false);
        core.relay.start().await?;

        tasks.push((
            "capture",
            tokio::spawn(Arc::clone(core).capture_loop(core.shutdown.subscribe())),
        ));
        tasks.push((
            "sensor",
            tokio::spawn(Arc::clone(core).sensor_loop(core.shutdown.subscribe())),
        ));
        tasks.push((
            "relay-state",
            tokio::spawn(Arc::clone(core).relay_state_loop(core.shutdown.subscribe())),
        ));

        core.announce(SystemEvent::lifecycle(
            LifecyclePhase::Ready,
            Some(format!("out_of_home={}", self.out_of_home())),
        ))
        .await;
        info!("Event engine started");
        Ok(())
    }

    /// Cancel both loops, stop the relay, then release the camera and LEDs.
    ///
    /// Returns the capture fault if the capture loop gave up before the stop.
    pub async fn stop(&self) -> Result<()> {
        let core = &self.core;
        core.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        let mut outcome = Ok(());
        for (name, handle) in tasks {
            match handle.await {
                Ok(Ok(())) => debug!("{name} loop finished"),
                Ok(Err(err)) => {
                    warn!("{name} loop ended with error: {err}");
                    outcome = Err(err);
                }
                Err(err) if err.is_cancelled() => debug!("{name} loop cancelled"),
                Err(err) => warn!("{name} loop panicked: {err}"),
            }
        }

        core.relay.stop().await;
        if !core.camera_closed.swap(true, Ordering::SeqCst) {
            core.collaborators.camera.close();
        }
        core.collaborators.leds.release();
        core.announce(SystemEvent::lifecycle(LifecyclePhase::Shutdown, None))
            .await;
        info!("Event engine stopped");
        outcome
    }

    /// Resolves once the capture loop has exhausted its failure budget.
    pub async fn fault(&self) -> String {
        let mut rx = self.core.fault.subscribe();
        let fault = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|fault| fault.clone());
        match fault {
            Some(message) => message,
            None => pending().await,
        }
    }

    pub async fn set_out_of_home(&self, state: bool) {
        let changed = self.core.lock_window().set_out_of_home(state);
        self.core.collaborators.leds.set_privacy(state);
        if changed {
            info!("Out-of-home mode {}", if state { "enabled" } else { "disabled" });
            self.core
                .announce(SystemEvent::new(
                    EventKind::Mode,
                    EventPayload::Mode(ModeEvent { out_of_home: state }),
                ))
                .await;
        }
    }

    pub fn out_of_home(&self) -> bool {
        self.core.lock_window().out_of_home()
    }

    pub fn set_light(&self, on: bool) {
        self.core.collaborators.leds.set_flood(on);
    }

    pub fn set_privacy(&self, on: bool) {
        self.core.collaborators.leds.set_privacy(on);
    }

    /// Promote the buffer immediately, bypassing arming and confirmation.
    pub async fn promote_manual(&self, label: &str) -> Result<ClipHandle> {
        let frame = self.core.buffer.latest();
        self.core.promote(label, frame, None, true).await
    }

    pub fn status(&self) -> EngineStatus {
        let core = &self.core;
        let window = core.lock_window();
        EngineStatus {
            out_of_home: window.out_of_home(),
            watching: window.is_watching(Instant::now()),
            confirm_counter: window.confirm_counter(),
            buffered_frames: core.buffer.len(),
            buffer_capacity: core.buffer.capacity(),
            relay_state: core.relay.state(),
            relay: core.relay.stats(),
        }
    }

    pub fn buffer(&self) -> &RollingBuffer {
        &self.core.buffer
    }

    pub fn relay(&self) -> &LiveRelay {
        &self.core.relay
    }
}

impl EngineCore {
    fn lock_window(&self) -> MutexGuard<'_, EventWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn announce(&self, event: SystemEvent) {
        if let Err(err) = self.collaborators.bus.publish(event).await {
            warn!("failed to publish bus event: {err}");
        }
    }

    async fn capture_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let hardware = &self.config.hardware;
        let fps = hardware.camera_fps;
        let period = hardware.frame_period();
        let pause = period.mul_f64(self.config.engine.capture_yield_ratio.max(0.0));
        let budget = self.config.engine.max_consecutive_capture_failures;
        let mut failures = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let camera = Arc::clone(&self.collaborators.camera);
            let capture = tokio::task::spawn_blocking(move || camera.capture_frame());
            let captured = tokio::select! {
                _ = shutdown.changed() => break,
                joined = capture => joined
                    .map_err(|err| capture_error(format!("capture task failed: {err}")))
                    .and_then(|result| result),
            };

            match captured {
                Ok(frame) => {
                    failures = 0;
                    if self.on_frame(frame, fps, &mut shutdown).await.is_break() {
                        break;
                    }
                }
                Err(err) => {
                    failures += 1;
                    if failures >= budget {
                        error!("camera failed {failures} times in a row: {err}");
                        self.announce(SystemEvent::fault("capture", &err)).await;
                        self.fault.send_replace(Some(err.to_string()));
                        return Err(err);
                    }
                    warn!("frame capture failed ({failures}/{budget}): {err}");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = sleep(period) => {}
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(pause) => {}
            }
        }
        Ok(())
    }

    /// Buffer, relay and (while watching) classify one frame. Breaks when
    /// shutdown was signalled during detection; that result is discarded.
    async fn on_frame(
        &self,
        frame: Frame,
        fps: u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ControlFlow<()> {
        self.buffer.append(frame.clone(), fps);
        self.relay.publish(frame.clone(), fps);

        if !self.lock_window().is_watching(Instant::now()) {
            return ControlFlow::Continue(());
        }

        let detector = Arc::clone(&self.collaborators.detector);
        let sample = frame.clone();
        let detect = tokio::task::spawn_blocking(move || detector.detect(&sample));
        let detection = tokio::select! {
            _ = shutdown.changed() => return ControlFlow::Break(()),
            joined = detect => match joined {
                Ok(Ok(detection)) => detection,
                Ok(Err(err)) => {
                    warn!("detector failed, counting frame as a miss: {err}");
                    Detection::miss()
                }
                Err(err) => {
                    warn!("detector task failed, counting frame as a miss: {err}");
                    Detection::miss()
                }
            },
        };

        let threshold = self.config.detection.confirmation_frames;
        let confirmed = self
            .lock_window()
            .record_detection(&detection, threshold, Instant::now());
        let Some(boxes) = confirmed else {
            return ControlFlow::Continue(());
        };

        info!("{threshold} consecutive detections; promoting event");
        let label = self.config.detection.label.clone();
        if let Err(err) = self.promote(&label, Some(frame), Some(boxes), false).await {
            error!("automatic promotion failed: {err}");
        }
        ControlFlow::Continue(())
    }

    async fn sensor_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let hardware = &self.config.hardware;
        let sensor = &self.collaborators.sensor;
        let window = self.config.buffer.post_event();
        let mut readings = distance_readings(Arc::clone(sensor), hardware.sensor_poll_interval());

        loop {
            if *shutdown.borrow() {
                break;
            }
            let distance = tokio::select! {
                _ = shutdown.changed() => break,
                next = readings.next() => match next {
                    Some(distance) => distance,
                    None => {
                        debug!("distance stream ended; restarting");
                        readings = distance_readings(Arc::clone(sensor), hardware.sensor_poll_interval());
                        continue;
                    }
                },
            };

            let armed = self.lock_window().on_distance(
                distance,
                hardware.trigger_distance_cm,
                Instant::now(),
                window,
            );
            if armed {
                info!("Motion at {distance:.1} cm; watching for {}s", window.as_secs());
                self.announce(SystemEvent::new(
                    EventKind::Arming,
                    EventPayload::Armed(ArmedEvent {
                        distance_cm: distance,
                        window_secs: window.as_secs(),
                    }),
                ))
                .await;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(hardware.sensor_settle()) => {}
            }
        }
        Ok(())
    }

    async fn relay_state_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut states = self.relay.subscribe_state();
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *states.borrow_and_update();
                    debug!("relay state -> {state:?}");
                    self.announce(SystemEvent::new(
                        EventKind::Relay,
                        EventPayload::Relay(RelayEvent { state }),
                    ))
                    .await;
                }
            }
        }
        Ok(())
    }

    /// Export the buffer and hand the result to storage and notification.
    ///
    /// Storage failures are returned; notification failures are only logged.
    async fn promote(
        &self,
        label: &str,
        frame: Option<Frame>,
        boxes: Option<Vec<BoundingBox>>,
        manual: bool,
    ) -> Result<ClipHandle> {
        let clip = self.buffer.promote(label).await?;

        let thumbnail = match frame {
            Some(frame) => self.write_thumbnail(frame, clip.thumbnail_path()).await,
            None => None,
        };
        let metadata = boxes.map(|boxes| {
            EventMetadata::with_boxes(boxes.into_iter().filter(|b| b.area() > 0).collect())
        });
        let event = PromotedEvent::from_clip(
            &clip,
            thumbnail.as_deref(),
            self.config.buffer.event_duration(),
            metadata,
        );
        self.collaborators.store.record_event(event).await?;

        if !manual {
            let snapshot = thumbnail.as_deref().unwrap_or(clip.path.as_path());
            if let Err(err) = self
                .collaborators
                .notifier
                .notify(snapshot, NOTIFY_TITLE, NOTIFY_BODY)
                .await
            {
                warn!("notification for event {} failed: {err}", clip.id);
            }
        }

        self.announce(SystemEvent::new(
            EventKind::Promotion,
            EventPayload::Promoted(PromotionEvent {
                event_id: clip.id,
                label: clip.label.clone(),
                clip_path: clip.path.to_string_lossy().into_owned(),
                frame_count: clip.frame_count,
                manual,
            }),
        ))
        .await;
        Ok(clip)
    }

    async fn write_thumbnail(&self, frame: Frame, path: PathBuf) -> Option<PathBuf> {
        let written = tokio::task::spawn_blocking(move || write_snapshot(&frame, &path))
            .await
            .map_err(|err| engine_error(format!("snapshot task failed: {err}")))
            .and_then(|result| result);
        match written {
            Ok(path) => Some(path),
            Err(err) => {
                warn!("thumbnail not written: {err}");
                None
            }
        }
    }
}

pub fn engine_error(message: impl Into<String>) -> PorchwatchError {
    PorchwatchError::Engine(message.into())
}
