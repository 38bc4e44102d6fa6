use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

use porchwatch_types::{config::HardwareConfig, vision::Frame, Result};
use tracing::{debug, info};

use crate::{capture_error, sensor_error, Camera, DistanceSensor, IndicatorLeds};

/// Synthetic camera producing moving gradient frames for development hosts.
pub struct SimulatedCamera {
    width: u32,
    height: u32,
    frame_period: Option<Duration>,
    available: bool,
    opened: AtomicBool,
    sequence: AtomicU64,
    pending_failures: AtomicU32,
    failing: AtomicBool,
}

impl SimulatedCamera {
    /// Paced to the configured frame rate, like a real sensor.
    pub fn new(config: &HardwareConfig) -> Self {
        let (width, height) = config.camera_resolution;
        Self {
            frame_period: Some(config.frame_period()),
            ..Self::unpaced(width, height)
        }
    }

    /// Returns frames as fast as they are requested.
    pub fn unpaced(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_period: None,
            available: true,
            opened: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            pending_failures: AtomicU32::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// A camera whose `open` always fails.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::unpaced(1, 1)
        }
    }

    pub fn fail_next_captures(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn frames_captured(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    fn render(&self, seq: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(Frame::expected_len(self.width, self.height));
        let shift = (seq % 256) as u32;
        for y in 0..self.height {
            for x in 0..self.width {
                data.push(((x + shift) % 256) as u8);
                data.push(((y + shift) % 256) as u8);
                data.push((seq % 256) as u8);
            }
        }
        data
    }
}

impl Camera for SimulatedCamera {
    fn open(&self) -> Result<()> {
        if !self.available {
            return Err(capture_error("no camera backend available"));
        }
        if !self.opened.swap(true, Ordering::SeqCst) {
            info!(
                "Simulated camera opened at {}x{}",
                self.width, self.height
            );
        }
        Ok(())
    }

    fn capture_frame(&self) -> Result<Frame> {
        if !self.is_open() {
            return Err(capture_error("camera not opened"));
        }
        if let Some(period) = self.frame_period {
            std::thread::sleep(period);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(capture_error("simulated sensor fault"));
        }
        let pending = self.pending_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.pending_failures.store(pending - 1, Ordering::SeqCst);
            return Err(capture_error("simulated transient read failure"));
        }
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        Frame::now(self.width, self.height, self.render(seq))
    }

    fn close(&self) {
        if self.opened.swap(false, Ordering::SeqCst) {
            info!("Simulated camera closed");
        }
    }
}

/// Distance sensor replaying a script of readings, then reporting nothing in range.
#[derive(Default)]
pub struct SimulatedDistanceSensor {
    script: Mutex<VecDeque<f64>>,
    pending_failures: AtomicU32,
}

impl SimulatedDistanceSensor {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn scripted(readings: impl IntoIterator<Item = f64>) -> Self {
        Self {
            script: Mutex::new(readings.into_iter().collect()),
            pending_failures: AtomicU32::new(0),
        }
    }

    pub fn push_reading(&self, distance_cm: f64) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(distance_cm);
        }
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }
}

impl DistanceSensor for SimulatedDistanceSensor {
    fn read_distance_cm(&self) -> Result<f64> {
        let pending = self.pending_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.pending_failures.store(pending - 1, Ordering::SeqCst);
            return Err(sensor_error("echo timeout"));
        }
        let mut script = self
            .script
            .lock()
            .map_err(|_| sensor_error("failed to lock sensor script"))?;
        Ok(script.pop_front().unwrap_or(f64::INFINITY))
    }
}

/// LED driver that only logs and remembers the requested states.
pub struct LoggingLeds {
    privacy_pin: Option<u8>,
    flood_pin: Option<u8>,
    privacy: AtomicBool,
    flood: AtomicBool,
}

impl LoggingLeds {
    pub fn new(config: &HardwareConfig) -> Self {
        Self {
            privacy_pin: config.privacy_led_pin,
            flood_pin: config.flood_light_pin,
            privacy: AtomicBool::new(false),
            flood: AtomicBool::new(false),
        }
    }

    pub fn privacy(&self) -> bool {
        self.privacy.load(Ordering::SeqCst)
    }

    pub fn flood(&self) -> bool {
        self.flood.load(Ordering::SeqCst)
    }
}

impl IndicatorLeds for LoggingLeds {
    fn set_privacy(&self, on: bool) {
        self.privacy.store(on, Ordering::SeqCst);
        debug!("privacy LED (pin {:?}) -> {}", self.privacy_pin, on);
    }

    fn set_flood(&self, on: bool) {
        self.flood.store(on, Ordering::SeqCst);
        debug!("flood light (pin {:?}) -> {}", self.flood_pin, on);
    }

    fn release(&self) {
        self.set_privacy(false);
        self.set_flood(false);
    }
}
