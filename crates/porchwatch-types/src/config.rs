use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{PorchwatchError, Result};

/// Longest pre + post event window accepted from configuration.
pub const MAX_WINDOW_SECONDS: u64 = 3_600;
pub const MAX_CAMERA_FPS: u32 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub camera_index: u32,
    pub camera_resolution: (u32, u32),
    pub camera_fps: u32,
    pub trigger_pin: Option<u8>,
    pub echo_pin: Option<u8>,
    pub privacy_led_pin: Option<u8>,
    pub flood_light_pin: Option<u8>,
    pub idle_distance_cm: f64,
    pub trigger_distance_cm: f64,
    pub sensor_poll_interval_ms: u64,
    pub sensor_settle_ms: u64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            camera_resolution: (1280, 720),
            camera_fps: 20,
            trigger_pin: Some(23),
            echo_pin: Some(24),
            privacy_led_pin: None,
            flood_light_pin: None,
            idle_distance_cm: 180.0,
            trigger_distance_cm: 120.0,
            sensor_poll_interval_ms: 200,
            sensor_settle_ms: 100,
        }
    }
}

impl HardwareConfig {
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.camera_fps.max(1) as f64)
    }

    pub fn sensor_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sensor_poll_interval_ms)
    }

    pub fn sensor_settle(&self) -> Duration {
        Duration::from_millis(self.sensor_settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confirmation_frames: u32,
    pub min_confidence: f32,
    pub label: String,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confirmation_frames: 4,
            min_confidence: 0.4,
            label: "person".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub pre_event_seconds: u64,
    pub post_event_seconds: u64,
    pub media_root: PathBuf,
    pub event_log: PathBuf,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            pre_event_seconds: 10,
            post_event_seconds: 12,
            media_root: PathBuf::from("storage/media"),
            event_log: PathBuf::from("storage/events.jsonl"),
        }
    }
}

impl BufferConfig {
    pub fn window_seconds(&self) -> u64 {
        self.pre_event_seconds.saturating_add(self.post_event_seconds)
    }

    /// Number of frames the rolling buffer holds at the given frame rate.
    pub fn capacity_for(&self, fps: u32) -> usize {
        let frames = self.window_seconds().saturating_mul(u64::from(fps));
        usize::try_from(frames).unwrap_or(usize::MAX)
    }

    pub fn event_duration(&self) -> Duration {
        Duration::from_secs(self.window_seconds())
    }

    pub fn post_event(&self) -> Duration {
        Duration::from_secs(self.post_event_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub enabled: bool,
    pub playlist_path: PathBuf,
    pub segment_seconds: u32,
    pub list_size: u32,
    pub queue_size: usize,
    pub ffmpeg_path: String,
    pub video_codec: String,
    pub stop_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            playlist_path: PathBuf::from("storage/media/hls/playlist.m3u8"),
            segment_seconds: 1,
            list_size: 3,
            queue_size: 6,
            ffmpeg_path: "ffmpeg".into(),
            video_codec: "libx264".into(),
            stop_timeout_ms: 2_000,
        }
    }
}

impl RelayConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn segment_dir(&self) -> PathBuf {
        self.playlist_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub topic: String,
    pub device_tokens: Vec<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            topic: "com.example.porchwatch".into(),
            device_tokens: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Extra sleep after each captured frame, as a fraction of the frame period.
    pub capture_yield_ratio: f64,
    pub max_consecutive_capture_failures: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capture_yield_ratio: 0.2,
            max_consecutive_capture_failures: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub log_level: String,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PorchwatchConfig {
    /// Initial mode; toggled at runtime through the engine.
    pub out_of_home: bool,
    pub hardware: HardwareConfig,
    pub detection: DetectionConfig,
    pub buffer: BufferConfig,
    pub relay: RelayConfig,
    pub notifications: NotificationConfig,
    pub engine: EngineConfig,
    pub ops: OpsConfig,
}

impl PorchwatchConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            PorchwatchError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            PorchwatchError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.hardware.camera_fps == 0 || self.hardware.camera_fps > MAX_CAMERA_FPS {
            return Err(PorchwatchError::Configuration(format!(
                "hardware.camera_fps must be between 1 and {MAX_CAMERA_FPS}"
            )));
        }
        if self.hardware.trigger_distance_cm <= 0.0 {
            return Err(PorchwatchError::Configuration(
                "hardware.trigger_distance_cm must be positive".into(),
            ));
        }
        if self.detection.confirmation_frames == 0 {
            return Err(PorchwatchError::Configuration(
                "detection.confirmation_frames must be greater than zero".into(),
            ));
        }
        if self.buffer.window_seconds() == 0 {
            return Err(PorchwatchError::Configuration(
                "buffer pre/post window must cover at least one second".into(),
            ));
        }
        if self.buffer.window_seconds() > MAX_WINDOW_SECONDS {
            return Err(PorchwatchError::Configuration(format!(
                "buffer pre/post window may not exceed {MAX_WINDOW_SECONDS} seconds"
            )));
        }
        if self.relay.queue_size == 0 {
            return Err(PorchwatchError::Configuration(
                "relay.queue_size must be greater than zero".into(),
            ));
        }
        if self.relay.segment_seconds == 0 || self.relay.list_size == 0 {
            return Err(PorchwatchError::Configuration(
                "relay.segment_seconds and relay.list_size must be greater than zero".into(),
            ));
        }
        if self.engine.max_consecutive_capture_failures == 0 {
            return Err(PorchwatchError::Configuration(
                "engine.max_consecutive_capture_failures must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
