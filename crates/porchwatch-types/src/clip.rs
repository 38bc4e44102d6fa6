use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{vision::BoundingBox, PorchwatchError, Result};

/// A clip exported from the rolling buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipHandle {
    pub id: Uuid,
    pub path: PathBuf,
    pub label: String,
    pub frame_count: usize,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl ClipHandle {
    /// Path of the snapshot image that accompanies this clip.
    pub fn thumbnail_path(&self) -> PathBuf {
        self.path.with_extension("png")
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

/// Key reserved for the typed bounding box list inside serialized metadata.
pub const BOXES_KEY: &str = "boxes";

/// Metadata attached to an event: a fixed schema plus free-form extras.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default)]
    pub boxes: Vec<BoundingBox>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl EventMetadata {
    pub fn with_boxes(boxes: Vec<BoundingBox>) -> Self {
        Self {
            boxes,
            extra: BTreeMap::new(),
        }
    }

    /// Checked at the storage boundary before anything is persisted.
    pub fn validate(&self) -> Result<()> {
        if let Some(degenerate) = self.boxes.iter().find(|b| b.area() == 0) {
            return Err(PorchwatchError::Storage(format!(
                "bounding box {degenerate:?} has zero area"
            )));
        }
        for key in self.extra.keys() {
            if key.trim().is_empty() {
                return Err(PorchwatchError::Storage(
                    "metadata extra keys must not be empty".into(),
                ));
            }
            if key == BOXES_KEY {
                return Err(PorchwatchError::Storage(format!(
                    "metadata extra key '{BOXES_KEY}' is reserved"
                )));
            }
        }
        Ok(())
    }
}

/// A promoted event handed to the storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotedEvent {
    pub id: Uuid,
    pub clip_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    /// Configured pre+post window, not the measured clip length. Clips
    /// promoted before the buffer has filled are shorter than this.
    #[serde(rename = "duration_secs", with = "duration_secs")]
    pub duration: Duration,
    pub label: String,
    pub metadata: Option<EventMetadata>,
    pub created_at: DateTime<Utc>,
}

impl PromotedEvent {
    pub fn from_clip(
        clip: &ClipHandle,
        thumbnail_path: Option<&Path>,
        duration: Duration,
        metadata: Option<EventMetadata>,
    ) -> Self {
        Self {
            id: clip.id,
            clip_path: clip.path.clone(),
            thumbnail_path: thumbnail_path.map(Path::to_path_buf),
            duration,
            label: clip.label.clone(),
            metadata,
            created_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(PorchwatchError::Storage("event label must not be empty".into()));
        }
        if let Some(metadata) = &self.metadata {
            metadata.validate()?;
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
