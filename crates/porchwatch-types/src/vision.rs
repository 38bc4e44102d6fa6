use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PorchwatchError, Result};

/// Bytes per pixel of the packed RGB24 layout every frame uses.
pub const CHANNELS: usize = 3;

/// A captured video frame.
///
/// The pixel payload is reference counted: the rolling buffer, the relay queue
/// and the detector all hold the same allocation. Frames are never mutated
/// after construction.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Arc<[u8]>,
    captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>, captured_at: DateTime<Utc>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PorchwatchError::Capture(format!(
                "frame dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let expected = Self::expected_len(width, height);
        if data.len() != expected {
            return Err(PorchwatchError::Capture(format!(
                "frame {width}x{height} expects {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data: data.into(),
            captured_at,
        })
    }

    /// Build a frame stamped with the current wall-clock time.
    pub fn now(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, data, Utc::now())
    }

    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * CHANNELS
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Same pixels, different timestamp. The payload is shared, not copied.
    pub fn restamped(&self, captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            ..self.clone()
        }
    }
}

/// Axis-aligned detection rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Result of running the person detector on one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub matched: bool,
    pub boxes: Vec<BoundingBox>,
}

impl Detection {
    pub fn miss() -> Self {
        Self::default()
    }

    pub fn hit(boxes: Vec<BoundingBox>) -> Self {
        Self {
            matched: true,
            boxes,
        }
    }
}
