//! Person detection seam and snapshot export.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use image::{ImageBuffer, ImageFormat, Rgb};
use porchwatch_types::{
    vision::{Detection, Frame},
    PorchwatchError, Result,
};
use tracing::{debug, info};

/// Runs the person model on one frame. Blocking; called from the blocking pool.
pub trait PersonDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Detection>;
}

/// Detector that never reports a match.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDetector;

impl PersonDetector for NullDetector {
    fn detect(&self, _frame: &Frame) -> Result<Detection> {
        Ok(Detection::miss())
    }
}

/// Replays a fixed sequence of results, then misses forever.
#[derive(Default)]
pub struct ScriptedDetector {
    script: Mutex<VecDeque<Detection>>,
    calls: Mutex<usize>,
}

impl ScriptedDetector {
    pub fn new(script: impl IntoIterator<Item = Detection>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(0),
        }
    }

    /// `true` entries become hits with a single box, `false` entries misses.
    pub fn from_hits(hits: impl IntoIterator<Item = bool>) -> Self {
        Self::new(hits.into_iter().map(|hit| {
            if hit {
                Detection::hit(vec![porchwatch_types::vision::BoundingBox::new(
                    0, 0, 1, 1,
                )])
            } else {
                Detection::miss()
            }
        }))
    }

    pub fn push(&self, detection: Detection) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(detection);
    }

    /// Number of frames handed to the detector so far.
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PersonDetector for ScriptedDetector {
    fn detect(&self, frame: &Frame) -> Result<Detection> {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        let detection = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default();
        debug!(
            "scripted detection on {}x{} frame: matched={}",
            frame.width(),
            frame.height(),
            detection.matched
        );
        Ok(detection)
    }
}

/// Write `frame` as a PNG at `path`, creating parent directories.
pub fn write_snapshot(frame: &Frame, path: &Path) -> Result<PathBuf> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|err| vision_error(format!("snapshot directory {:?}: {err}", dir)))?;
    }
    let Some(buffer) =
        ImageBuffer::<Rgb<u8>, _>::from_raw(frame.width(), frame.height(), frame.data().to_vec())
    else {
        return Err(vision_error("frame payload does not match its dimensions"));
    };
    buffer
        .save_with_format(path, ImageFormat::Png)
        .map_err(|err| vision_error(format!("failed to save snapshot {:?}: {err}", path)))?;
    info!("Saved snapshot {:?}", path);
    Ok(path.to_path_buf())
}

pub fn vision_error(message: impl Into<String>) -> PorchwatchError {
    PorchwatchError::Detection(message.into())
}
