//! Rolling pre/post-event frame buffer and clip export.

mod encoder;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use porchwatch_types::{
    clip::ClipHandle, config::BufferConfig, vision::Frame, PorchwatchError, Result,
};
use tracing::{debug, info};
use uuid::Uuid;

pub use encoder::{ClipEncoder, FfmpegClipEncoder};

/// Upper bound on the up-front allocation; the deque grows past it on demand.
const MAX_PREALLOCATED_FRAMES: usize = 4096;

/// Point-in-time copy of the buffer contents, oldest first.
#[derive(Debug, Clone, Default)]
pub struct BufferSnapshot {
    pub frames: Vec<Frame>,
    pub fps: u32,
}

impl BufferSnapshot {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Common resolution of every frame, or an encoding error when they disagree.
    pub fn uniform_dimensions(&self) -> Result<(u32, u32)> {
        let first = self.frames.first().ok_or(PorchwatchError::EmptyBuffer)?;
        let dims = first.dimensions();
        if let Some((idx, odd)) = self
            .frames
            .iter()
            .enumerate()
            .find(|(_, frame)| frame.dimensions() != dims)
        {
            return Err(encoding_error(format!(
                "frame {idx} is {}x{}, expected {}x{}",
                odd.width(),
                odd.height(),
                dims.0,
                dims.1
            )));
        }
        Ok(dims)
    }
}

struct BufferState {
    frames: VecDeque<Frame>,
    fps_hint: u32,
    capacity: usize,
}

impl BufferState {
    fn evict_to_capacity(&mut self) -> usize {
        let mut evicted = 0;
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
            evicted += 1;
        }
        evicted
    }
}

/// Fixed-window frame store shared by the capture loop and promotion callers.
///
/// Capacity is `(pre + post) * fps_hint` frames and follows the latest hint.
/// The lock covers append and snapshot only; encoding works on a copy.
pub struct RollingBuffer {
    config: BufferConfig,
    encoder: Arc<dyn ClipEncoder>,
    state: Mutex<BufferState>,
}

impl RollingBuffer {
    pub fn new(config: BufferConfig, fps_hint: u32, encoder: Arc<dyn ClipEncoder>) -> Self {
        let fps_hint = fps_hint.max(1);
        let capacity = config.capacity_for(fps_hint).max(1);
        Self {
            config,
            encoder,
            state: Mutex::new(BufferState {
                frames: VecDeque::with_capacity(capacity.min(MAX_PREALLOCATED_FRAMES)),
                fps_hint,
                capacity,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a frame, evicting the oldest when full. A zero hint keeps the previous one.
    pub fn append(&self, frame: Frame, fps_hint: u32) {
        let mut state = self.lock();
        if fps_hint != 0 && fps_hint != state.fps_hint {
            state.fps_hint = fps_hint;
            state.capacity = self.config.capacity_for(fps_hint).max(1);
            debug!(
                "Rolling buffer resized to {} frames @ {}fps",
                state.capacity, fps_hint
            );
        }

        let frame = match state.frames.back() {
            Some(last) if frame.captured_at() < last.captured_at() => {
                frame.restamped(last.captured_at())
            }
            _ => frame,
        };
        state.frames.push_back(frame);
        state.evict_to_capacity();
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        let state = self.lock();
        BufferSnapshot {
            frames: state.frames.iter().cloned().collect(),
            fps: state.fps_hint,
        }
    }

    pub fn latest(&self) -> Option<Frame> {
        self.lock().frames.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn fps_hint(&self) -> u32 {
        self.lock().fps_hint
    }

    pub fn media_root(&self) -> &std::path::Path {
        &self.config.media_root
    }

    /// Export the current contents to `<media_root>/<id>_<label>.mp4`.
    pub async fn promote(&self, label: &str) -> Result<ClipHandle> {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return Err(PorchwatchError::EmptyBuffer);
        }
        let (width, height) = snapshot.uniform_dimensions()?;

        tokio::fs::create_dir_all(&self.config.media_root)
            .await
            .map_err(|err| {
                encoding_error(format!(
                    "unable to create media root {:?}: {err}",
                    self.config.media_root
                ))
            })?;

        let id = Uuid::new_v4();
        let label = sanitize_label(label);
        let path = self
            .config
            .media_root
            .join(format!("{}_{}.mp4", id.simple(), label));
        let fps = snapshot.fps;

        let encoder = Arc::clone(&self.encoder);
        let output = path.clone();
        let frames = snapshot.frames;
        let frame_count = tokio::task::spawn_blocking(move || encoder.encode(&frames, fps, &output))
            .await
            .map_err(|err| encoding_error(format!("encoder task failed: {err}")))??;

        info!(
            "Promoted {} buffered frames as '{}' -> {:?}",
            frame_count, label, path
        );
        Ok(ClipHandle {
            id,
            path,
            label,
            frame_count,
            fps,
            width,
            height,
        })
    }
}

/// Reduce a label to characters that are safe inside a file name.
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        "clip".to_string()
    } else {
        cleaned
    }
}

pub fn encoding_error(message: impl Into<String>) -> PorchwatchError {
    PorchwatchError::Encoding(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::path::{Path, PathBuf};

    #[derive(Default)]
    struct RecordingEncoder {
        calls: Mutex<Vec<(usize, u32, PathBuf)>>,
    }

    impl ClipEncoder for RecordingEncoder {
        fn encode(&self, frames: &[Frame], fps: u32, output: &Path) -> Result<usize> {
            self.calls
                .lock()
                .unwrap()
                .push((frames.len(), fps, output.to_path_buf()));
            Ok(frames.len())
        }
    }

    fn config(pre: u64, post: u64) -> BufferConfig {
        BufferConfig {
            pre_event_seconds: pre,
            post_event_seconds: post,
            media_root: std::env::temp_dir().join(format!("porchwatch-buffer-{}", Uuid::new_v4())),
            ..BufferConfig::default()
        }
    }

    fn frame_at(seq: i64) -> Frame {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap() + ChronoDuration::milliseconds(seq);
        Frame::new(2, 2, vec![(seq % 251) as u8; 12], ts).unwrap()
    }

    fn buffer(pre: u64, post: u64, fps: u32) -> (RollingBuffer, Arc<RecordingEncoder>) {
        let encoder = Arc::new(RecordingEncoder::default());
        let buffer = RollingBuffer::new(config(pre, post), fps, encoder.clone());
        (buffer, encoder)
    }

    #[test]
    fn keeps_most_recent_window_in_order() {
        let (buffer, _) = buffer(10, 12, 24);
        assert_eq!(buffer.capacity(), 528);
        for seq in 0..600 {
            buffer.append(frame_at(seq), 24);
        }
        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 528);
        assert_eq!(snapshot.frames[0].captured_at(), frame_at(72).captured_at());
        assert_eq!(
            snapshot.frames[527].captured_at(),
            frame_at(599).captured_at()
        );
        assert!(snapshot
            .frames
            .windows(2)
            .all(|pair| pair[0].captured_at() <= pair[1].captured_at()));
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let (buffer, _) = buffer(1, 1, 3);
        let capacity = buffer.capacity();
        for seq in 0..50 {
            buffer.append(frame_at(seq), 3);
            assert!(buffer.len() <= capacity);
            assert_eq!(buffer.len(), ((seq + 1) as usize).min(capacity));
        }
    }

    #[test]
    fn snapshot_is_isolated_from_later_appends() {
        let (buffer, _) = buffer(1, 1, 2);
        for seq in 0..3 {
            buffer.append(frame_at(seq), 2);
        }
        let snapshot = buffer.snapshot();
        let before: Vec<_> = snapshot.frames.iter().map(Frame::captured_at).collect();
        for seq in 3..10 {
            buffer.append(frame_at(seq), 2);
        }
        let after: Vec<_> = snapshot.frames.iter().map(Frame::captured_at).collect();
        assert_eq!(before, after);
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn fps_change_resizes_lazily() {
        let (buffer, _) = buffer(1, 1, 10);
        for seq in 0..20 {
            buffer.append(frame_at(seq), 10);
        }
        assert_eq!(buffer.len(), 20);
        buffer.append(frame_at(20), 5);
        assert_eq!(buffer.capacity(), 10);
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.fps_hint(), 5);
        assert_eq!(
            buffer.latest().map(|f| f.captured_at()),
            Some(frame_at(20).captured_at())
        );
        // zero keeps the previous hint
        buffer.append(frame_at(21), 0);
        assert_eq!(buffer.fps_hint(), 5);
    }

    #[test]
    fn out_of_order_timestamps_are_clamped() {
        let (buffer, _) = buffer(1, 1, 10);
        buffer.append(frame_at(10), 10);
        buffer.append(frame_at(5), 10);
        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.frames[1].captured_at(), frame_at(10).captured_at());
    }

    #[tokio::test]
    async fn promoting_empty_buffer_fails() {
        let (buffer, encoder) = buffer(1, 1, 10);
        for _ in 0..2 {
            let err = buffer.promote("person").await.unwrap_err();
            assert!(matches!(err, PorchwatchError::EmptyBuffer));
        }
        assert!(encoder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn promotion_encodes_every_buffered_frame() {
        let (buffer, encoder) = buffer(1, 1, 12);
        for seq in 0..7 {
            buffer.append(frame_at(seq), 12);
        }
        let clip = buffer.promote("person").await.expect("promote");
        assert_eq!(clip.frame_count, 7);
        assert_eq!(clip.fps, 12);
        assert_eq!((clip.width, clip.height), (2, 2));
        assert_eq!(clip.label, "person");
        assert_eq!(
            clip.file_name().map(String::from),
            Some(format!("{}_person.mp4", clip.id.simple()))
        );
        assert!(clip.path.starts_with(buffer.media_root()));

        let calls = encoder.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(7, 12, clip.path.clone())]);
        // the buffer keeps its contents after promotion
        assert_eq!(buffer.len(), 7);
        let _ = std::fs::remove_dir_all(buffer.media_root());
    }

    #[test]
    fn oversized_window_saturates_without_preallocating() {
        let (buffer, _) = buffer(u64::MAX, u64::MAX, u32::MAX);
        assert_eq!(buffer.capacity(), usize::MAX);
        for seq in 0..3 {
            buffer.append(frame_at(seq), u32::MAX);
        }
        assert_eq!(buffer.len(), 3);
    }

    #[tokio::test]
    async fn promotion_creates_missing_media_root() {
        let (buffer, _) = buffer(1, 1, 4);
        let root = buffer.media_root().to_path_buf();
        assert!(!root.exists());
        buffer.append(frame_at(0), 4);
        let clip = buffer.promote("person").await.expect("promote");
        assert!(root.is_dir());
        assert!(clip.path.starts_with(&root));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn mismatched_dimensions_fail_encoding() {
        let (buffer, encoder) = buffer(1, 1, 10);
        buffer.append(frame_at(0), 10);
        buffer.append(Frame::now(4, 1, vec![0; 12]).unwrap(), 10);
        let err = buffer.promote("person").await.unwrap_err();
        assert!(matches!(err, PorchwatchError::Encoding(_)));
        assert!(encoder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn labels_are_sanitized() {
        assert_eq!(sanitize_label("person"), "person");
        assert_eq!(sanitize_label("front door/../x"), "front_door____x");
        assert_eq!(sanitize_label("  "), "clip");
        assert_eq!(sanitize_label("manual-2"), "manual-2");
    }
}
