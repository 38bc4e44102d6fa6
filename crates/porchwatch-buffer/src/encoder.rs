use std::{
    io::{Read, Write},
    path::Path,
    process::{Command, Stdio},
    thread,
};

use porchwatch_types::{vision::Frame, Result};
use tracing::{debug, info};

use crate::encoding_error;

/// Turns an ordered run of same-sized frames into a container file.
///
/// Implementations block; callers run them on the blocking pool.
pub trait ClipEncoder: Send + Sync {
    /// Encode `frames` at `fps` into `output`, returning the number of frames written.
    fn encode(&self, frames: &[Frame], fps: u32, output: &Path) -> Result<usize>;
}

/// Encodes clips by piping raw RGB24 frames into an ffmpeg child process.
#[derive(Debug, Clone)]
pub struct FfmpegClipEncoder {
    ffmpeg_path: String,
    codec: String,
}

impl FfmpegClipEncoder {
    pub fn new(ffmpeg_path: impl Into<String>, codec: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            codec: codec.into(),
        }
    }

    pub fn args(&self, width: u32, height: u32, fps: u32, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-s".into(),
            format!("{width}x{height}"),
            "-r".into(),
            fps.to_string(),
            "-i".into(),
            "-".into(),
            "-c:v".into(),
            self.codec.clone(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-movflags".into(),
            "+faststart".into(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

impl ClipEncoder for FfmpegClipEncoder {
    fn encode(&self, frames: &[Frame], fps: u32, output: &Path) -> Result<usize> {
        let Some(first) = frames.first() else {
            return Ok(0);
        };
        let (width, height) = first.dimensions();
        let args = self.args(width, height, fps, output);
        debug!("clip encoder args: {:?}", args);

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| encoding_error(format!("failed to start {}: {err}", self.ffmpeg_path)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| encoding_error("failed to capture encoder stdin"))?;
        // Drained concurrently so a chatty encoder cannot stall on a full stderr pipe.
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut output = String::new();
                let _ = pipe.read_to_string(&mut output);
                output
            })
        });

        let mut written = 0usize;
        let mut write_failure = None;
        for frame in frames {
            if let Err(err) = stdin.write_all(frame.data()) {
                write_failure = Some(err);
                break;
            }
            written += 1;
        }
        // EOF tells ffmpeg to finalize the container.
        drop(stdin);

        let status = child
            .wait()
            .map_err(|err| encoding_error(format!("encoder wait failed: {err}")))?;
        let stderr = stderr_reader
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();

        if let Some(err) = write_failure {
            return Err(encoding_error(format!(
                "encoder pipe closed after {written} frames: {err}; {}",
                stderr.trim()
            )));
        }
        if !status.success() {
            return Err(encoding_error(format!(
                "encoder exited with {status}: {}",
                stderr.trim()
            )));
        }

        info!(
            "Encoded {} frames {}x{} @ {}fps -> {:?}",
            written, width, height, fps, output
        );
        Ok(written)
    }
}
