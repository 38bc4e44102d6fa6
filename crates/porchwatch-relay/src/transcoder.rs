use std::{
    env,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use porchwatch_types::{config::RelayConfig, vision::Frame, Result};
use tokio::{
    fs,
    io::AsyncWriteExt,
    process::{Child, ChildStdin, Command},
};
use tracing::{debug, info, warn};

use crate::{launch_error, relay_error};

/// Launch parameters for one transcoder process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: String,
    pub segment_seconds: u32,
    pub list_size: u32,
    pub playlist: PathBuf,
}

impl TranscoderParams {
    pub fn for_frame(config: &RelayConfig, frame: &Frame, fps: u32) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            fps: fps.max(1),
            codec: config.video_codec.clone(),
            segment_seconds: config.segment_seconds,
            list_size: config.list_size,
            playlist: config.playlist_path.clone(),
        }
    }

    pub fn segment_pattern(&self) -> PathBuf {
        self.playlist
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("segment_%03d.ts")
    }

    /// ffmpeg arguments: raw RGB24 on stdin, rolling HLS playlist on disk.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "warning".into(),
            "-y".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-s".into(),
            format!("{}x{}", self.width, self.height),
            "-r".into(),
            self.fps.to_string(),
            "-i".into(),
            "-".into(),
            "-c:v".into(),
            self.codec.clone(),
            "-preset".into(),
            "veryfast".into(),
            "-tune".into(),
            "zerolatency".into(),
            "-vf".into(),
            "format=yuv420p".into(),
            "-f".into(),
            "hls".into(),
            "-hls_time".into(),
            self.segment_seconds.to_string(),
            "-hls_list_size".into(),
            self.list_size.to_string(),
            "-hls_flags".into(),
            "delete_segments+append_list".into(),
            "-hls_segment_filename".into(),
            self.segment_pattern().to_string_lossy().into_owned(),
            self.playlist.to_string_lossy().into_owned(),
        ]
    }
}

/// Starts external transcoder processes for the relay feeder.
#[async_trait]
pub trait TranscoderLauncher: Send + Sync {
    /// Whether the transcoder can be started on this host at all.
    fn is_available(&self) -> bool;
    async fn launch(&self, params: &TranscoderParams) -> Result<Box<dyn TranscoderProcess>>;
}

/// A running transcoder owned by the feeder task.
#[async_trait]
pub trait TranscoderProcess: Send {
    fn pid(&self) -> Option<u32>;
    fn is_alive(&mut self) -> bool;
    async fn write_frame(&mut self, data: &[u8]) -> Result<()>;
    /// Close the input pipe, wait up to `timeout`, then kill.
    async fn shutdown(&mut self, timeout: Duration);
}

/// Launches ffmpeg as an HLS segmenter.
pub struct FfmpegLauncher {
    binary: String,
    resolved: Option<PathBuf>,
}

impl FfmpegLauncher {
    pub fn new(config: &RelayConfig) -> Self {
        let resolved = resolve_binary(&config.ffmpeg_path);
        if resolved.is_none() {
            debug!("transcoder binary '{}' not found", config.ffmpeg_path);
        }
        Self {
            binary: config.ffmpeg_path.clone(),
            resolved,
        }
    }
}

#[async_trait]
impl TranscoderLauncher for FfmpegLauncher {
    fn is_available(&self) -> bool {
        self.resolved.is_some()
    }

    async fn launch(&self, params: &TranscoderParams) -> Result<Box<dyn TranscoderProcess>> {
        let program = self
            .resolved
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.binary));
        if let Some(dir) = params.playlist.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|err| launch_error(format!("cannot create {dir:?}: {err}")))?;
        }

        let mut child = Command::new(&program)
            .args(params.ffmpeg_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| launch_error(format!("failed to start {:?}: {err}", program)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| launch_error("failed to capture transcoder stdin"))?;

        info!(
            "Started transcoder pid={:?} {}x{} @ {}fps -> {:?}",
            child.id(),
            params.width,
            params.height,
            params.fps,
            params.playlist
        );
        Ok(Box::new(FfmpegProcess {
            child,
            stdin: Some(stdin),
        }))
    }
}

pub struct FfmpegProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl TranscoderProcess for FfmpegProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| relay_error("transcoder stdin unavailable"))?;
        stdin
            .write_all(data)
            .await
            .map_err(|err| relay_error(format!("transcoder pipe write failed: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| relay_error(format!("transcoder pipe flush failed: {err}")))
    }

    async fn shutdown(&mut self, timeout: Duration) {
        // Dropping stdin delivers EOF so ffmpeg can finish the playlist.
        self.stdin.take();
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => debug!("transcoder exited with {status}"),
            Ok(Err(err)) => warn!("transcoder wait failed: {err}"),
            Err(_) => {
                warn!(
                    "transcoder pid={:?} ignored EOF for {:?}; killing",
                    self.child.id(),
                    timeout
                );
                if let Err(err) = self.child.kill().await {
                    warn!("transcoder kill failed: {err}");
                }
            }
        }
    }
}

/// Remove a previous run's playlist and its `.ts` segments.
pub async fn purge_artifacts(playlist: &Path) -> Result<()> {
    match fs::remove_file(playlist).await {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => return Err(err.into()),
        _ => {}
    }
    let Some(dir) = playlist.parent() else {
        return Ok(());
    };
    if !fs::metadata(dir).await.is_ok_and(|meta| meta.is_dir()) {
        return Ok(());
    }
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "ts") {
            fs::remove_file(&path).await?;
        }
    }
    Ok(())
}

/// Locate `binary` the way a shell would: as a path if it contains a separator,
/// otherwise by searching `PATH`.
pub fn resolve_binary(binary: &str) -> Option<PathBuf> {
    let candidate = Path::new(binary);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(binary))
        .find(|path| path.is_file())
}
