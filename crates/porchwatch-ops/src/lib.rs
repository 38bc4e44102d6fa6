//! Operational helpers: logging, event persistence, notifications.

mod notify;
mod store;

use std::path::{Path, PathBuf};

use porchwatch_types::{
    config::{OpsConfig, PorchwatchConfig},
    PorchwatchError, Result,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub use notify::{LogNotifier, Notifier, SentNotification};
pub use store::{EventStore, JsonLinesEventStore, MemoryEventStore};

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| PorchwatchError::Ops(format!("failed to create log filter: {err}")))?;

    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| PorchwatchError::Ops(format!("tracing init error: {err}")))?;
    Ok(())
}

pub fn ensure_dir(path: &Path) -> Result<PathBuf> {
    let dir = path.to_path_buf();
    std::fs::create_dir_all(&dir).map_err(|err| {
        PorchwatchError::Ops(format!("failed to create directory {:?}: {err}", dir))
    })?;
    Ok(dir)
}

/// Create the media root, the relay's segment directory and the event log's parent.
pub fn prepare_directories(config: &PorchwatchConfig) -> Result<()> {
    ensure_dir(&config.buffer.media_root)?;
    if config.relay.enabled {
        ensure_dir(&config.relay.segment_dir())?;
    }
    if let Some(parent) = config.buffer.event_log.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }
    info!("Storage directories ready under {:?}", config.buffer.media_root);
    Ok(())
}

pub fn ops_error(message: impl Into<String>) -> PorchwatchError {
    PorchwatchError::Ops(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepares_all_storage_directories() {
        let root = std::env::temp_dir().join(format!("porchwatch-ops-{}", uuid::Uuid::new_v4()));
        let mut config = PorchwatchConfig::default();
        config.buffer.media_root = root.join("media");
        config.buffer.event_log = root.join("db").join("events.jsonl");
        config.relay.playlist_path = root.join("media").join("hls").join("playlist.m3u8");

        prepare_directories(&config).expect("prepare");
        assert!(root.join("media").is_dir());
        assert!(root.join("media").join("hls").is_dir());
        assert!(root.join("db").is_dir());
        std::fs::remove_dir_all(&root).expect("cleanup");
    }
}
