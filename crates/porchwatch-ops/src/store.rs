use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use porchwatch_types::{clip::PromotedEvent, PorchwatchError, Result};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, warn};

/// Persists promoted events. The engine only writes; it never reads back.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn record_event(&self, event: PromotedEvent) -> Result<()>;
}

/// In-memory store for development and tests.
#[derive(Clone, Default)]
pub struct MemoryEventStore {
    events: Arc<Mutex<Vec<PromotedEvent>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot_events(&self) -> Vec<PromotedEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn record_event(&self, event: PromotedEvent) -> Result<()> {
        event.validate()?;
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// Appends one JSON document per event to a log file.
pub struct JsonLinesEventStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesEventStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// All stored events, newest first. Unparseable lines are skipped.
    pub async fn list_events(&self) -> Result<Vec<PromotedEvent>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(storage_error(format!("read {:?}: {err}", self.path))),
        };
        let mut events: Vec<PromotedEvent> = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!("skipping malformed event record: {err}");
                    None
                }
            })
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(events)
    }
}

#[async_trait]
impl EventStore for JsonLinesEventStore {
    async fn record_event(&self, event: PromotedEvent) -> Result<()> {
        event.validate()?;
        let mut line = serde_json::to_string(&event)
            .map_err(|err| storage_error(format!("serialize event {}: {err}", event.id)))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|err| storage_error(format!("open {:?}: {err}", self.path)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|err| storage_error(format!("append {:?}: {err}", self.path)))?;
        file.flush().await?;
        debug!("Recorded event {} ({})", event.id, event.label);
        Ok(())
    }
}

pub fn storage_error(message: impl Into<String>) -> PorchwatchError {
    PorchwatchError::Storage(message.into())
}
