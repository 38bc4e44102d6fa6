use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use porchwatch_types::{config::NotificationConfig, Result};
use tracing::{debug, info};

/// Push notification seam. Failures are reported to the caller, never retried here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, snapshot: &Path, title: &str, body: &str) -> Result<()>;
}

/// A notification as it was handed to [`LogNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub snapshot: PathBuf,
    pub title: String,
    pub body: String,
    pub recipients: usize,
}

/// Logs each notification instead of contacting a push gateway.
pub struct LogNotifier {
    config: NotificationConfig,
    sent: Mutex<Vec<SentNotification>>,
}

impl LogNotifier {
    pub fn new(config: NotificationConfig) -> Self {
        Self {
            config,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, snapshot: &Path, title: &str, body: &str) -> Result<()> {
        let recipients = self.config.device_tokens.len();
        if recipients == 0 {
            debug!("No device tokens registered; skipping notification '{title}'");
            return Ok(());
        }
        info!(
            topic = %self.config.topic,
            recipients,
            "Notification '{title}': {body} ({:?})",
            snapshot
        );
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentNotification {
                snapshot: snapshot.to_path_buf(),
                title: title.to_string(),
                body: body.to_string(),
                recipients,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_without_device_tokens() {
        let notifier = LogNotifier::new(NotificationConfig::default());
        notifier
            .notify(Path::new("/tmp/a.png"), "Visitor detected", "Tap to open live feed")
            .await
            .expect("notify");
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn records_each_delivery() {
        let notifier = LogNotifier::new(NotificationConfig {
            device_tokens: vec!["token-a".into(), "token-b".into()],
            ..NotificationConfig::default()
        });
        notifier
            .notify(Path::new("/tmp/a.png"), "Visitor detected", "Tap to open live feed")
            .await
            .expect("notify");
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, 2);
        assert_eq!(sent[0].title, "Visitor detected");
    }
}
