//! Escalation Gateway
//!
//! Fire-and-forget fan-out of an [`EscalationRecord`] to every configured
//! channel. Delivery failures are logged and never block the watchdog: the
//! ESCALATED status in the incident log is the signal of record.

mod channels;

pub use channels::{FileDropChannel, LogChannel, WebhookChannel};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{ChannelConfig, EscalationConfig};
use crate::storage::StorageError;
use crate::types::EscalationRecord;

#[derive(Debug, thiserror::Error)]
pub enum EscalationDeliveryError {
    #[error("notification write failed: {0}")]
    Storage(#[from] StorageError),
    #[error("webhook {url}: {source}")]
    Http { url: String, source: reqwest::Error },
}

/// A notification backend
#[async_trait]
pub trait EscalationChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, record: &EscalationRecord) -> Result<(), EscalationDeliveryError>;
}

/// Which channels accepted the notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub incident_id: String,
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
    pub at: DateTime<Utc>,
}

impl DeliveryReceipt {
    pub fn fully_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct EscalationGateway {
    channels: Vec<Arc<dyn EscalationChannel>>,
}

impl EscalationGateway {
    pub fn new(channels: Vec<Arc<dyn EscalationChannel>>) -> Self {
        Self { channels }
    }

    /// Build channels from config. `notification_dir` is the file-drop
    /// default when a channel does not name its own directory.
    pub fn from_config(config: &EscalationConfig, notification_dir: &Path) -> Result<Self, EscalationDeliveryError> {
        let mut channels: Vec<Arc<dyn EscalationChannel>> = Vec::with_capacity(config.channels.len());
        for channel in &config.channels {
            match channel {
                ChannelConfig::Log => channels.push(Arc::new(LogChannel)),
                ChannelConfig::FileDrop { dir } => {
                    let dir = dir.clone().unwrap_or_else(|| notification_dir.to_path_buf());
                    channels.push(Arc::new(FileDropChannel::new(dir)));
                }
                ChannelConfig::Webhook { url, timeout_secs } => {
                    channels.push(Arc::new(WebhookChannel::new(url.clone(), *timeout_secs)?));
                }
            }
        }
        Ok(Self::new(channels))
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    /// Attempt every channel concurrently
    pub async fn notify(&self, record: &EscalationRecord) -> DeliveryReceipt {
        let results = futures::future::join_all(self.channels.iter().map(|channel| async move {
            (channel.name().to_string(), channel.deliver(record).await)
        }))
        .await;

        let mut receipt = DeliveryReceipt {
            incident_id: record.incident_id.clone(),
            delivered: Vec::new(),
            failed: Vec::new(),
            at: Utc::now(),
        };
        for (name, result) in results {
            match result {
                Ok(()) => receipt.delivered.push(name),
                Err(e) => {
                    warn!(incident = %record.incident_id, channel = %name, error = %e, "Escalation delivery failed");
                    receipt.failed.push(name);
                }
            }
        }

        info!(
            incident = %record.incident_id,
            delivered = ?receipt.delivered,
            failed = ?receipt.failed,
            "📣 Escalation notifications sent"
        );
        receipt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    #[async_trait]
    impl EscalationChannel for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn deliver(&self, _record: &EscalationRecord) -> Result<(), EscalationDeliveryError> {
            Err(EscalationDeliveryError::Storage(StorageError::Io {
                path: "/nowhere".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            }))
        }
    }

    fn record() -> EscalationRecord {
        EscalationRecord {
            incident_id: "INC-1".into(),
            process_id: "launcher".into(),
            escalated_at: Utc::now(),
            reason: "strategies exhausted".into(),
            notified_channels: vec![],
            acknowledged_at: None,
            acknowledged_by: None,
        }
    }

    #[tokio::test]
    async fn test_failed_channel_does_not_stop_others() {
        let gateway = EscalationGateway::new(vec![Arc::new(Broken), Arc::new(LogChannel)]);
        let receipt = gateway.notify(&record()).await;
        assert_eq!(receipt.delivered, vec!["log"]);
        assert_eq!(receipt.failed, vec!["broken"]);
        assert!(!receipt.fully_delivered());
    }

    #[test]
    fn test_from_config_uses_default_drop_dir() {
        let gateway = EscalationGateway::from_config(&EscalationConfig::default(), Path::new("/tmp/n")).unwrap();
        assert_eq!(gateway.channel_names(), vec!["log", "file_drop"]);
    }
}
