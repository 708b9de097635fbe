//! Built-in escalation channels

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;

use super::{EscalationChannel, EscalationDeliveryError};
use crate::storage;
use crate::types::EscalationRecord;

/// Error-level tracing event
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

#[async_trait]
impl EscalationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, record: &EscalationRecord) -> Result<(), EscalationDeliveryError> {
        error!(
            incident = %record.incident_id,
            process = %record.process_id,
            reason = %record.reason,
            "🆘 HUMAN INTERVENTION REQUIRED: run `warden ack {}` once resolved",
            record.incident_id
        );
        Ok(())
    }
}

/// One `escalation_<incident_id>.json` file per escalation, for external pickup
#[derive(Debug, Clone)]
pub struct FileDropChannel {
    dir: PathBuf,
}

impl FileDropChannel {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl EscalationChannel for FileDropChannel {
    fn name(&self) -> &str {
        "file_drop"
    }

    async fn deliver(&self, record: &EscalationRecord) -> Result<(), EscalationDeliveryError> {
        let path = self.dir.join(format!("escalation_{}.json", record.incident_id));
        storage::write_json_atomic(&path, record)?;
        Ok(())
    }
}

/// HTTP POST of the record as JSON
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self, EscalationDeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|source| EscalationDeliveryError::Http { url: url.clone(), source })?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl EscalationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, record: &EscalationRecord) -> Result<(), EscalationDeliveryError> {
        let http = |source| EscalationDeliveryError::Http { url: self.url.clone(), source };
        self.client
            .post(&self.url)
            .json(record)
            .send()
            .await
            .map_err(http)?
            .error_for_status()
            .map_err(http)?;
        Ok(())
    }
}
