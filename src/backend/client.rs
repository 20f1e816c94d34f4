use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::browser::gateway::ExecutionReport;
use crate::cli::config::BackendSettings;
use crate::worker::error::{LoadQueueError, SyncError};
use crate::worker::resolver::sync_entity_id;
use crate::worker::task::{FetchTask, OutcomeStatus, Queue};

/// HTTP client for the storage backend: pulls fresh queues and pushes
/// fetched results, one per task.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    source: String,
}

impl BackendClient {
    pub fn new(settings: &BackendSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            source: settings.source.clone(),
        })
    }

    /// Fetch a fresh queue for the given comma-separated community ids
    pub async fn fetch_queue(&self, community_ids: &str) -> Result<Queue, LoadQueueError> {
        let endpoint = format!("{}/api/fetch-queue", self.base_url);

        debug!("Requesting queue for communities: {}", community_ids);

        let response = self
            .client
            .get(&endpoint)
            .query(&[("communityIds", community_ids)])
            .send()
            .await
            .map_err(|e| LoadQueueError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LoadQueueError::Backend(format!(
                "HTTP {}",
                response.status()
            )));
        }

        response
            .json::<Queue>()
            .await
            .map_err(|e| LoadQueueError::Backend(format!("invalid queue payload: {e}")))
    }

    /// Push one fetched result. Skipped outcomes are silently ignored; a
    /// failure here is reported but must never roll back queue progress.
    pub async fn sync(&self, report: &ExecutionReport, task: &FetchTask) -> Result<(), SyncError> {
        if report.status == OutcomeStatus::Skipped {
            return Ok(());
        }
        let Some(data) = &report.data else {
            return Ok(());
        };

        let entity_id = sync_entity_id(task);
        let mut wrapped = match data {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
        };
        // Fetched payloads that already carry an id keep it
        wrapped
            .entry("id".to_string())
            .or_insert_with(|| Value::String(entity_id.clone()));

        let payload = json!({
            "action": "fetch",
            "timestamp": Utc::now(),
            "entityType": report.entity_type,
            "source": self.source,
            "data": wrapped,
        });

        let endpoint = format!("{}/api/sync", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SyncError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Http {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        debug!(entity_id = %entity_id, "result synced to backend");
        Ok(())
    }
}
