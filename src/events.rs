use crate::adapter::Platform;
use crate::detection::ClassificationResult;
use crate::rewrite::Variant;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many times a commit record is offered to the logging service
/// before it is dropped. Forwarding is best-effort by contract.
pub const FORWARD_ATTEMPTS: u32 = 2;

/// The unit sent to the external logging service once a cycle
/// completes. Immutable after creation; carries classification metadata
/// and the chosen variant, never the raw draft history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    pub platform: Platform,
    pub user_email: String,
    pub result: ClassificationResult,
    pub chosen: Variant,
    pub committed_at: DateTime<Utc>,
}

impl CommitRecord {
    pub fn new(
        platform: Platform,
        user_email: &str,
        result: ClassificationResult,
        chosen: Variant,
    ) -> Self {
        CommitRecord {
            platform,
            user_email: user_email.to_string(),
            result,
            chosen,
            committed_at: Utc::now(),
        }
    }
}

/// Client for the logging/liveness collaborator.
pub struct EventsClient {
    http: reqwest::Client,
    service_url: String,
    api_key: String,
}

impl EventsClient {
    pub fn new(service_url: &str, api_key: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build events HTTP client")?;
        Ok(EventsClient {
            http,
            service_url: service_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Liveness probe against the remote service.
    pub async fn check_health(&self) -> bool {
        let url = format!("{}/health", self.service_url);
        match self.http.get(&url).header("X-API-Key", &self.api_key).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                log::debug!("health probe failed: {e}");
                false
            }
        }
    }

    /// Forward a commit record, swallowing every failure. Callers must
    /// never block a user-facing cycle on this path.
    pub async fn forward(&self, record: &CommitRecord) {
        for attempt in 1..=FORWARD_ATTEMPTS {
            match self.post_event(record).await {
                Ok(()) => {
                    log::debug!("commit record forwarded for {}", record.platform.label());
                    return;
                }
                Err(e) => {
                    log::warn!("event forward attempt {attempt}/{FORWARD_ATTEMPTS} failed: {e}");
                }
            }
        }
        log::warn!(
            "dropping commit record for {} after {FORWARD_ATTEMPTS} attempts",
            record.platform.label()
        );
    }

    async fn post_event(&self, record: &CommitRecord) -> anyhow::Result<()> {
        let url = format!("{}/events", self.service_url);
        let response = self
            .http
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(record)
            .send()
            .await
            .context("event request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("logging service returned {}", response.status());
        }
        Ok(())
    }
}
