//! Webhook publishing of validated records.
//!
//! Records are posted once as `{"<collection_key>": [...]}` with a bearer
//! token. Success is judged by the configured status list (200 unless told
//! otherwise). A failed publish is reported, not retried, unless a
//! [`Backoff`] with retries was configured; the next scheduled run will
//! pick the records up again through deduplication.

use crate::api::Backoff;
use crate::error::{PipelineError, Result};
use crate::models::Record;
use crate::utils::truncate_for_log;
use itertools::Itertools;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// What [`WebhookPublisher::publish`] did when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Empty input; no request was made.
    NothingToPublish,
    /// Dry run; the payload was logged instead of sent.
    DryRun { count: usize },
    /// The webhook accepted the payload with `status`.
    Published { status: u16, count: usize },
}

/// Posts record batches to a webhook with a bearer token.
#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    http: reqwest::Client,
    url: String,
    token: String,
    timeout: Duration,
    success_statuses: Vec<u16>,
    backoff: Backoff,
    dry_run: bool,
}

/// Build the request body.
pub fn payload(collection_key: &str, records: &[Record]) -> Value {
    json!({ collection_key: records })
}

impl WebhookPublisher {
    /// Publisher accepting only `200`, without retries, posting for real.
    pub fn new(
        http: reqwest::Client,
        url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            url: url.into(),
            token: token.into(),
            timeout,
            success_statuses: vec![200],
            backoff: Backoff::default(),
            dry_run: false,
        }
    }

    /// Status codes counted as success. An empty list keeps the current one.
    pub fn with_success_statuses(mut self, statuses: Vec<u16>) -> Self {
        if !statuses.is_empty() {
            self.success_statuses = statuses;
        }
        self
    }

    /// Retry transient failures (network, timeout, 429, 5xx) per `backoff`.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Log the payload instead of sending it.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Send `records` under `collection_key`.
    ///
    /// # Arguments
    ///
    /// * `collection_key` - Payload key wrapping the record array
    /// * `records` - Records to send; empty means no request at all
    /// * `name_field` - Field used to list the published names in the log
    ///
    /// # Returns
    ///
    /// The [`PublishOutcome`], or `RemoteRejection` with the status and body
    /// when the webhook answers with a status outside the success list.
    #[instrument(level = "info", skip_all, fields(%collection_key, count = records.len()))]
    pub async fn publish(
        &self,
        collection_key: &str,
        records: &[Record],
        name_field: &str,
    ) -> Result<PublishOutcome> {
        if records.is_empty() {
            warn!("Nothing to publish");
            return Ok(PublishOutcome::NothingToPublish);
        }

        let body = payload(collection_key, records);
        let names = records.iter().map(|r| r.label(name_field)).join(", ");

        if self.dry_run {
            info!(
                count = records.len(),
                %names,
                payload = %truncate_for_log(&body.to_string(), 500),
                "Dry run; skipping webhook POST"
            );
            return Ok(PublishOutcome::DryRun {
                count: records.len(),
            });
        }

        let body = &body;
        let status = self
            .backoff
            .run("webhook publish", move || self.post_once(body))
            .await
            .inspect_err(|e| error!(error = %e, "Publish failed"))?;

        info!(status, count = records.len(), %names, "Published records");
        Ok(PublishOutcome::Published {
            status,
            count: records.len(),
        })
    }

    async fn post_once(&self, body: &Value) -> Result<u16> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| PipelineError::from_reqwest("webhook publish", self.timeout, e))?;

        let status = response.status().as_u16();
        if self.success_statuses.contains(&status) {
            return Ok(status);
        }
        let text = response.text().await.unwrap_or_default();
        Err(PipelineError::RemoteRejection {
            status,
            body: truncate_for_log(&text, 500),
        })
    }
}
