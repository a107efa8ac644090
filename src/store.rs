//! Read access to the remote store, used only to seed deduplication.
//!
//! The store speaks PostgREST: `GET /rest/v1/<table>?select=a,b&col=eq.v`
//! with `apikey` and bearer headers, answering with a JSON array of partial
//! rows. [`existing_fingerprints`] never fails: any problem degrades to an
//! empty set so the run still publishes (possibly re-inserting duplicates).

use crate::dedup::Deduplicator;
use crate::error::{PipelineError, Result};
use crate::models::Record;
use crate::utils::truncate_for_log;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, instrument, warn};
use urlencoding::encode;

/// `column = value` equality filter applied server-side.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EqFilter {
    /// Column name, sent as the query key.
    pub column: String,
    /// Compared with PostgREST `eq.`; URL-encoded on the wire.
    pub value: String,
}

/// PostgREST reader for one table.
#[derive(Debug, Clone)]
pub struct StoreReader {
    http: reqwest::Client,
    base_url: String,
    table: String,
    api_key: String,
    timeout: Duration,
}

impl StoreReader {
    /// Create a reader.
    ///
    /// # Arguments
    ///
    /// * `http` - Shared client
    /// * `base_url` - Project URL (`https://<project>.supabase.co`); a
    ///   trailing slash is dropped
    /// * `table` - Table holding previously published records
    /// * `api_key` - Sent as both `apikey` and bearer token
    /// * `timeout` - Per-request timeout
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        table: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            table: table.into(),
            api_key: api_key.into(),
            timeout,
        }
    }

    /// Full request URL selecting `select` columns, optionally filtered.
    pub fn query_url(&self, select: &[String], filter: Option<&EqFilter>) -> String {
        let mut url = format!(
            "{}/rest/v1/{}?select={}",
            self.base_url,
            encode(&self.table),
            encode(&select.join(","))
        );
        if let Some(f) = filter {
            url.push_str(&format!("&{}=eq.{}", encode(&f.column), encode(&f.value)));
        }
        url
    }

    /// Fetch the selected columns of every matching row.
    #[instrument(level = "info", skip_all, fields(table = %self.table))]
    pub async fn fetch_rows(&self, select: &[String], filter: Option<&EqFilter>) -> Result<Vec<Record>> {
        let response = self
            .http
            .get(self.query_url(select, filter))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PipelineError::from_reqwest("store read", self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::RemoteRejection {
                status: status.as_u16(),
                body: truncate_for_log(&text, 500),
            });
        }

        response
            .json::<Vec<Record>>()
            .await
            .map_err(|e| PipelineError::MalformedOutput {
                reason: format!("store rows: {e}"),
                preview: String::new(),
            })
    }
}

/// Fingerprints of the rows already stored, or an empty set on any failure.
///
/// Selects only the dedup fields of `dedup` and fingerprints every row the
/// same way candidates are fingerprinted. `None` for `reader` means no store
/// is configured.
#[instrument(level = "info", skip_all)]
pub async fn existing_fingerprints(
    reader: Option<&StoreReader>,
    dedup: &Deduplicator,
    filter: Option<&EqFilter>,
) -> HashSet<String> {
    let Some(reader) = reader else {
        info!("No remote store configured; deduplicating within this run only");
        return HashSet::new();
    };

    match reader.fetch_rows(&dedup.config().fields, filter).await {
        Ok(rows) => {
            let fingerprints: HashSet<String> = rows.iter().map(|r| dedup.fingerprint(r)).collect();
            info!(rows = rows.len(), fingerprints = fingerprints.len(), "Loaded existing fingerprints");
            fingerprints
        }
        Err(e) => {
            warn!(error = %e, "Could not load existing records; continuing without prior knowledge");
            HashSet::new()
        }
    }
}
