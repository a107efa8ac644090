//! Validated run configuration.
//!
//! Built once from the CLI/environment and passed to every stage. All
//! required secrets and endpoints are checked here, before any network
//! call; a missing or unusable value is a fatal `Configuration` error.

use crate::api::{Backoff, GenerationSettings};
use crate::cli::Cli;
use crate::error::{PipelineError, Result};
use crate::validate::is_http_url;
use std::fmt;
use std::time::Duration;

/// Remote store settings used to seed deduplication.
#[derive(Clone, PartialEq)]
pub struct StoreConfig {
    pub url: String,
    pub key: String,
    pub table: String,
}

#[derive(Clone, PartialEq)]
pub struct RunConfig {
    pub api_key: String,
    pub api_base: String,
    pub generation: GenerationSettings,
    pub webhook_url: String,
    pub webhook_token: String,
    pub store: Option<StoreConfig>,
    pub timeout: Duration,
    pub backoff: Backoff,
    pub call_delay: Duration,
    pub per_locality: bool,
    pub success_statuses: Vec<u16>,
    pub dry_run: bool,
}

// Secrets stay out of logs.
impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("api_base", &self.api_base)
            .field("generation", &self.generation)
            .field("webhook_url", &self.webhook_url)
            .field("store", &self.store.as_ref().map(|s| (&s.url, &s.table)))
            .field("timeout", &self.timeout)
            .field("backoff", &self.backoff)
            .field("call_delay", &self.call_delay)
            .field("per_locality", &self.per_locality)
            .field("success_statuses", &self.success_statuses)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

fn required(value: Option<&String>, name: &str) -> Result<String> {
    match value.map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(PipelineError::Configuration(format!("{name} is not set"))),
    }
}

fn endpoint(value: String, name: &str) -> Result<String> {
    if is_http_url(&value) {
        Ok(value)
    } else {
        Err(PipelineError::Configuration(format!(
            "{name} is not an http(s) URL: {value}"
        )))
    }
}

impl RunConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let api_key = required(cli.xai_api_key.as_ref(), "XAI_API_KEY")?;
        let api_base = endpoint(cli.xai_api_base.trim().to_string(), "XAI_API_BASE")?;
        let webhook_url = endpoint(
            required(cli.webhook_url.as_ref(), "SUPABASE_WEBHOOK_URL")?,
            "SUPABASE_WEBHOOK_URL",
        )?;
        let webhook_token = required(cli.webhook_token.as_ref(), "SUPABASE_ANON_KEY")?;

        let store = match &cli.supabase_url {
            Some(url) if !url.trim().is_empty() => Some(StoreConfig {
                url: endpoint(url.trim().to_string(), "SUPABASE_URL")?,
                key: required(cli.supabase_key.as_ref(), "SUPABASE_SERVICE_KEY")?,
                table: required(cli.supabase_table.as_ref(), "SUPABASE_TABLE")?,
            }),
            _ => None,
        };

        if cli.timeout_secs == 0 {
            return Err(PipelineError::Configuration(
                "timeout must be at least one second".to_string(),
            ));
        }
        if cli.model.trim().is_empty() {
            return Err(PipelineError::Configuration("XAI_MODEL is empty".to_string()));
        }

        let timeout = Duration::from_secs(cli.timeout_secs);
        Ok(Self {
            api_key,
            api_base,
            generation: GenerationSettings {
                model: cli.model.trim().to_string(),
                temperature: cli.temperature,
                max_tokens: cli.max_tokens,
                timeout,
            },
            webhook_url,
            webhook_token,
            store,
            timeout,
            backoff: Backoff::new(cli.max_retries, Duration::from_millis(cli.retry_base_ms)),
            call_delay: Duration::from_secs(cli.call_delay_secs),
            per_locality: cli.per_locality,
            success_statuses: cli.success_statuses.clone(),
            dry_run: cli.dry_run,
        })
    }
}
