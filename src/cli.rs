//! Command-line interface definitions.
//!
//! Secrets and endpoints are normally supplied through environment
//! variables; every one of them can also be given as a flag. Presence is
//! checked later by [`crate::config::RunConfig::from_cli`] so a missing
//! secret is reported as a configuration error before any network call.

use crate::profiles::HarvestIntent;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments.
///
/// # Examples
///
/// ```sh
/// # Firms, published to the webhook from SUPABASE_WEBHOOK_URL
/// delaware_leads --intent firms
///
/// # Leads, one harvest per county, deduplicated against the store
/// delaware_leads --intent leads --per-locality --supabase-table leads
///
/// # News triage without publishing
/// delaware_leads --intent news --dry-run
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// What to harvest
    #[arg(short, long, value_enum, default_value_t = HarvestIntent::Firms)]
    pub intent: HarvestIntent,

    /// YAML file merged over the built-in profile for the intent
    #[arg(short, long)]
    pub profile: Option<PathBuf>,

    /// API key for the generative service
    #[arg(long, env = "XAI_API_KEY", hide_env_values = true)]
    pub xai_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "XAI_API_BASE", default_value = "https://api.x.ai/v1")]
    pub xai_api_base: String,

    /// Model identifier
    #[arg(long, env = "XAI_MODEL", default_value = "grok-4-1-fast")]
    pub model: String,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.1)]
    pub temperature: f32,

    /// Completion token budget
    #[arg(long, default_value_t = 4096)]
    pub max_tokens: u32,

    /// Webhook receiving the published records
    #[arg(long, env = "SUPABASE_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Bearer token for the webhook
    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    pub webhook_token: Option<String>,

    /// Project URL of the remote store (enables store-backed deduplication)
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Key for reading the remote store
    #[arg(long, env = "SUPABASE_SERVICE_KEY", hide_env_values = true)]
    pub supabase_key: Option<String>,

    /// Table holding previously published records
    #[arg(long, env = "SUPABASE_TABLE")]
    pub supabase_table: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Retries for the generative and publish calls (0 disables retrying)
    #[arg(long, default_value_t = 0)]
    pub max_retries: usize,

    /// Initial retry delay in milliseconds, doubled per attempt
    #[arg(long, default_value_t = 1000)]
    pub retry_base_ms: u64,

    /// Pause between consecutive generative calls, in seconds
    #[arg(long, default_value_t = 2)]
    pub call_delay_secs: u64,

    /// Issue one harvest per locality listed in the profile
    #[arg(long)]
    pub per_locality: bool,

    /// Webhook status codes counted as success (repeatable)
    #[arg(long = "success-status", default_values_t = [200u16])]
    pub success_statuses: Vec<u16>,

    /// Run every stage but log the payload instead of posting it
    #[arg(long)]
    pub dry_run: bool,
}
