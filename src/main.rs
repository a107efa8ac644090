//! # Delaware Leads
//!
//! Batch job that asks a web-search-capable language model for Delaware
//! architecture firms, pre-bid construction projects or construction news,
//! turns the replies into validated, deduplicated records and posts them to
//! a Supabase webhook.
//!
//! ## Usage
//!
//! ```sh
//! XAI_API_KEY=... SUPABASE_WEBHOOK_URL=... SUPABASE_ANON_KEY=... \
//!     delaware_leads --intent leads --per-locality
//! ```
//!
//! ## Architecture
//!
//! Every run is one pass through five stages:
//! 1. **Harvest**: prompt the model (per locality or once for the region)
//! 2. **Normalize**: recover JSON records from free-text replies
//! 3. **Validate**: drop records that break the intent's rules
//! 4. **Deduplicate**: drop records already seen in this run or in the store
//! 5. **Publish**: post the survivors to the webhook in one request
//!
//! Only configuration errors end the process with a non-zero status; every
//! other failure is logged and summarized.

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod api;
mod cli;
mod config;
mod dedup;
mod error;
mod harvest;
mod models;
mod normalize;
mod pipeline;
mod profiles;
mod publish;
mod scrapers;
mod store;
mod utils;
mod validate;

use cli::Cli;
use config::RunConfig;
use profiles::IntentProfile;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();
    info!(intent = %args.intent, dry_run = args.dry_run, "delaware_leads starting up");

    let config = RunConfig::from_cli(&args)
        .inspect_err(|e| error!(error = %e, "Invalid configuration; nothing was attempted"))?;
    debug!(?config, "Resolved configuration");

    let profile = IntentProfile::load(args.intent, args.profile.as_deref())
        .inspect_err(|e| error!(error = %e, "Could not load profile"))?;

    let summary = pipeline::run(&config, &profile).await?;
    summary.log();

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}
