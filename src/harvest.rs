//! Harvest stage: prompt the model and turn its replies into shaped records.
//!
//! One batch is one generative call. With `per_locality` every locality of
//! the profile gets its own batch, spaced by `call_delay`; otherwise the whole
//! region is asked for in a single batch.
//!
//! A reply that does not parse skips its batch (a truncated reply is re-asked
//! once first). A failed call stops the stage; records from earlier batches
//! are kept.

use crate::api::{ask_with_backoff, AskAsync, Backoff, Prompt};
use crate::error::PipelineError;
use crate::models::{Headline, Record};
use crate::normalize::{is_truncated, parse_records};
use crate::profiles::{IntentProfile, PromptVars};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// How batches are laid out and paced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarvestPlan {
    pub per_locality: bool,
    pub call_delay: Duration,
    pub backoff: Backoff,
}

#[derive(Debug, Default)]
pub struct HarvestReport {
    pub records: Vec<Record>,
    pub batches: usize,
    pub skipped_batches: usize,
    /// Error that ended the stage early, if any.
    pub aborted: Option<PipelineError>,
}

/// Batch targets: each locality, or `None` for the whole region.
fn targets<'a>(profile: &'a IntentProfile, per_locality: bool) -> Vec<Option<&'a str>> {
    if per_locality && !profile.localities.is_empty() {
        profile.localities.iter().map(|l| Some(l.as_str())).collect()
    } else {
        vec![None]
    }
}

pub fn build_prompt(profile: &IntentProfile, vars: &PromptVars<'_>) -> Prompt {
    Prompt {
        system: profile.render_system_prompt(vars),
        user: profile.render_user_prompt(vars),
        web_search: profile.web_search,
    }
}

#[instrument(level = "info", skip_all, fields(collection = %profile.collection_key))]
pub async fn harvest<A: AskAsync>(
    client: &A,
    profile: &IntentProfile,
    headlines: &[Headline],
    plan: HarvestPlan,
) -> HarvestReport {
    let mut report = HarvestReport::default();

    if profile.headlines.is_some() && headlines.is_empty() {
        warn!("No headlines to triage; skipping generative call");
        return report;
    }

    for (i, locality) in targets(profile, plan.per_locality).into_iter().enumerate() {
        if i > 0 && !plan.call_delay.is_zero() {
            sleep(plan.call_delay).await;
        }

        let vars = PromptVars {
            locality,
            headlines,
        };
        let prompt = build_prompt(profile, &vars);
        let area = locality.unwrap_or(profile.region_name.as_str());
        report.batches += 1;

        match ask_parsed(client, &prompt, plan.backoff).await {
            Ok(records) => {
                let before = report.records.len();
                report
                    .records
                    .extend(records.into_iter().map(|r| profile.shaping.apply(r)));
                info!(
                    area,
                    count = report.records.len() - before,
                    "Harvested batch"
                );
            }
            Err(PipelineError::MalformedOutput { reason, preview }) => {
                report.skipped_batches += 1;
                warn!(area, %reason, %preview, "Model reply did not parse; skipping batch");
            }
            Err(e) => {
                error!(area, error = %e, "Generative call failed; stopping harvest");
                report.aborted = Some(e);
                break;
            }
        }
    }

    info!(
        batches = report.batches,
        skipped = report.skipped_batches,
        records = report.records.len(),
        "Harvest complete"
    );
    report
}

/// Ask and parse; a truncated reply is re-asked once.
async fn ask_parsed<A: AskAsync>(
    client: &A,
    prompt: &Prompt,
    backoff: Backoff,
) -> crate::error::Result<Vec<Record>> {
    let reply = ask_with_backoff(client, prompt, backoff).await?;
    match parse_records(&reply) {
        Err(e) if is_truncated(&e) => {
            warn!(error = %e, "Truncated reply; re-asking once");
            let again = ask_with_backoff(client, prompt, backoff).await?;
            parse_records(&again)
        }
        other => other,
    }
}
