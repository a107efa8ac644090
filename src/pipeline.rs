//! One complete run: harvest → validate → deduplicate → publish.
//!
//! Only configuration problems escape as errors. A failed harvest call, an
//! unreachable store or a rejected publish is logged and recorded in the
//! [`RunSummary`], and the run still completes.

use crate::api::ChatClient;
use crate::config::RunConfig;
use crate::dedup::Deduplicator;
use crate::error::{PipelineError, Result};
use crate::harvest::{harvest, HarvestPlan};
use crate::models::Headline;
use crate::profiles::IntentProfile;
use crate::publish::{PublishOutcome, WebhookPublisher};
use crate::scrapers::google_news;
use crate::store::{existing_fingerprints, StoreReader};
use crate::validate::validate;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug)]
pub struct RunSummary {
    pub harvested: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub accepted: usize,
    pub harvest_error: Option<PipelineError>,
    pub publish: Result<PublishOutcome>,
}

impl RunSummary {
    /// Whether every stage finished without a recorded failure.
    pub fn is_clean(&self) -> bool {
        self.harvest_error.is_none() && self.publish.is_ok()
    }

    pub fn log(&self) {
        let publish = match &self.publish {
            Ok(outcome) => format!("{outcome:?}"),
            Err(e) => format!("failed: {e}"),
        };
        if self.is_clean() {
            info!(
                harvested = self.harvested,
                rejected = self.rejected,
                duplicates = self.duplicates,
                accepted = self.accepted,
                %publish,
                "Run summary"
            );
        } else {
            warn!(
                harvested = self.harvested,
                rejected = self.rejected,
                duplicates = self.duplicates,
                accepted = self.accepted,
                harvest_error = ?self.harvest_error.as_ref().map(|e| e.to_string()),
                %publish,
                "Run finished with failures"
            );
        }
    }
}

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| PipelineError::Configuration(format!("HTTP client: {e}")))
}

#[instrument(level = "info", skip_all, fields(collection = %profile.collection_key))]
pub async fn run(config: &RunConfig, profile: &IntentProfile) -> Result<RunSummary> {
    let http = http_client()?;
    let t0 = Instant::now();

    // ---- Headlines (news only) ----
    let headlines: Vec<Headline> = match &profile.headlines {
        Some(source) => {
            google_news::fetch_headlines(&http, &source.feed_url, source.limit, config.timeout)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Could not fetch headlines");
                    Vec::new()
                })
        }
        None => Vec::new(),
    };

    // ---- Harvest ----
    let chat = ChatClient::new(
        http.clone(),
        &config.api_base,
        &config.api_key,
        config.generation.clone(),
    );
    let plan = HarvestPlan {
        per_locality: config.per_locality,
        call_delay: config.call_delay,
        backoff: config.backoff,
    };
    let report = harvest(&chat, profile, &headlines, plan).await;
    let harvested = report.records.len();

    // ---- Validate ----
    let validation = validate(report.records, &profile.rules);

    // ---- Deduplicate ----
    let dedup = Deduplicator::new(profile.dedup.clone());
    let reader = config.store.as_ref().map(|store| {
        StoreReader::new(
            http.clone(),
            &store.url,
            &store.table,
            &store.key,
            config.timeout,
        )
    });
    let existing = existing_fingerprints(reader.as_ref(), &dedup, profile.store_filter.as_ref()).await;
    let deduped = dedup.dedup(&validation.accepted, &existing, profile.name_field());

    // ---- Publish ----
    let publisher = WebhookPublisher::new(
        http,
        &config.webhook_url,
        &config.webhook_token,
        config.timeout,
    )
    .with_success_statuses(config.success_statuses.clone())
    .with_backoff(config.backoff)
    .with_dry_run(config.dry_run);
    let publish = publisher
        .publish(&profile.collection_key, &deduped.accepted, profile.name_field())
        .await;
    if let Err(e) = &publish {
        error!(error = %e, "Records were not published");
    }

    let elapsed = t0.elapsed();
    info!(?elapsed, secs = elapsed.as_secs(), "Pipeline finished");

    Ok(RunSummary {
        harvested,
        rejected: validation.rejected.len(),
        duplicates: deduped.duplicates.len(),
        accepted: deduped.accepted.len(),
        harvest_error: report.aborted,
        publish,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Backoff, GenerationSettings};
    use crate::config::StoreConfig;
    use crate::profiles::HarvestIntent;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> RunConfig {
        RunConfig {
            api_key: "xai-key".into(),
            api_base: server.uri(),
            generation: GenerationSettings {
                model: "grok-test".into(),
                temperature: 0.1,
                max_tokens: 1024,
                timeout: Duration::from_secs(5),
            },
            webhook_url: format!("{}/functions/v1/ingest", server.uri()),
            webhook_token: "anon".into(),
            store: None,
            timeout: Duration::from_secs(5),
            backoff: Backoff::default(),
            call_delay: Duration::ZERO,
            per_locality: false,
            success_statuses: vec![200],
            dry_run: false,
        }
    }

    fn completion(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        }))
    }

    const FIRMS_REPLY: &str = r#"Here are the firms:
```json
[
  {"name": "Acme Design", "city": "Dover", "state": "DE", "website": "https://acme.example"},
  {"name": "Acme Design LLC", "city": "Dover", "state": "DE", "website": "https://acme.example/about"},
  {"name": "Ftp Partners", "city": "Newark", "state": "DE", "website": "ftp://ftp.example"},
  {"name": "Jersey Studio", "city": "Trenton", "state": "NJ", "website": "https://jersey.example"},
]
```"#;

    #[tokio::test]
    async fn test_firms_run_publishes_only_clean_unique_records() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer xai-key"))
            .respond_with(completion(FIRMS_REPLY))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/functions/v1/ingest"))
            .and(header("authorization", "Bearer anon"))
            .and(body_json(json!({
                "firms": [
                    {"name": "Acme Design", "city": "Dover", "state": "DE", "website": "https://acme.example"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let profile = IntentProfile::builtin(HarvestIntent::Firms);
        let summary = run(&config(&server), &profile).await.unwrap();

        assert_eq!(summary.harvested, 4);
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.accepted, 1);
        assert_eq!(
            summary.publish.unwrap(),
            PublishOutcome::Published { status: 200, count: 1 }
        );
    }

    #[tokio::test]
    async fn test_empty_harvest_makes_no_publish_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion("No firms matched: []"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/functions/v1/ingest"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let profile = IntentProfile::builtin(HarvestIntent::Firms);
        let summary = run(&config(&server), &profile).await.unwrap();
        assert_eq!(summary.harvested, 0);
        assert_eq!(summary.publish.unwrap(), PublishOutcome::NothingToPublish);
    }

    #[tokio::test]
    async fn test_webhook_500_is_reported_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion(FIRMS_REPLY))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/functions/v1/ingest"))
            .respond_with(ResponseTemplate::new(500).set_body_string("insert failed"))
            .mount(&server)
            .await;

        let profile = IntentProfile::builtin(HarvestIntent::Firms);
        let summary = run(&config(&server), &profile).await.unwrap();
        assert!(!summary.is_clean());
        match summary.publish {
            Err(PipelineError::RemoteRejection { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "insert failed");
            }
            other => panic!("expected RemoteRejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generative_failure_still_completes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let profile = IntentProfile::builtin(HarvestIntent::Firms);
        let summary = run(&config(&server), &profile).await.unwrap();
        assert!(matches!(
            summary.harvest_error,
            Some(PipelineError::RemoteRejection { status: 401, .. })
        ));
        assert_eq!(summary.publish.unwrap(), PublishOutcome::NothingToPublish);
    }

    #[tokio::test]
    async fn test_store_fingerprints_suppress_known_records() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion(FIRMS_REPLY))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/firms"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"name": "The Acme Design Co.", "city": "DOVER"}])),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/functions/v1/ingest"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.store = Some(StoreConfig {
            url: server.uri(),
            key: "service".into(),
            table: "firms".into(),
        });
        let profile = IntentProfile::builtin(HarvestIntent::Firms);
        let summary = run(&config, &profile).await.unwrap();
        assert_eq!(summary.accepted, 0);
        assert_eq!(summary.duplicates, 2);
        assert_eq!(summary.publish.unwrap(), PublishOutcome::NothingToPublish);
    }

    #[tokio::test]
    async fn test_news_feed_outage_skips_model_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion("[]"))
            .expect(0)
            .mount(&server)
            .await;

        let mut profile = IntentProfile::builtin(HarvestIntent::News);
        if let Some(source) = profile.headlines.as_mut() {
            source.feed_url = format!("{}/rss/search", server.uri());
        }
        let summary = run(&config(&server), &profile).await.unwrap();
        assert_eq!(summary.harvested, 0);
        assert!(summary.is_clean());
    }
}
