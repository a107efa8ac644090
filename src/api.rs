//! Generative service client with optional bounded retry.
//!
//! # Architecture
//!
//! - [`AskAsync`]: core trait, one prompt in, one text completion out
//! - [`ChatClient`]: OpenAI-compatible `/chat/completions` client (xAI by
//!   default), with live web search switched on per prompt
//! - [`RetryAsk`]: decorator adding [`Backoff`] to any `AskAsync`
//!
//! # Retry Strategy
//!
//! Retries are off unless `max_retries > 0`. When on, only transient
//! failures (network, timeout, 429, 5xx) are retried, with
//! `min(base * 2^(attempt-1), 30s)` plus up to 250ms of jitter between
//! attempts.

use crate::error::{PipelineError, Result};
use crate::utils::truncate_for_log;
use rand::{rng, Rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// One harvest request: system and user instructions plus tool selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub web_search: bool,
}

/// Trait for async model interaction.
pub trait AskAsync {
    /// Send a prompt and receive the raw text completion.
    async fn ask(&self, prompt: &Prompt) -> Result<String>;
}

impl<T: AskAsync + ?Sized> AskAsync for &T {
    async fn ask(&self, prompt: &Prompt) -> Result<String> {
        (**self).ask(prompt).await
    }
}

/// Exponential backoff policy shared by the generative and publish calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to every wait.
    pub jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl Backoff {
    pub fn new(max_retries: usize, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(31) as u32;
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    let elapsed_ms_attempt = attempt_t0.elapsed().as_millis();
                    let elapsed_ms_total = total_t0.elapsed().as_millis();

                    if !e.is_transient() || attempt > self.max_retries {
                        if self.max_retries > 0 {
                            error!(
                                operation,
                                attempt,
                                max = self.max_retries,
                                elapsed_ms_attempt,
                                elapsed_ms_total,
                                error = %e,
                                "Giving up"
                            );
                        }
                        return Err(e);
                    }

                    let jitter_ms = self.jitter.as_millis() as u64;
                    let jitter = if jitter_ms == 0 {
                        Duration::ZERO
                    } else {
                        Duration::from_millis(rng().random_range(0..=jitter_ms))
                    };
                    let delay = self.delay_for(attempt) + jitter;

                    warn!(
                        operation,
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "Attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Wrapper that adds [`Backoff`] to any [`AskAsync`] implementation.
pub struct RetryAsk<T> {
    inner: T,
    backoff: Backoff,
}

impl<T: AskAsync> RetryAsk<T> {
    pub fn new(inner: T, backoff: Backoff) -> Self {
        Self { inner, backoff }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl<T: AskAsync> AskAsync for RetryAsk<T> {
    #[instrument(level = "info", skip_all)]
    async fn ask(&self, prompt: &Prompt) -> Result<String> {
        let inner = &self.inner;
        self.backoff
            .run("generative call", move || inner.ask(prompt))
            .await
    }
}

/// Model selection and sampling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct SearchParameters {
    mode: &'static str,
    return_citations: bool,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_parameters: Option<SearchParameters>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    settings: GenerationSettings,
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("api_base", &self.api_base)
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChatClient {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            settings,
        }
    }
}

impl AskAsync for ChatClient {
    #[instrument(level = "info", skip_all, fields(model = %self.settings.model, web_search = prompt.web_search))]
    async fn ask(&self, prompt: &Prompt) -> Result<String> {
        let t0 = Instant::now();
        let body = ChatCompletionRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            search_parameters: prompt.web_search.then_some(SearchParameters {
                mode: "auto",
                return_citations: true,
            }),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .timeout(self.settings.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::from_reqwest("generative call", self.settings.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %truncate_for_log(&text, 300), "Generative service rejected request");
            return Err(PipelineError::RemoteRejection {
                status: status.as_u16(),
                body: truncate_for_log(&text, 500),
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::from_reqwest("generative call", self.settings.timeout, e))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PipelineError::MalformedOutput {
                reason: "completion had no message content".to_string(),
                preview: String::new(),
            })?;

        info!(
            elapsed_ms = t0.elapsed().as_millis(),
            chars = content.chars().count(),
            "Received completion"
        );
        debug!(preview = %truncate_for_log(&content, 300), "Completion preview");
        Ok(content)
    }
}

/// Ask through a [`RetryAsk`] built from `backoff`.
#[instrument(level = "info", skip_all)]
pub async fn ask_with_backoff<T: AskAsync>(client: T, prompt: &Prompt, backoff: Backoff) -> Result<String> {
    let t0 = Instant::now();
    let api = RetryAsk::new(client, backoff);
    let res = api.ask(prompt).await;
    let elapsed_ms_total = t0.elapsed().as_millis();

    match &res {
        Ok(_) => info!(elapsed_ms_total, "ask_with_backoff succeeded"),
        Err(e) => error!(elapsed_ms_total, error = %e, "ask_with_backoff failed"),
    }
    res
}
