//! Google News RSS search feed.
//!
//! The search feed is plain RSS 2.0; only `title`, `link` and `pubDate` of
//! each `<item>` are kept.

use crate::error::{PipelineError, Result};
use crate::models::Headline;
use crate::utils::truncate_for_log;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Delaware construction and development stories from the past week.
pub const DEFAULT_FEED_URL: &str = "https://news.google.com/rss/search?q=Delaware+construction+development+when:7d&hl=en-US&gl=US&ceid=US:en";

/// Most recent stories handed to the model.
pub const DEFAULT_LIMIT: usize = 15;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

/// Download the feed and return up to `limit` headlines.
#[instrument(level = "info", skip_all, fields(%feed_url))]
pub async fn fetch_headlines(
    http: &reqwest::Client,
    feed_url: &str,
    limit: usize,
    timeout: Duration,
) -> Result<Vec<Headline>> {
    let response = http
        .get(feed_url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| PipelineError::from_reqwest("news feed", timeout, e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| PipelineError::from_reqwest("news feed", timeout, e))?;
    if !status.is_success() {
        return Err(PipelineError::RemoteRejection {
            status: status.as_u16(),
            body: truncate_for_log(&body, 500),
        });
    }

    let headlines = parse_feed(&body, limit)?;
    info!(count = headlines.len(), "Fetched news headlines");
    debug!(titles = ?headlines.iter().map(|h| &h.title).collect::<Vec<_>>(), "Headlines");
    Ok(headlines)
}

/// Parse an RSS document, skipping items without a title or link.
pub fn parse_feed(xml: &str, limit: usize) -> Result<Vec<Headline>> {
    let rss: Rss = quick_xml::de::from_str(xml).map_err(|e| PipelineError::MalformedOutput {
        reason: format!("RSS feed: {e}"),
        preview: truncate_for_log(xml, 300),
    })?;

    Ok(rss
        .channel
        .items
        .into_iter()
        .filter_map(|item| {
            let title = item.title?.trim().to_string();
            let link = item.link?.trim().to_string();
            (!title.is_empty() && !link.is_empty()).then(|| Headline {
                title,
                link,
                published: item.pub_date.map(|d| d.trim().to_string()),
            })
        })
        .take(limit)
        .collect())
}
