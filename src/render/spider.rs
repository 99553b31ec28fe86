use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use regex::Regex;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::warn;

use super::Fetcher;
use crate::parser::RawDocument;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static BLANKS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Renders through spider.cloud and returns the page as markdown.
pub struct SpiderFetcher {
    spider: Spider,
}

impl SpiderFetcher {
    pub fn new(api_key: &str) -> Result<Self> {
        let spider = Spider::new(Some(api_key.to_string()))
            .map_err(|e| anyhow!("Failed to create Spider client: {}", e))?;
        Ok(Self { spider })
    }

    async fn scrape_once(&self, url: &str) -> Result<Option<RawDocument>> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Markdown)),
            ..Default::default()
        };

        let value = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| anyhow!("Spider scrape failed: {}", e))?;

        let parsed: serde_json::Value = match value.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(value.clone()),
            None => value,
        };
        let first = parsed.as_array().and_then(|arr| arr.first());

        let status = first.and_then(|obj| obj.get("status")).and_then(|s| s.as_i64());
        match status {
            Some(404) | Some(410) => return Ok(None),
            Some(s) if s >= 400 => bail!("Spider returned status {}", s),
            _ => {}
        }

        let content = first
            .and_then(|obj| obj.get("content"))
            .and_then(|c| c.as_str())
            .map(strip_images)
            .ok_or_else(|| anyhow!("No content in spider response"))?;

        Ok(Some(RawDocument::markdown(url, content)))
    }
}

#[async_trait]
impl Fetcher for SpiderFetcher {
    /// Rate limits and 5xx are retried with exponential backoff.
    async fn fetch(&self, url: &str) -> Result<Option<RawDocument>> {
        let mut attempt = 0;
        loop {
            match self.scrape_once(url).await {
                Ok(doc) => return Ok(doc),
                Err(e) if attempt < MAX_RETRIES && is_retryable(&e.to_string()) => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        "Rate limited on {} (attempt {}/{}), backing off {:.1}s",
                        url,
                        attempt + 1,
                        MAX_RETRIES,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_retryable(error: &str) -> bool {
    error.contains("429")
        || error.contains("rate")
        || error.contains("500")
        || error.contains("502")
        || error.contains("503")
}

/// Remove markdown image syntax: ![alt](url)
fn strip_images(md: &str) -> String {
    let cleaned = IMAGE_RE.replace_all(md, "");
    BLANKS_RE.replace_all(&cleaned, "\n\n").to_string()
}
