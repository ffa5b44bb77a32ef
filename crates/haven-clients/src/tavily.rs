//! Tavily search adapter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::{SearchApi, SearchHit, SearchOptions, SearchResponse};
use crate::error::{ClientError, Result};
use crate::openai::retry_after_ms;
use crate::stats::ServiceStats;
use haven_core::config::TavilyConfig;

pub struct TavilyClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout_ms: u64,
    stats: Arc<ServiceStats>,
}

impl TavilyClient {
    pub fn new(cfg: &TavilyConfig, timeout_ms: u64, stats: Arc<ServiceStats>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: cfg.api_key.clone(),
            base_url: cfg.base_url.clone(),
            timeout_ms,
            stats,
        }
    }
}

#[async_trait]
impl SearchApi for TavilyClient {
    async fn search(&self, query: &str, opts: &SearchOptions) -> Result<SearchResponse> {
        let req_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let url = format!("{}/search", self.base_url);
        let body = serde_json::json!({
            "query": query,
            "search_depth": opts.depth,
            "max_results": opts.max_results,
            "include_domains": opts.include_domains,
            "exclude_domains": opts.exclude_domains,
            "include_answer": opts.include_answer,
            "include_raw_content": opts.include_raw_content,
        });

        debug!(req_id, query_chars = query.len(), depth = %opts.depth, "search request");
        let started = Instant::now();

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_millis(self.timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                self.stats.record("tavily", started, false);
                ClientError::from_reqwest("tavily", self.timeout_ms, e)
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = retry_after_ms(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            warn!(req_id, status, "search failed");
            self.stats.record("tavily", started, false);
            return Err(ClientError::from_status("tavily", status, retry_after, text));
        }

        let parsed: TavilyResponse = resp.json().await.map_err(|e| {
            self.stats.record("tavily", started, false);
            ClientError::Parse {
                service: "tavily",
                message: e.without_url().to_string(),
            }
        })?;
        self.stats.record("tavily", started, true);
        debug!(req_id, results = parsed.results.len(), "search ok");

        Ok(SearchResponse {
            answer: parsed.answer.filter(|a| !a.trim().is_empty()),
            results: parsed.results,
        })
    }
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchHit>,
}
