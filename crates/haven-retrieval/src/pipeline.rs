//! The retrieval pipeline: cached search → filter → annotate → rank →
//! shape. One hard deadline covers the upstream call; a timeout surfaces
//! as `HavenError::Timeout` and the router decides what the caller hears.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use haven_cache::TtlCache;
use haven_clients::{SearchApi, SearchHit, SearchOptions};
use haven_core::config::SearchConfig;
use haven_core::types::{PresentableAnswer, RetrievalResult};
use haven_core::{HavenError, Result};

use crate::extract::ContactExtractor;
use crate::filter::ResultFilter;
use crate::shape;
use crate::titles::clean_title;

pub struct Retrieval {
    search: Arc<dyn SearchApi>,
    cache: Arc<TtlCache<PresentableAnswer>>,
    filter: ResultFilter,
    extractor: ContactExtractor,
    opts: SearchOptions,
    timeout: Duration,
    max_presented: usize,
}

impl Retrieval {
    pub fn new(
        search: Arc<dyn SearchApi>,
        cache: Arc<TtlCache<PresentableAnswer>>,
        cfg: &SearchConfig,
    ) -> Self {
        Self {
            search,
            cache,
            filter: ResultFilter::new(
                cfg.min_score,
                cfg.exclude_domains.clone(),
                &cfg.generic_page_pattern,
            ),
            extractor: ContactExtractor::new(),
            opts: SearchOptions {
                depth: cfg.depth.clone(),
                max_results: cfg.max_results,
                include_domains: cfg.include_domains.clone(),
                exclude_domains: cfg.exclude_domains.clone(),
                include_answer: true,
                include_raw_content: false,
            },
            timeout: Duration::from_millis(cfg.timeout_ms),
            max_presented: cfg.max_presented,
        }
    }

    /// Run the full pipeline for a rewritten query. `location` is the
    /// normalized location label, used in the cache key and voice line.
    pub async fn retrieve(
        &self,
        query: &str,
        location: Option<&str>,
    ) -> Result<PresentableAnswer> {
        let key = cache_key(query, location);
        if let Some(answer) = self.cache.get(&key) {
            debug!(key_chars = key.len(), "retrieval cache hit");
            return Ok(answer);
        }

        let response = tokio::time::timeout(self.timeout, self.search.search(query, &self.opts))
            .await
            .map_err(|_| HavenError::Timeout {
                ms: self.timeout.as_millis() as u64,
            })??;

        let raw_count = response.results.len();
        let kept = self.filter.filter(response.results);
        let mut results: Vec<RetrievalResult> =
            kept.into_iter().map(|hit| self.annotate(hit)).collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        results.truncate(self.max_presented);

        info!(
            raw = raw_count,
            presented = results.len(),
            location = location.unwrap_or("none"),
            "retrieval pass"
        );

        let answer = shape::shape(results, location);
        // empty answers are never cached
        if !answer.is_empty() {
            self.cache.put(key, answer.clone());
        }
        Ok(answer)
    }

    fn annotate(&self, hit: SearchHit) -> RetrievalResult {
        let phones = self.extractor.phones(&hit.content);
        let addresses = self.extractor.addresses(&hit.content);
        let has_contact_info = !phones.is_empty() || !addresses.is_empty();
        RetrievalResult {
            title: clean_title(&hit.title),
            url: hit.url,
            content: hit.content,
            score: hit.score,
            extracted_phones: phones,
            extracted_addresses: addresses,
            has_contact_info,
        }
    }
}

fn cache_key(query: &str, location: Option<&str>) -> String {
    format!("{}|{}", query.trim().to_lowercase(), location.unwrap_or("").to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use haven_clients::{ClientError, SearchResponse};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct FakeSearch {
        calls: AtomicUsize,
        hits: Vec<SearchHit>,
        delay: Duration,
    }

    impl FakeSearch {
        fn with_hits(hits: Vec<SearchHit>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                hits,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl SearchApi for FakeSearch {
        async fn search(
            &self,
            _query: &str,
            _opts: &SearchOptions,
        ) -> std::result::Result<SearchResponse, ClientError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(SearchResponse {
                answer: None,
                results: self.hits.clone(),
            })
        }
    }

    fn hit(title: &str, url: &str, score: f64) -> SearchHit {
        SearchHit {
            title: title.to_string(),
            url: url.to_string(),
            content: "domestic violence shelter intake, call 512-555-0123, \
                      at 100 Main St, Austin, TX 78701"
                .to_string(),
            score,
        }
    }

    fn retrieval(search: FakeSearch) -> (Retrieval, Arc<FakeSearch>) {
        let search = Arc::new(search);
        let cache = Arc::new(TtlCache::new("retrieval", Duration::from_secs(60), 100));
        let cfg = SearchConfig::default();
        (Retrieval::new(search.clone(), cache, &cfg), search)
    }

    #[tokio::test]
    async fn ranks_annotates_and_truncates() {
        let (r, _) = retrieval(FakeSearch::with_hits(vec![
            hit("B Shelter", "https://b.org", 0.7),
            hit("A Shelter", "https://a.org", 0.9),
            hit("D Shelter", "https://d.org", 0.3), // below floor
            hit("C Shelter", "https://c.org", 0.8),
            hit("E Shelter", "https://e.org", 0.6),
        ]));
        let answer = r.retrieve("q", Some("Austin, Texas")).await.unwrap();
        assert_eq!(answer.results.len(), 3);
        assert_eq!(answer.results[0].title, "A Shelter");
        assert_eq!(answer.results[1].title, "C Shelter");
        assert!(answer.results[0].has_contact_info);
        assert_eq!(answer.results[0].extracted_phones[0], "512-555-0123");
        assert!(answer.voice_response.starts_with("I found 3 shelters in Austin, Texas:"));
    }

    #[tokio::test]
    async fn presented_results_all_meet_score_floor() {
        let (r, _) = retrieval(FakeSearch::with_hits(vec![
            hit("A Shelter", "https://a.org", 0.51),
            hit("B Shelter", "https://b.org", 0.49),
        ]));
        let answer = r.retrieve("q", None).await.unwrap();
        assert!(answer.results.iter().all(|res| res.score >= 0.5));
        assert_eq!(answer.results.len(), 1);
    }

    #[tokio::test]
    async fn second_call_hits_cache() {
        let (r, search) = retrieval(FakeSearch::with_hits(vec![hit(
            "A Shelter",
            "https://a.org",
            0.9,
        )]));
        r.retrieve("q", Some("Austin")).await.unwrap();
        r.retrieve("q", Some("Austin")).await.unwrap();
        assert_eq!(search.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_answers_are_not_cached() {
        let (r, search) = retrieval(FakeSearch::with_hits(vec![]));
        let answer = r.retrieve("q", None).await.unwrap();
        assert!(answer.is_empty());
        assert_eq!(answer.voice_response, shape::EMPTY_VOICE_RESPONSE);
        r.retrieve("q", None).await.unwrap();
        assert_eq!(search.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn deadline_surfaces_as_timeout() {
        let search = Arc::new(FakeSearch {
            calls: AtomicUsize::new(0),
            hits: vec![],
            delay: Duration::from_millis(100),
        });
        let cache = Arc::new(TtlCache::new("retrieval", Duration::from_secs(60), 100));
        let mut cfg = SearchConfig::default();
        cfg.timeout_ms = 20;
        let r = Retrieval::new(search, cache, &cfg);
        let err = r.retrieve("q", None).await.unwrap_err();
        assert!(matches!(err, HavenError::Timeout { .. }));
    }
}
