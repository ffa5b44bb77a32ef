//! Result filtering: score floor, domain blocklist, generic-page pattern,
//! and the shelter/DV keyword requirement.

use regex::Regex;
use tracing::trace;

use haven_clients::SearchHit;

/// A hit survives only if at least one of these appears in its title, url,
/// or content. Fixed set — this is what makes a result on-mission.
const SHELTER_KEYWORDS: [&str; 12] = [
    "shelter",
    "domestic violence",
    "safe house",
    "safehouse",
    "refuge",
    "crisis",
    "abuse",
    "victim",
    "survivor",
    "hotline",
    "advocacy",
    "protective order",
];

pub struct ResultFilter {
    min_score: f64,
    exclude_domains: Vec<String>,
    generic_page: Regex,
}

impl ResultFilter {
    pub fn new(min_score: f64, exclude_domains: Vec<String>, generic_pattern: &str) -> Self {
        Self {
            min_score,
            exclude_domains,
            generic_page: Regex::new(generic_pattern).expect("generic page pattern must compile"),
        }
    }

    /// Apply all four drop rules, preserving input order.
    pub fn filter(&self, hits: Vec<SearchHit>) -> Vec<SearchHit> {
        hits.into_iter()
            .filter(|hit| self.keep(hit))
            .collect()
    }

    fn keep(&self, hit: &SearchHit) -> bool {
        if hit.score < self.min_score {
            trace!(url = %hit.url, score = hit.score, "dropped: below score floor");
            return false;
        }
        if self.is_blocked_domain(&hit.url) {
            trace!(url = %hit.url, "dropped: blocklisted domain");
            return false;
        }
        let haystack = format!("{} {} {}", hit.title, hit.url, hit.content).to_lowercase();
        if self.generic_page.is_match(&haystack) {
            trace!(url = %hit.url, "dropped: generic guide page");
            return false;
        }
        if !SHELTER_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
            trace!(url = %hit.url, "dropped: no shelter keyword");
            return false;
        }
        true
    }

    fn is_blocked_domain(&self, url: &str) -> bool {
        let host = host_of(url);
        self.exclude_domains
            .iter()
            .any(|blocked| host == *blocked || host.ends_with(&format!(".{blocked}")))
    }
}

/// Host portion of a URL, lowercased, without scheme, port, or path.
pub fn host_of(url: &str) -> String {
    let after_scheme = url.split("://").nth(1).unwrap_or(url);
    let host = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(after_scheme);
    let host = host.split('@').next_back().unwrap_or(host);
    let host = host.split(':').next().unwrap_or(host);
    host.trim_start_matches("www.").to_lowercase()
}
