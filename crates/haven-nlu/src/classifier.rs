//! Intent classifier: weighted patterns first, LLM assist for ambiguous
//! utterances, results cached.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::patterns::{build_categories, has_deictic_cue, PatternCategory};
use haven_cache::TtlCache;
use haven_clients::{ChatApi, ChatRequest};
use haven_core::types::Intent;

/// Raw score divisor: confidence = min(score / 20, 1.0).
const SCORE_SCALE: f64 = 20.0;
/// Below this the pattern result is considered ambiguous.
const AMBIGUOUS_BELOW: f64 = 0.3;

const CLASSIFY_PROMPT: &str = "You classify one caller utterance from a domestic-violence \
support line into exactly one intent. Reply with only the intent name, nothing else. \
Intents: find_shelter, legal_services, counseling_services, emergency_help, \
general_information, other_resources, end_conversation, off_topic.";

/// Classifier output. `matches` lists the labels of every matched pattern,
/// for logging and tests.
#[derive(Debug, Clone)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f64,
    pub matches: Vec<&'static str>,
}

pub struct Classifier {
    categories: Vec<PatternCategory>,
    cache: Arc<TtlCache<Classification>>,
    /// LLM assist for ambiguous utterances. Absent in minimal deployments
    /// and most tests; the pattern result stands alone then.
    chat: Option<Arc<dyn ChatApi>>,
}

impl Classifier {
    pub fn new(cache: Arc<TtlCache<Classification>>, chat: Option<Arc<dyn ChatApi>>) -> Self {
        Self {
            categories: build_categories(),
            cache,
            chat,
        }
    }

    /// Classify an utterance. Infallible: the pattern table always produces
    /// a result and LLM failures fall back to it.
    pub async fn classify(&self, utterance: &str) -> Classification {
        let normalized = normalize(utterance);
        if let Some(cached) = self.cache.get(&normalized) {
            return cached;
        }

        let mut result = self.score(&normalized);

        if result.confidence < AMBIGUOUS_BELOW || has_deictic_cue(&normalized) {
            if let Some(llm_intent) = self.ask_llm(&normalized).await {
                debug!(
                    pattern_intent = %result.intent,
                    llm_intent = %llm_intent,
                    "ambiguous utterance, llm override"
                );
                result.intent = llm_intent;
            }
        }

        self.cache.put(normalized, result.clone());
        result
    }

    /// Pure pattern pass over the category table.
    fn score(&self, normalized: &str) -> Classification {
        let mut matches: Vec<&'static str> = Vec::new();
        let mut total: u32 = 0;
        // per-category (total score, largest single matched weight)
        let mut best: Option<(&PatternCategory, u32, u32)> = None;

        for category in &self.categories {
            let mut category_score: u32 = 0;
            let mut category_max: u32 = 0;
            for pattern in &category.patterns {
                if pattern.regex.is_match(normalized) {
                    category_score += pattern.weight;
                    category_max = category_max.max(pattern.weight);
                    matches.push(pattern.label);
                }
            }
            if category_score == 0 {
                continue;
            }
            total += category_score;
            let replace = match best {
                None => true,
                Some((_, best_score, best_max)) => {
                    // dominance tie breaks toward the largest single weight
                    category_score > best_score
                        || (category_score == best_score && category_max > best_max)
                }
            };
            if replace {
                best = Some((category, category_score, category_max));
            }
        }

        let confidence = (total as f64 / SCORE_SCALE).min(1.0);
        let intent = best
            .map(|(category, _, _)| category.intent)
            .unwrap_or(Intent::GeneralInformation);

        Classification {
            intent,
            confidence,
            matches,
        }
    }

    /// One fixed-prompt LLM call; anything outside the enum keeps the
    /// pattern result.
    async fn ask_llm(&self, normalized: &str) -> Option<Intent> {
        let chat = self.chat.as_ref()?;
        let req = ChatRequest::new(CLASSIFY_PROMPT, normalized).with_max_tokens(8);
        match chat.complete(&req).await {
            Ok(resp) => match Intent::from_str(resp.text.trim().to_lowercase().as_str()) {
                Ok(intent) => Some(intent),
                Err(_) => {
                    debug!(raw = %resp.text.trim(), "llm returned non-enum intent, keeping pattern result");
                    None
                }
            },
            Err(e) => {
                warn!(err = %e, "llm classification failed, keeping pattern result");
                None
            }
        }
    }
}

pub fn normalize(utterance: &str) -> String {
    utterance.trim().to_lowercase()
}
