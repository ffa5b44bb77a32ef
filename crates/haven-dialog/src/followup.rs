//! Follow-up engine: short-term memory over the last presented results.
//!
//! A follow-up is recognized only while the session's `QueryContext` is
//! unexpired and the utterance carries a cue (or the LLM path asserts one).
//! The focus target — ordinal, location, name, or demonstrative — is
//! fuzzy-matched against the stored results.

use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use haven_clients::{ChatApi, ChatRequest};
use haven_core::types::{QueryContext, RetrievalResult};
use haven_retrieval::shape;

use crate::lines;

/// Cue substrings that mark an utterance as referring back.
const CUES: [&str; 12] = [
    "more",
    "details",
    "information",
    "about",
    "first",
    "second",
    "third",
    "that",
    "this",
    "the one",
    "it",
    "them",
];

/// Short cue words that need whole-word matching ("it" in "Italy" is not
/// a cue).
const WORD_CUES: [&str; 5] = ["that", "this", "it", "them", "about"];

const FOLLOW_UP_PROMPT: &str = "You decide whether a caller's new utterance refers back to \
search results they were just read. Answer only yes or no.";

/// Minimum weighted similarity for a fuzzy focus match.
const MATCH_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpKind {
    SendDetails,
    LocationInfo,
    PhoneInfo,
    SpecificResult,
    DetailedInfo,
    GeneralFollowUp,
}

#[derive(Debug, Clone)]
pub struct FollowUpReply {
    pub kind: FollowUpKind,
    pub text: String,
    /// Present when the reply promises a text message.
    pub sms_body: Option<String>,
}

pub struct FollowUpEngine {
    chat: Option<Arc<dyn ChatApi>>,
    ordinal: Regex,
    capitalized: Regex,
}

impl FollowUpEngine {
    pub fn new(chat: Option<Arc<dyn ChatApi>>) -> Self {
        Self {
            chat,
            ordinal: Regex::new(r"\b(first|second|third|1st|2nd|3rd|number (one|two|three))\b")
                .expect("static pattern must compile"),
            capitalized: Regex::new(r"[A-Z][a-zA-Z']+(?:\s+[A-Z][a-zA-Z']+)*")
                .expect("static pattern must compile"),
        }
    }

    /// Whether `utterance` is a follow-up to `ctx`. The context must be
    /// checked for expiry by the caller; an expired context never reaches
    /// this point.
    pub async fn is_follow_up(&self, normalized: &str, ctx: &QueryContext) -> bool {
        if has_cue(normalized) {
            return true;
        }
        let Some(chat) = self.chat.as_ref() else {
            return false;
        };
        let user = format!(
            "Previous query: {}\nResults read to caller: {}\nNew utterance: {}",
            ctx.query,
            ctx.results
                .iter()
                .map(|r| r.title.as_str())
                .collect::<Vec<_>>()
                .join("; "),
            normalized,
        );
        match chat
            .complete(&ChatRequest::new(FOLLOW_UP_PROMPT, user).with_max_tokens(4))
            .await
        {
            Ok(resp) => resp.text.to_lowercase().contains("yes"),
            Err(e) => {
                debug!(err = %e, "follow-up llm check failed, treating as not a follow-up");
                false
            }
        }
    }

    /// Produce the typed reply for a recognized follow-up, refreshing the
    /// context window and focus on the way out.
    pub fn respond(&self, utterance: &str, ctx: &mut QueryContext) -> FollowUpReply {
        let normalized = utterance.trim().to_lowercase();
        let focus = self.find_focus(utterance, &normalized, ctx);
        let focus_title = focus.map(|r| r.title.clone());

        let reply = if wants_send(&normalized) {
            FollowUpReply {
                kind: FollowUpKind::SendDetails,
                text: lines::SEND_DETAILS_LINE.to_string(),
                sms_body: Some(shape::sms_response(&ctx.results)),
            }
        } else if wants_location(&normalized) {
            self.location_reply(focus, &ctx.results)
        } else if wants_phone(&normalized) {
            self.phone_reply(focus, &ctx.results)
        } else if let Some(result) = focus {
            FollowUpReply {
                kind: FollowUpKind::SpecificResult,
                text: lines::specific_result(&result.title, &capability_summary(&result.content)),
                sms_body: None,
            }
        } else if wants_detail(&normalized) {
            self.detailed_reply(&ctx.results)
        } else {
            self.general_reply(&ctx.results)
        };

        if let Some(title) = focus_title {
            ctx.focus_result_title = Some(title);
        }
        ctx.refresh();
        reply
    }

    /// Resolve the focus target: ordinal first, then location / name /
    /// capitalized phrase via weighted fuzzy match.
    fn find_focus<'a>(
        &self,
        utterance: &str,
        normalized: &str,
        ctx: &'a QueryContext,
    ) -> Option<&'a RetrievalResult> {
        if let Some(index) = self.ordinal_index(normalized) {
            return ctx.results.get(index);
        }

        let target = self
            .capitalized_phrase(utterance)
            .or_else(|| demonstrative_target(normalized, ctx))?;

        let (best, score) = ctx
            .results
            .iter()
            .map(|r| (r, weighted_similarity(&target, r)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        if score >= MATCH_THRESHOLD {
            debug!(target = %target, matched = %best.title, score, "focus matched");
            Some(best)
        } else {
            None
        }
    }

    fn ordinal_index(&self, normalized: &str) -> Option<usize> {
        let m = self.ordinal.find(normalized)?;
        let text = m.as_str();
        if text.contains("first") || text.contains("1st") || text.ends_with("one") {
            Some(0)
        } else if text.contains("second") || text.contains("2nd") || text.ends_with("two") {
            Some(1)
        } else if text.contains("third") || text.contains("3rd") || text.ends_with("three") {
            Some(2)
        } else {
            None
        }
    }

    /// The longest capitalized phrase that is not just the sentence start.
    fn capitalized_phrase(&self, utterance: &str) -> Option<String> {
        self.capitalized
            .find_iter(utterance)
            .filter(|m| m.start() > 0)
            .map(|m| m.as_str().to_string())
            .max_by_key(String::len)
    }

    fn location_reply(
        &self,
        focus: Option<&RetrievalResult>,
        results: &[RetrievalResult],
    ) -> FollowUpReply {
        let text = match focus {
            Some(result) => match result.extracted_addresses.first() {
                Some(address) => format!("{} is located at {}.", result.title, address),
                None => format!(
                    "I don't have a street address for {}, but their website is {}.",
                    result.title, result.url
                ),
            },
            None => aggregate_lines(results, |r| {
                r.extracted_addresses
                    .first()
                    .map(|a| format!("{} is at {}", r.title, a))
            }),
        };
        FollowUpReply {
            kind: FollowUpKind::LocationInfo,
            text,
            sms_body: None,
        }
    }

    fn phone_reply(
        &self,
        focus: Option<&RetrievalResult>,
        results: &[RetrievalResult],
    ) -> FollowUpReply {
        let text = match focus {
            Some(result) => match result.extracted_phones.first() {
                Some(phone) => format!("You can reach {} at {}.", result.title, phone),
                None => format!("I don't have a phone number for {}.", result.title),
            },
            None => aggregate_lines(results, |r| {
                r.extracted_phones
                    .first()
                    .map(|p| format!("{} at {}", r.title, p))
            }),
        };
        FollowUpReply {
            kind: FollowUpKind::PhoneInfo,
            text,
            sms_body: None,
        }
    }

    fn detailed_reply(&self, results: &[RetrievalResult]) -> FollowUpReply {
        let walk: Vec<String> = results
            .iter()
            .take(3)
            .map(|r| format!("{} offers {}", r.title, capability_summary(&r.content)))
            .collect();
        FollowUpReply {
            kind: FollowUpKind::DetailedInfo,
            text: format!(
                "Here's more about what I found. {}. Would you like me to send you the \
                 complete details?",
                walk.join(". ")
            ),
            sms_body: None,
        }
    }

    fn general_reply(&self, results: &[RetrievalResult]) -> FollowUpReply {
        let names: Vec<&str> = results.iter().map(|r| r.title.as_str()).collect();
        let listed = match names.as_slice() {
            [] => "I don't have any results on hand".to_string(),
            [one] => (*one).to_string(),
            [a, b] => format!("{a} and {b}"),
            [a, b, c, ..] => format!("{a}, {b}, and {c}"),
        };
        FollowUpReply {
            kind: FollowUpKind::GeneralFollowUp,
            text: format!("The shelters I found were {listed}. Would you like details on any of them?"),
            sms_body: None,
        }
    }
}

fn has_cue(normalized: &str) -> bool {
    let words: Vec<&str> = normalized
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    for cue in CUES {
        if WORD_CUES.contains(&cue) {
            if words.contains(&cue) {
                return true;
            }
        } else if normalized.contains(cue) {
            return true;
        }
    }
    false
}

fn wants_send(normalized: &str) -> bool {
    ["send", "text me", "text it", "text them", "email"]
        .iter()
        .any(|c| normalized.contains(c))
}

fn wants_location(normalized: &str) -> bool {
    ["address", "where", "located", "location"]
        .iter()
        .any(|c| normalized.contains(c))
}

fn wants_phone(normalized: &str) -> bool {
    ["phone", "number", "call them", "reach them"]
        .iter()
        .any(|c| normalized.contains(c))
}

fn wants_detail(normalized: &str) -> bool {
    ["details", "more information", "tell me more", "more about"]
        .iter()
        .any(|c| normalized.contains(c))
}

/// "that one" / "this place" with a single result means that result.
fn demonstrative_target(normalized: &str, ctx: &QueryContext) -> Option<String> {
    let phrase = ["that one", "this one", "the one", "that place"]
        .iter()
        .any(|c| normalized.contains(c));
    let pronoun = normalized
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|w| w == "it");
    if !phrase && !pronoun {
        return None;
    }
    // prefer the focused title, else a lone result's title
    ctx.focus_result_title
        .clone()
        .or_else(|| (ctx.results.len() == 1).then(|| ctx.results[0].title.clone()))
}

/// Similarity of two strings: 0.9 when either contains the other, else a
/// word-overlap ratio capped at 0.8.
fn similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.contains(&b) || b.contains(&a) {
        return 0.9;
    }
    let a_words: std::collections::HashSet<&str> =
        a.split_whitespace().filter(|w| w.len() > 2).collect();
    let b_words: std::collections::HashSet<&str> =
        b.split_whitespace().filter(|w| w.len() > 2).collect();
    if a_words.is_empty() || b_words.is_empty() {
        return 0.0;
    }
    let shared = a_words.intersection(&b_words).count() as f64;
    let ratio = shared / a_words.len().max(b_words.len()) as f64;
    ratio.min(0.8)
}

/// Weighted similarity across the result's fields.
fn weighted_similarity(target: &str, result: &RetrievalResult) -> f64 {
    0.6 * similarity(target, &result.title)
        + 0.3 * similarity(target, &result.content)
        + 0.1 * similarity(target, &result.url)
}

fn aggregate_lines(
    results: &[RetrievalResult],
    line: impl Fn(&RetrievalResult) -> Option<String>,
) -> String {
    let known: Vec<String> = results.iter().filter_map(line).collect();
    if known.is_empty() {
        "I don't have that on hand, but I can text you everything I found.".to_string()
    } else {
        format!("{}.", known.join(". "))
    }
}

/// One-phrase capability summary from keyword presence in content.
fn capability_summary(content: &str) -> String {
    let lower = content.to_lowercase();
    let mut capabilities: Vec<&str> = Vec::new();
    if lower.contains("24/7") || lower.contains("24 hour") || lower.contains("hotline") {
        capabilities.push("24/7 crisis support");
    }
    if lower.contains("shelter") || lower.contains("housing") || lower.contains("safe house") {
        capabilities.push("emergency shelter");
    }
    if lower.contains("counsel") || lower.contains("therap") || lower.contains("support group") {
        capabilities.push("counseling");
    }
    if lower.contains("legal") || lower.contains("attorney") || lower.contains("court") {
        capabilities.push("legal advocacy");
    }
    if lower.contains("child") || lower.contains("family") {
        capabilities.push("family services");
    }
    if capabilities.is_empty() {
        "support services for domestic violence survivors".to_string()
    } else {
        capabilities.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_core::types::Intent;

    fn result(title: &str, content: &str, phone: Option<&str>, addr: Option<&str>) -> RetrievalResult {
        RetrievalResult {
            title: title.to_string(),
            url: format!("https://{}.org", title.to_lowercase().replace(' ', "")),
            content: content.to_string(),
            score: 0.9,
            extracted_phones: phone.map(|p| vec![p.to_string()]).unwrap_or_default(),
            extracted_addresses: addr.map(|a| vec![a.to_string()]).unwrap_or_default(),
            has_contact_info: phone.is_some() || addr.is_some(),
        }
    }

    fn context() -> QueryContext {
        QueryContext::new(
            Intent::FindShelter,
            "domestic violence shelter near Austin, Texas",
            Some("Austin, Texas".to_string()),
            vec![
                result("Safe Haven", "24/7 hotline and emergency shelter", Some("512-555-0101"), Some("100 Main St")),
                result("Family Crisis Center", "counseling and legal advocacy for survivors", Some("512-555-0102"), None),
                result("Hope Shelter", "emergency shelter and housing", None, Some("200 Oak Ave")),
            ],
        )
    }

    #[test]
    fn cue_detection_uses_word_boundaries_for_short_cues() {
        assert!(has_cue("tell me more"));
        assert!(has_cue("what about the second one"));
        assert!(has_cue("can you text it to me"));
        assert!(!has_cue("i live in italy"));
        assert!(!has_cue("find a shelter in austin"));
    }

    #[test]
    fn ordinal_picks_the_second_result() {
        let engine = FollowUpEngine::new(None);
        let mut ctx = context();
        let reply = engine.respond("tell me more about the second one", &mut ctx);
        assert_eq!(reply.kind, FollowUpKind::SpecificResult);
        assert!(reply.text.starts_with("Here's what I found about Family Crisis Center:"));
        assert!(reply.text.contains("counseling, legal advocacy"));
        assert!(reply.text.ends_with("Would you like me to send you the complete details?"));
        assert_eq!(ctx.focus_result_title.as_deref(), Some("Family Crisis Center"));
    }

    #[test]
    fn named_target_fuzzy_matches() {
        let engine = FollowUpEngine::new(None);
        let mut ctx = context();
        let reply = engine.respond("what can you tell me about Safe Haven", &mut ctx);
        assert_eq!(reply.kind, FollowUpKind::SpecificResult);
        assert!(reply.text.contains("Safe Haven"));
    }

    #[test]
    fn phone_request_reads_the_number() {
        let engine = FollowUpEngine::new(None);
        let mut ctx = context();
        let reply = engine.respond("what's the phone number for the first one", &mut ctx);
        assert_eq!(reply.kind, FollowUpKind::PhoneInfo);
        assert_eq!(reply.text, "You can reach Safe Haven at 512-555-0101.");
    }

    #[test]
    fn address_request_without_focus_aggregates() {
        let engine = FollowUpEngine::new(None);
        let mut ctx = context();
        ctx.focus_result_title = None;
        let reply = engine.respond("where are they located", &mut ctx);
        assert_eq!(reply.kind, FollowUpKind::LocationInfo);
        assert!(reply.text.contains("Safe Haven is at 100 Main St"));
        assert!(reply.text.contains("Hope Shelter is at 200 Oak Ave"));
    }

    #[test]
    fn send_request_carries_sms_body() {
        let engine = FollowUpEngine::new(None);
        let mut ctx = context();
        let reply = engine.respond("can you send me the details", &mut ctx);
        assert_eq!(reply.kind, FollowUpKind::SendDetails);
        let sms = reply.sms_body.unwrap();
        assert!(sms.contains("1. Safe Haven"));
        assert!(sms.contains(haven_retrieval::SMS_TRAILER));
    }

    #[test]
    fn bare_follow_up_lists_titles() {
        let engine = FollowUpEngine::new(None);
        let mut ctx = context();
        let reply = engine.respond("what about them", &mut ctx);
        assert_eq!(reply.kind, FollowUpKind::GeneralFollowUp);
        assert!(reply.text.contains("Safe Haven, Family Crisis Center, and Hope Shelter"));
    }

    #[test]
    fn responding_refreshes_the_context_window() {
        let engine = FollowUpEngine::new(None);
        let mut ctx = context();
        ctx.timestamp = std::time::Instant::now() - std::time::Duration::from_secs(4 * 60);
        engine.respond("tell me more about the first one", &mut ctx);
        assert!(ctx.timestamp.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn similarity_substring_beats_overlap() {
        assert_eq!(similarity("safe haven", "Safe Haven Women's Shelter"), 0.9);
        let overlap = similarity("family crisis support", "crisis center for families");
        assert!(overlap > 0.0 && overlap <= 0.8);
    }

    #[tokio::test]
    async fn cue_makes_follow_up_without_llm() {
        let engine = FollowUpEngine::new(None);
        let ctx = context();
        assert!(engine.is_follow_up("tell me more about that", &ctx).await);
        assert!(!engine.is_follow_up("find legal help in dallas", &ctx).await);
    }
}
