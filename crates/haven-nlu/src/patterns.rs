//! The classifier's weighted pattern table.
//!
//! Ten categories, each mapped to one intent. Utterances are normalized to
//! lowercase before matching, so every pattern here is written lowercase.
//! Weights are per-pattern; a category's score is the sum of its matched
//! patterns, and the utterance's raw score is the sum across categories.

use regex::Regex;

use haven_core::types::Intent;

pub struct WeightedPattern {
    pub regex: Regex,
    pub weight: u32,
    pub label: &'static str,
}

pub struct PatternCategory {
    pub name: &'static str,
    pub intent: Intent,
    pub patterns: Vec<WeightedPattern>,
}

fn pattern(label: &'static str, weight: u32, re: &str) -> WeightedPattern {
    WeightedPattern {
        regex: Regex::new(re).expect("static pattern must compile"),
        weight,
        label,
    }
}

/// Build the full category table. Compiled once per classifier instance.
pub fn build_categories() -> Vec<PatternCategory> {
    vec![
        PatternCategory {
            name: "emergency",
            intent: Intent::EmergencyHelp,
            patterns: vec![
                pattern("911", 12, r"\b911\b"),
                pattern("weapon", 12, r"\b(gun|knife|weapon)s?\b"),
                pattern("emergency", 10, r"\bemergenc(y|ies)\b"),
                pattern("danger", 10, r"\bdanger(ous)?\b"),
                pattern("hurting-me", 8, r"\bhurt(ing|s)? me\b"),
                pattern("afraid-for-life", 10, r"\b(scared|afraid) for my life\b"),
                pattern("right-now", 6, r"\b(right now|immediately)\b"),
            ],
        },
        PatternCategory {
            name: "shelter",
            intent: Intent::FindShelter,
            patterns: vec![
                pattern("shelter", 10, r"\bshelters?\b"),
                pattern("safe-house", 10, r"\bsafe ?house\b"),
                pattern("seeking-shelter", 8, r"\b(find|need|looking for)\b.{0,24}\bshelter"),
                pattern("place-to-stay", 8, r"\bplace to stay\b"),
                pattern("somewhere-to-go", 8, r"\bsomewhere (safe )?to go\b"),
                pattern("refuge", 8, r"\brefuge\b"),
                pattern("housing", 6, r"\bhousing\b"),
            ],
        },
        PatternCategory {
            name: "legal",
            intent: Intent::LegalServices,
            patterns: vec![
                pattern("restraining-order", 10, r"\brestraining order\b"),
                pattern("protective-order", 10, r"\bprotectiv?e order\b"),
                pattern("lawyer", 10, r"\b(lawyer|attorney)s?\b"),
                pattern("legal-help", 10, r"\blegal (aid|help|advice|services?)\b"),
                pattern("custody", 8, r"\bcustody\b"),
                pattern("divorce", 8, r"\bdivorce\b"),
                pattern("court", 6, r"\bcourt\b"),
            ],
        },
        PatternCategory {
            name: "counseling",
            intent: Intent::CounselingServices,
            patterns: vec![
                pattern("counseling", 10, r"\bcounsel(ing|or)s?\b"),
                pattern("therapy", 10, r"\btherap(y|ist)s?\b"),
                pattern("support-group", 10, r"\bsupport groups?\b"),
                pattern("someone-to-talk-to", 8, r"\bsomeone to talk to\b"),
                pattern("mental-health", 8, r"\bmental health\b"),
            ],
        },
        PatternCategory {
            name: "location",
            intent: Intent::FindShelter,
            patterns: vec![
                pattern("near-me", 6, r"\bnear me\b"),
                pattern("in-place", 4, r"\b(in|near|around) [a-z]+"),
                pattern("zip", 6, r"\b\d{5}\b"),
                pattern("area-word", 4, r"\b(city|town|area|county|neighborhood)\b"),
            ],
        },
        PatternCategory {
            name: "contact",
            intent: Intent::GeneralInformation,
            patterns: vec![
                pattern("phone-number", 8, r"\bphone number\b"),
                pattern("phone", 6, r"\bphone\b"),
                pattern("address", 6, r"\baddress\b"),
                pattern("contact", 6, r"\bcontact\b"),
                pattern("number", 4, r"\bnumber\b"),
            ],
        },
        PatternCategory {
            name: "information",
            intent: Intent::GeneralInformation,
            patterns: vec![
                pattern("what-is", 6, r"\bwhat (is|are)\b"),
                pattern("how-to", 6, r"\bhow (do|can|does|to)\b"),
                pattern("tell-me-about", 6, r"\btell me about\b"),
                pattern("information", 6, r"\binformation\b"),
                pattern("explain", 4, r"\bexplain\b"),
            ],
        },
        PatternCategory {
            name: "resource",
            intent: Intent::OtherResources,
            patterns: vec![
                pattern("resources", 8, r"\bresources?\b"),
                pattern("hotline", 8, r"\bhotlines?\b"),
                pattern("help", 6, r"\bhelp\b"),
                pattern("services", 6, r"\bservices?\b"),
                pattern("assistance", 6, r"\bassistance\b"),
                pattern("support", 5, r"\bsupport\b"),
            ],
        },
        PatternCategory {
            name: "end",
            intent: Intent::EndConversation,
            patterns: END_PATTERNS
                .iter()
                .map(|&(label, weight, re)| pattern(label, weight, re))
                .collect(),
        },
        PatternCategory {
            name: "general",
            intent: Intent::GeneralInformation,
            patterns: vec![
                pattern("greeting", 2, r"\b(hello|hi|hey)\b"),
                pattern("thanks", 2, r"\bthank(s| you)\b"),
            ],
        },
    ]
}

/// End-of-conversation patterns, shared by the classifier's `end` category
/// and the router's fast-path check in `is_end_phrase`.
const END_PATTERNS: [(&str, u32, &str); 6] = [
    ("goodbye", 12, r"\b(good)?bye\b"),
    ("hang-up", 10, r"\bhang up\b"),
    ("thats-all", 10, r"\bthat('s| is) (all|everything)\b"),
    ("im-done", 10, r"\b(i'?m|i am) (done|finished|good)\b"),
    ("gotta-go", 8, r"\b(gotta|have to|got to) go\b"),
    ("nothing-else", 8, r"\bnothing else\b"),
];

/// An end utterance is at most this many words. Longer sentences that
/// merely mention hanging up or having nothing left stay in the dialog.
const MAX_END_UTTERANCE_WORDS: usize = 5;

/// Negations that veto the end fast path ("i can't hang up").
const NEGATIONS: [&str; 6] = ["not", "can't", "cannot", "don't", "won't", "never"];

/// Split into words, keeping apostrophes so "don't" and "that's" survive
/// as single tokens.
fn word_list(normalized: &str) -> Vec<&str> {
    normalized
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .collect()
}

/// Whether `phrase` appears as consecutive whole words.
fn contains_phrase(words: &[&str], phrase: &str) -> bool {
    let target: Vec<&str> = phrase.split_whitespace().collect();
    words.windows(target.len()).any(|w| w == target.as_slice())
}

/// Words that make an utterance ambiguous enough to ask the LLM.
pub fn has_deictic_cue(normalized: &str) -> bool {
    const CUES: [&str; 5] = ["that", "this", "one", "it", "them"];
    normalized
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| CUES.contains(&word))
}

/// Explicit goodbye check the router runs before classification.
///
/// True only when the utterance essentially IS an end phrase: the end
/// patterns match on word boundaries, the whole utterance is a few words,
/// and nothing in it is negated. "okay goodbye" ends the call; "i can't
/// hang up the phone, he'll hear me" must not.
pub fn is_end_phrase(normalized: &str) -> bool {
    use std::sync::OnceLock;
    static COMPILED: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = COMPILED.get_or_init(|| {
        END_PATTERNS
            .iter()
            .map(|&(_, _, re)| Regex::new(re).expect("static pattern must compile"))
            .collect()
    });

    let words = word_list(normalized);
    if words.is_empty() || words.len() > MAX_END_UTTERANCE_WORDS {
        return false;
    }
    if words.iter().any(|w| NEGATIONS.contains(w)) {
        return false;
    }
    patterns.iter().any(|re| re.is_match(normalized))
}

/// Parse a yes/no reply by whole words and phrases. Returns `None` when
/// the utterance is neither, so "search now" or "actually look in Boston"
/// fall through as fresh utterances instead of reading as yes or no.
/// Declines are checked first; when a caller hedges, not sending wins.
pub fn parse_affirmation(normalized: &str) -> Option<bool> {
    const NO_WORDS: [&str; 4] = ["no", "nope", "nah", "don't"];
    const NO_PHRASES: [&str; 4] = ["do not", "rather not", "not sure", "not really"];
    const YES_WORDS: [&str; 6] = ["yes", "yeah", "yep", "sure", "okay", "ok"];
    const YES_PHRASES: [&str; 2] = ["please do", "that works"];

    let words = word_list(normalized);
    if NO_WORDS.iter().any(|w| words.contains(w))
        || NO_PHRASES.iter().any(|p| contains_phrase(&words, p))
    {
        return Some(false);
    }
    if YES_WORDS.iter().any(|w| words.contains(w))
        || YES_PHRASES.iter().any(|p| contains_phrase(&words, p))
    {
        return Some(true);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_patterns_compile_and_cover_every_category() {
        let categories = build_categories();
        let names: Vec<&str> = categories.iter().map(|c| c.name).collect();
        for required in [
            "location",
            "information",
            "resource",
            "shelter",
            "contact",
            "general",
        ] {
            assert!(names.contains(&required), "missing category {required}");
        }
    }

    #[test]
    fn deictic_cues_detected_as_whole_words() {
        assert!(has_deictic_cue("tell me more about that"));
        assert!(has_deictic_cue("the second one"));
        assert!(!has_deictic_cue("i need italian translation"));
        assert!(!has_deictic_cue("shelter in austin"));
    }

    #[test]
    fn affirmation_parsing() {
        assert_eq!(parse_affirmation("yes please"), Some(true));
        assert_eq!(parse_affirmation("yeah sure"), Some(true));
        assert_eq!(parse_affirmation("okay"), Some(true));
        assert_eq!(parse_affirmation("please do"), Some(true));
        assert_eq!(parse_affirmation("no thank you"), Some(false));
        assert_eq!(parse_affirmation("nope"), Some(false));
        assert_eq!(parse_affirmation("i'd rather not"), Some(false));
        assert_eq!(parse_affirmation("what do you mean"), None);
    }

    #[test]
    fn affirmation_matches_whole_words_only() {
        // "now" is not "no", "look" is not "ok": neither is an answer
        assert_eq!(parse_affirmation("search now"), None);
        assert_eq!(parse_affirmation("actually look in boston"), None);
        assert_eq!(parse_affirmation("i need a booking"), None);
        // hedged answers read as a decline
        assert_eq!(parse_affirmation("not sure"), Some(false));
    }

    #[test]
    fn end_phrases() {
        assert!(is_end_phrase("okay goodbye"));
        assert!(is_end_phrase("that's all i needed"));
        assert!(is_end_phrase("nothing else"));
        assert!(!is_end_phrase("find me a shelter"));
    }

    #[test]
    fn end_phrase_inside_a_longer_sentence_does_not_end_the_call() {
        assert!(!is_end_phrase("i can't hang up the phone, he'll hear me"));
        assert!(!is_end_phrase("there's nothing else he hasn't taken"));
        assert!(!is_end_phrase("i can't hang up"));
    }
}
