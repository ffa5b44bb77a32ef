//! Query rewriter: resolve a location, then expand the utterance with
//! intent-specific search terms. Deterministic for fixed inputs (the
//! geocode cache is the only shared state).

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use tracing::{debug, warn};

use haven_cache::TtlCache;
use haven_clients::{ClientError, GeocodeApi};
use haven_core::types::{GeoLocation, Intent};

/// Search-engine filters appended to US shelter queries.
const SHELTER_FILTERS: &str = "site:org OR site:gov -site:wikipedia.org -filetype:pdf";

#[derive(Debug, Clone, PartialEq)]
pub struct Rewritten {
    pub query: String,
    pub location: Option<GeoLocation>,
}

pub struct Rewriter {
    geocode: Arc<dyn GeocodeApi>,
    cache: Arc<TtlCache<Option<GeoLocation>>>,
    location_phrase: Regex,
}

impl Rewriter {
    pub fn new(geocode: Arc<dyn GeocodeApi>, cache: Arc<TtlCache<Option<GeoLocation>>>) -> Self {
        Self {
            geocode,
            cache,
            location_phrase: Regex::new(
                r"(?i)\b(?:in|near|around|at)\s+([a-zA-Z][a-zA-Z .,'-]{2,40})",
            )
            .expect("static pattern must compile"),
        }
    }

    /// Rewrite one utterance for search. `session_location` is the last
    /// location the caller searched, used when the utterance names none.
    pub async fn rewrite(
        &self,
        utterance: &str,
        intent: Intent,
        session_location: Option<&str>,
    ) -> Rewritten {
        let phrase = self
            .location_phrase(utterance)
            .or_else(|| session_location.map(str::to_string));

        let location = match &phrase {
            Some(text) => self.resolve(text).await,
            None => None,
        };

        let query = build_query(utterance, intent, phrase.as_deref(), location.as_ref());
        debug!(intent = %intent, query = %query, "rewrote utterance");
        Rewritten { query, location }
    }

    /// Geocode with a 24h cache. Network errors on this idempotent GET get
    /// one jittered retry; any remaining failure degrades to "no location".
    pub async fn resolve(&self, text: &str) -> Option<GeoLocation> {
        let key = text.trim().to_lowercase();
        let geocode = self.geocode.clone();
        let lookup = key.clone();
        let result = self
            .cache
            .get_or_compute(&key, move || async move {
                match geocode.resolve(&lookup).await {
                    Err(ClientError::Network { .. }) => {
                        let jitter_ms = rand::rng().random_range(50..250);
                        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                        Ok(geocode.resolve(&lookup).await?)
                    }
                    other => Ok(other?),
                }
            })
            .await;

        match result {
            Ok(location) => location,
            Err(e) => {
                warn!(err = %e, "geocode failed, continuing without location");
                None
            }
        }
    }

    /// Pull a "in/near <place>" phrase out of the utterance, stripped of
    /// trailing filler. The router uses this to decide whether a
    /// location-seeking utterance needs a confirmation prompt.
    pub fn location_phrase(&self, utterance: &str) -> Option<String> {
        let captures = self.location_phrase.captures(utterance)?;
        let raw = captures.get(1)?.as_str();
        let cleaned = strip_trailing_filler(raw);
        if cleaned.len() < 3 || cleaned.eq_ignore_ascii_case("me") {
            return None;
        }
        Some(cleaned)
    }
}

fn strip_trailing_filler(raw: &str) -> String {
    const FILLER: [&str; 6] = ["please", "today", "right now", "now", "thanks", "thank you"];
    let mut text = raw.trim().trim_end_matches(['.', ',', '?', '!']).to_string();
    loop {
        let lower = text.to_lowercase();
        let Some(filler) = FILLER.iter().find(|f| lower.ends_with(*f)) else {
            break;
        };
        text.truncate(text.len() - filler.len());
        text = text.trim().trim_end_matches(['.', ',', '?', '!']).to_string();
    }
    text
}

/// Assemble the search string. Location-seeking intents produce a canonical
/// query; informational intents keep the caller's words and append terms.
fn build_query(
    utterance: &str,
    intent: Intent,
    phrase: Option<&str>,
    location: Option<&GeoLocation>,
) -> String {
    let base = match intent {
        Intent::FindShelter => "domestic violence shelter",
        Intent::LegalServices => "domestic violence legal aid services",
        Intent::CounselingServices => "domestic violence counseling services",
        _ => "",
    };

    match intent {
        Intent::FindShelter | Intent::LegalServices | Intent::CounselingServices => {
            match location {
                Some(loc) if loc.is_us => {
                    if intent == Intent::FindShelter {
                        format!("{base} near {} {SHELTER_FILTERS}", loc.location)
                    } else {
                        format!("{base} near {}", loc.location)
                    }
                }
                // non-US: keep the caller's location text verbatim, no filters
                Some(_) => format!("{base} {}", phrase.unwrap_or_default()).trim().to_string(),
                None => format!("{base} {}", utterance.trim()),
            }
        }
        Intent::GeneralInformation => format!("{} information resources guide", utterance.trim()),
        Intent::OtherResources => match location {
            Some(loc) if loc.is_us => {
                format!("{} support resources assistance near {}", utterance.trim(), loc.location)
            }
            _ => format!("{} support resources assistance", utterance.trim()),
        },
        Intent::EmergencyHelp => format!("{} 24/7 hotline immediate assistance", utterance.trim()),
        _ => utterance.trim().to_string(),
    }
}
