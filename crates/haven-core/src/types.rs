use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CONTEXT_TTL_MS;

/// Opaque call identifier assigned by the voice provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSid(pub String);

impl CallSid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallSid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CallSid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CallSid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Closed intent set the classifier maps utterances onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    FindShelter,
    LegalServices,
    CounselingServices,
    EmergencyHelp,
    GeneralInformation,
    OtherResources,
    EndConversation,
    OffTopic,
    ConfirmLocation,
    DeclineLocation,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::FindShelter => "find_shelter",
            Intent::LegalServices => "legal_services",
            Intent::CounselingServices => "counseling_services",
            Intent::EmergencyHelp => "emergency_help",
            Intent::GeneralInformation => "general_information",
            Intent::OtherResources => "other_resources",
            Intent::EndConversation => "end_conversation",
            Intent::OffTopic => "off_topic",
            Intent::ConfirmLocation => "confirm_location",
            Intent::DeclineLocation => "decline_location",
        }
    }

    /// Intents whose answers depend on where the caller is.
    pub fn is_location_seeking(&self) -> bool {
        matches!(
            self,
            Intent::FindShelter
                | Intent::LegalServices
                | Intent::CounselingServices
                | Intent::OtherResources
        )
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "find_shelter" => Ok(Intent::FindShelter),
            "legal_services" => Ok(Intent::LegalServices),
            "counseling_services" => Ok(Intent::CounselingServices),
            "emergency_help" => Ok(Intent::EmergencyHelp),
            "general_information" => Ok(Intent::GeneralInformation),
            "other_resources" => Ok(Intent::OtherResources),
            "end_conversation" => Ok(Intent::EndConversation),
            "off_topic" => Ok(Intent::OffTopic),
            "confirm_location" => Ok(Intent::ConfirmLocation),
            "decline_location" => Ok(Intent::DeclineLocation),
            other => Err(format!("unknown intent: {}", other)),
        }
    }
}

/// How the router treats a classifier confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
    NonFactual,
}

impl ConfidenceBand {
    pub fn from_score(confidence: f64) -> Self {
        if confidence >= 0.7 {
            ConfidenceBand::High
        } else if confidence >= 0.4 {
            ConfidenceBand::Medium
        } else if confidence >= 0.3 {
            ConfidenceBand::Low
        } else {
            ConfidenceBand::NonFactual
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One dialog turn, kept in the session's bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Caller's SMS summary consent — asked once, at the end of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmsConsent {
    #[default]
    Unknown,
    Granted,
    Denied,
}

/// Call lifecycle statuses delivered on POST /status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    Answered,
    Completed,
    Busy,
    Failed,
    NoAnswer,
}

impl CallStatus {
    /// Statuses after which no further webhooks arrive for the call.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed | CallStatus::Busy | CallStatus::Failed | CallStatus::NoAnswer
        )
    }
}

impl std::str::FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "initiated" => Ok(CallStatus::Initiated),
            "ringing" => Ok(CallStatus::Ringing),
            "answered" | "in-progress" => Ok(CallStatus::Answered),
            "completed" => Ok(CallStatus::Completed),
            "busy" => Ok(CallStatus::Busy),
            "failed" => Ok(CallStatus::Failed),
            "no-answer" => Ok(CallStatus::NoAnswer),
            other => Err(format!("unknown call status: {}", other)),
        }
    }
}

/// Resolution scope of a geocoded location, narrowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoScope {
    City,
    County,
    State,
    Country,
}

/// A resolved location from the geocode upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Normalized display string, e.g. "Austin, Texas".
    pub location: String,
    pub is_us: bool,
    pub scope: GeoScope,
}

/// One filtered, annotated search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub title: String,
    pub url: String,
    pub content: String,
    /// Upstream relevance score in [0, 1]; presented results score >= 0.5.
    pub score: f64,
    pub extracted_phones: Vec<String>,
    pub extracted_addresses: Vec<String>,
    pub has_contact_info: bool,
}

/// Structured web-facing summary of a retrieval pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSummary {
    pub count: usize,
    pub names: Vec<String>,
}

/// The triple of shaped outputs produced by one retrieval pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentableAnswer {
    pub voice_response: String,
    pub sms_response: String,
    pub web_response: WebSummary,
    pub results: Vec<RetrievalResult>,
}

impl PresentableAnswer {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Short-term follow-up memory, replaced atomically after each router turn.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub intent: Intent,
    /// The rewritten query that produced `results`.
    pub query: String,
    pub location: Option<String>,
    /// Up to 3 most recently presented results.
    pub results: Vec<RetrievalResult>,
    /// Cleaned title of the result most recently spoken about.
    pub focus_result_title: Option<String>,
    pub timestamp: Instant,
}

impl QueryContext {
    pub fn new(
        intent: Intent,
        query: impl Into<String>,
        location: Option<String>,
        results: Vec<RetrievalResult>,
    ) -> Self {
        let mut results = results;
        results.truncate(3);
        Self {
            intent,
            query: query.into(),
            location,
            results,
            focus_result_title: None,
            timestamp: Instant::now(),
        }
    }

    /// Expired contexts must be treated as absent everywhere.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.duration_since(self.timestamp) > Duration::from_millis(CONTEXT_TTL_MS)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Bump the expiry window after a successful follow-up turn.
    pub fn refresh(&mut self) {
        self.timestamp = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_bands_cut_at_documented_thresholds() {
        assert_eq!(ConfidenceBand::from_score(0.9), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_score(0.7), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_score(0.69), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_score(0.4), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_score(0.39), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_score(0.3), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_score(0.29), ConfidenceBand::NonFactual);
    }

    #[test]
    fn intent_round_trips_through_str() {
        for intent in [
            Intent::FindShelter,
            Intent::LegalServices,
            Intent::CounselingServices,
            Intent::EmergencyHelp,
            Intent::GeneralInformation,
            Intent::OtherResources,
            Intent::EndConversation,
            Intent::OffTopic,
            Intent::ConfirmLocation,
            Intent::DeclineLocation,
        ] {
            assert_eq!(intent.as_str().parse::<Intent>().unwrap(), intent);
        }
    }

    #[test]
    fn context_expires_after_five_minutes() {
        let ctx = QueryContext::new(Intent::FindShelter, "q", None, Vec::new());
        let now = ctx.timestamp;
        assert!(!ctx.is_expired_at(now + Duration::from_secs(4 * 60)));
        assert!(ctx.is_expired_at(now + Duration::from_secs(6 * 60)));
    }

    #[test]
    fn context_keeps_at_most_three_results() {
        let result = RetrievalResult {
            title: "t".into(),
            url: "u".into(),
            content: "c".into(),
            score: 0.8,
            extracted_phones: Vec::new(),
            extracted_addresses: Vec::new(),
            has_contact_info: false,
        };
        let ctx = QueryContext::new(
            Intent::FindShelter,
            "q",
            None,
            vec![result.clone(), result.clone(), result.clone(), result],
        );
        assert_eq!(ctx.results.len(), 3);
    }

    #[test]
    fn terminal_call_statuses() {
        assert!(CallStatus::Completed.is_terminal());
        assert!(CallStatus::Failed.is_terminal());
        assert!(!CallStatus::Answered.is_terminal());
        assert!(!CallStatus::Ringing.is_terminal());
    }
}
