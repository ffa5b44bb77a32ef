use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Dialog timing constants — webhook budgets per the relay's turn contract
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const CONTEXT_TTL_MS: u64 = 5 * 60 * 1000; // follow-up memory window
pub const PROCESS_BUDGET_MS: u64 = 10_000; // router must answer within this
pub const REQUEST_BUDGET_MS: u64 = 12_000; // total /voice/process deadline
pub const MEDIA_TURN_BUDGET_MS: u64 = 15_000; // one media-stream turn
pub const REPROMPT_AFTER_SECS: u64 = 30; // idle nudge cadence
pub const MAX_REPROMPTS: u32 = 2; // then hang up
pub const MEDIA_LOG_SAMPLE: u64 = 100; // log 1 in N media frames

/// Top-level config (haven.toml + HAVEN_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HavenConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub cache: CachesConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Default for HavenConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            rate_limit: RateLimitConfig::default(),
            session: SessionConfig::default(),
            cache: CachesConfig::default(),
            search: SearchConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Externally reachable base URL — used to build <Play> audio URLs and
    /// Gather action URLs in outgoing TwiML.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            public_url: default_public_url(),
        }
    }
}

/// Fixed-window limiter at the HTTP edge, keyed by remote address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_rate_max")]
    pub max: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_rate_window_ms(),
            max: default_rate_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle longer than this are reaped.
    #[serde(default = "default_session_idle_ttl_ms")]
    pub idle_ttl_ms: u64,
    /// Dialog history keeps at most this many turns.
    #[serde(default = "default_history_max")]
    pub history_max: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl_ms: default_session_idle_ttl_ms(),
            history_max: default_history_max(),
        }
    }
}

/// TTL + size bounds for one cache instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_ms: u64,
    pub max: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachesConfig {
    #[serde(default = "default_response_cache")]
    pub response: CacheConfig,
    #[serde(default = "default_retrieval_cache")]
    pub retrieval: CacheConfig,
    #[serde(default = "default_classifier_cache")]
    pub classifier: CacheConfig,
    #[serde(default = "default_geocode_cache")]
    pub geocode: CacheConfig,
}

impl Default for CachesConfig {
    fn default() -> Self {
        Self {
            response: default_response_cache(),
            retrieval: default_retrieval_cache(),
            classifier: default_classifier_cache(),
            geocode: default_geocode_cache(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Search depth passed to the upstream ("basic" or "advanced").
    #[serde(default = "default_search_depth")]
    pub depth: String,
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout_ms")]
    pub timeout_ms: u64,
    /// Results scoring below this are never presented to a caller.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    /// At most this many results are spoken / texted per answer.
    #[serde(default = "default_max_presented")]
    pub max_presented: usize,
    #[serde(default)]
    pub include_domains: Vec<String>,
    #[serde(default = "default_exclude_domains")]
    pub exclude_domains: Vec<String>,
    /// Documents matching this are treated as generic city/guide pages.
    #[serde(default = "default_generic_page_pattern")]
    pub generic_page_pattern: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            depth: default_search_depth(),
            max_results: default_search_max_results(),
            timeout_ms: default_search_timeout_ms(),
            min_score: default_min_score(),
            max_presented: default_max_presented(),
            include_domains: Vec::new(),
            exclude_domains: default_exclude_domains(),
            generic_page_pattern: default_generic_page_pattern(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub openai: Option<OpenAiConfig>,
    pub tavily: Option<TavilyConfig>,
    pub twilio: Option<TwilioConfig>,
    #[serde(default)]
    pub nominatim: NominatimConfig,
}

/// OpenAI covers three capabilities: chat completion, speech synthesis,
/// and transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,
    #[serde(default = "default_chat_timeout_ms")]
    pub chat_timeout_ms: u64,
    #[serde(default = "default_speech_timeout_ms")]
    pub tts_timeout_ms: u64,
    #[serde(default = "default_speech_timeout_ms")]
    pub stt_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TavilyConfig {
    pub api_key: String,
    #[serde(default = "default_tavily_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// E.164 number SMS messages are sent from.
    pub from_number: String,
    #[serde(default = "default_twilio_base_url")]
    pub base_url: String,
    #[serde(default = "default_sms_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NominatimConfig {
    #[serde(default = "default_nominatim_base_url")]
    pub base_url: String,
    #[serde(default = "default_nominatim_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_geocode_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: default_nominatim_base_url(),
            user_agent: default_nominatim_user_agent(),
            timeout_ms: default_geocode_timeout_ms(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_public_url() -> String {
    format!("http://localhost:{}", DEFAULT_PORT)
}
fn default_rate_window_ms() -> u64 {
    15 * 60 * 1000
}
fn default_rate_max() -> u32 {
    100
}
fn default_session_idle_ttl_ms() -> u64 {
    30 * 60 * 1000
}
fn default_history_max() -> usize {
    20
}
fn default_response_cache() -> CacheConfig {
    CacheConfig {
        ttl_ms: 30 * 60 * 1000,
        max: 1000,
    }
}
fn default_retrieval_cache() -> CacheConfig {
    CacheConfig {
        ttl_ms: 30 * 60 * 1000,
        max: 1000,
    }
}
fn default_classifier_cache() -> CacheConfig {
    CacheConfig {
        ttl_ms: 60 * 60 * 1000,
        max: 1000,
    }
}
fn default_geocode_cache() -> CacheConfig {
    CacheConfig {
        ttl_ms: 24 * 60 * 60 * 1000,
        max: 1000,
    }
}
fn default_search_depth() -> String {
    "advanced".to_string()
}
fn default_search_max_results() -> usize {
    5
}
fn default_search_timeout_ms() -> u64 {
    6000
}
fn default_min_score() -> f64 {
    0.5
}
fn default_max_presented() -> usize {
    3
}
fn default_generic_page_pattern() -> String {
    r"\b(top|best)\s+\d+\b|guide to|city guide|travel guide|things to do|hotels?\b".to_string()
}
fn default_exclude_domains() -> Vec<String> {
    [
        "facebook.com",
        "instagram.com",
        "twitter.com",
        "x.com",
        "tiktok.com",
        "pinterest.com",
        "yelp.com",
        "tripadvisor.com",
        "booking.com",
        "expedia.com",
        "yellowpages.com",
        "mapquest.com",
        "wikipedia.org",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o".to_string()
}
fn default_tts_voice() -> String {
    "nova".to_string()
}
fn default_chat_timeout_ms() -> u64 {
    25_000
}
fn default_speech_timeout_ms() -> u64 {
    10_000
}
fn default_tavily_base_url() -> String {
    "https://api.tavily.com".to_string()
}
fn default_twilio_base_url() -> String {
    "https://api.twilio.com".to_string()
}
fn default_sms_timeout_ms() -> u64 {
    5000
}
fn default_nominatim_base_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}
fn default_nominatim_user_agent() -> String {
    "haven-relay/0.3 (crisis-support voice assistant)".to_string()
}
fn default_geocode_timeout_ms() -> u64 {
    3000
}

impl HavenConfig {
    /// Load config from a TOML file with HAVEN_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ./haven.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("haven.toml");

        let config: HavenConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("HAVEN_").split("_"))
            .extract()
            .map_err(|e| crate::error::HavenError::Config(e.to_string()))?;

        config.validate_credentials()?;
        Ok(config)
    }

    /// Credentials are checked once at startup; a configured provider with
    /// an empty key refuses to start rather than failing on the first call.
    pub fn validate_credentials(&self) -> crate::error::Result<()> {
        if let Some(openai) = &self.providers.openai {
            if openai.api_key.trim().is_empty() {
                return Err(crate::error::HavenError::AuthMisconfig(
                    "providers.openai.api_key is empty".to_string(),
                ));
            }
        }
        if let Some(tavily) = &self.providers.tavily {
            if tavily.api_key.trim().is_empty() {
                return Err(crate::error::HavenError::AuthMisconfig(
                    "providers.tavily.api_key is empty".to_string(),
                ));
            }
        }
        if let Some(twilio) = &self.providers.twilio {
            if twilio.account_sid.trim().is_empty() || twilio.auth_token.trim().is_empty() {
                return Err(crate::error::HavenError::AuthMisconfig(
                    "providers.twilio requires account_sid and auth_token".to_string(),
                ));
            }
        }
        Ok(())
    }
}
