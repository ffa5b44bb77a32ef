use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use haven_core::types::GeoLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// One prior turn carried along for conversational context.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Request to the chat completion upstream.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    /// Earlier turns, oldest first. The current utterance goes in `user`.
    pub history: Vec<ChatTurn>,
    pub user: String,
    pub model: Option<String>,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            history: Vec::new(),
            user: user.into(),
            model: None,
            max_tokens: 300,
        }
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// Synthesized speech: raw bytes plus the MIME type to serve them under.
#[derive(Debug, Clone)]
pub struct Speech {
    pub audio: bytes::Bytes,
    pub mime: &'static str,
}

/// Options forwarded to the search upstream.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOptions {
    pub depth: String,
    pub max_results: usize,
    pub include_domains: Vec<String>,
    pub exclude_domains: Vec<String>,
    pub include_answer: bool,
    pub include_raw_content: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            depth: "advanced".to_string(),
            max_results: 5,
            include_domains: Vec::new(),
            exclude_domains: Vec::new(),
            include_answer: true,
            include_raw_content: false,
        }
    }
}

/// One raw search hit, before any filtering.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub answer: Option<String>,
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmsReceipt {
    pub id: String,
    pub status: String,
}

/// Chat completion capability.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse>;
}

/// Text-to-speech capability.
#[async_trait]
pub trait SpeechApi: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Speech>;
}

/// Speech-to-text capability.
#[async_trait]
pub trait TranscribeApi: Send + Sync {
    async fn transcribe(&self, audio: &[u8], sample_rate: u32, language: &str) -> Result<String>;
}

/// Web search capability.
#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn search(&self, query: &str, opts: &SearchOptions) -> Result<SearchResponse>;
}

/// Outbound SMS capability.
#[async_trait]
pub trait SmsApi: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<SmsReceipt>;
}

/// Forward geocoding capability. `Ok(None)` means the text did not resolve.
#[async_trait]
pub trait GeocodeApi: Send + Sync {
    async fn resolve(&self, text: &str) -> Result<Option<GeoLocation>>;
}
