//! OpenAI adapter — chat completion, speech synthesis, transcription.
//!
//! One struct serves all three capabilities; the relay's dialog engine only
//! ever sees the `ChatApi` / `SpeechApi` / `TranscribeApi` traits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::{ChatApi, ChatRequest, ChatResponse, Speech, SpeechApi, TranscribeApi};
use crate::error::{ClientError, Result};
use crate::stats::ServiceStats;
use haven_core::config::OpenAiConfig;

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    chat_timeout_ms: u64,
    tts_timeout_ms: u64,
    stt_timeout_ms: u64,
    stats: Arc<ServiceStats>,
}

impl OpenAiClient {
    pub fn new(cfg: &OpenAiConfig, stats: Arc<ServiceStats>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: cfg.api_key.clone(),
            base_url: cfg.base_url.clone(),
            chat_model: cfg.chat_model.clone(),
            chat_timeout_ms: cfg.chat_timeout_ms,
            tts_timeout_ms: cfg.tts_timeout_ms,
            stt_timeout_ms: cfg.stt_timeout_ms,
            stats,
        }
    }

    fn request_id() -> String {
        uuid::Uuid::new_v4().to_string()[..8].to_string()
    }
}

#[async_trait]
impl ChatApi for OpenAiClient {
    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let req_id = Self::request_id();
        let model = req.model.as_deref().unwrap_or(&self.chat_model);
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut messages = vec![serde_json::json!({ "role": "system", "content": req.system })];
        for turn in &req.history {
            let role = match turn.role {
                crate::api::ChatRole::User => "user",
                crate::api::ChatRole::Assistant => "assistant",
            };
            messages.push(serde_json::json!({ "role": role, "content": turn.content }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": req.user }));

        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": req.max_tokens,
            "temperature": 0.7,
        });

        debug!(req_id, model, "chat completion request");
        let started = Instant::now();

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_millis(self.chat_timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                self.stats.record("openai.chat", started, false);
                ClientError::from_reqwest("openai", self.chat_timeout_ms, e)
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = retry_after_ms(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            warn!(req_id, status, "chat completion failed");
            self.stats.record("openai.chat", started, false);
            return Err(ClientError::from_status("openai", status, retry_after, text));
        }

        let api_resp: ChatApiResponse = resp.json().await.map_err(|e| {
            self.stats.record("openai.chat", started, false);
            ClientError::Parse {
                service: "openai",
                message: e.without_url().to_string(),
            }
        })?;
        self.stats.record("openai.chat", started, true);

        let text = api_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(req_id, chars = text.len(), "chat completion ok");

        Ok(ChatResponse {
            text,
            tokens_in: api_resp.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
            tokens_out: api_resp
                .usage
                .as_ref()
                .map(|u| u.completion_tokens)
                .unwrap_or(0),
        })
    }
}

#[async_trait]
impl SpeechApi for OpenAiClient {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Speech> {
        let req_id = Self::request_id();
        let url = format!("{}/v1/audio/speech", self.base_url);
        let body = serde_json::json!({
            "model": "tts-1",
            "input": text,
            "voice": voice,
        });

        debug!(req_id, voice, chars = text.len(), "tts request");
        let started = Instant::now();

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_millis(self.tts_timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                self.stats.record("openai.tts", started, false);
                ClientError::from_reqwest("openai", self.tts_timeout_ms, e)
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = retry_after_ms(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            warn!(req_id, status, "tts failed");
            self.stats.record("openai.tts", started, false);
            return Err(ClientError::from_status("openai", status, retry_after, text));
        }

        let audio = resp.bytes().await.map_err(|e| {
            self.stats.record("openai.tts", started, false);
            ClientError::from_reqwest("openai", self.tts_timeout_ms, e)
        })?;
        self.stats.record("openai.tts", started, true);
        debug!(req_id, bytes = audio.len(), "tts ok");

        Ok(Speech {
            audio,
            mime: "audio/mpeg",
        })
    }
}

#[async_trait]
impl TranscribeApi for OpenAiClient {
    async fn transcribe(&self, audio: &[u8], sample_rate: u32, language: &str) -> Result<String> {
        let req_id = Self::request_id();
        let url = format!("{}/v1/audio/transcriptions", self.base_url);

        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| ClientError::Parse {
                service: "openai",
                message: e.to_string(),
            })?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", "whisper-1")
            .text("language", language.to_string())
            .text("response_format", "json");

        debug!(req_id, bytes = audio.len(), sample_rate, "stt request");
        let started = Instant::now();

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_millis(self.stt_timeout_ms))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                self.stats.record("openai.stt", started, false);
                ClientError::from_reqwest("openai", self.stt_timeout_ms, e)
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = retry_after_ms(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            warn!(req_id, status, "stt failed");
            self.stats.record("openai.stt", started, false);
            return Err(ClientError::from_status("openai", status, retry_after, text));
        }

        let parsed: TranscriptionResponse = resp.json().await.map_err(|e| {
            self.stats.record("openai.stt", started, false);
            ClientError::Parse {
                service: "openai",
                message: e.without_url().to_string(),
            }
        })?;
        self.stats.record("openai.stt", started, true);
        debug!(req_id, chars = parsed.text.len(), "stt ok");

        Ok(parsed.text)
    }
}

/// Parse a Retry-After header (seconds) into milliseconds.
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|secs| secs * 1000)
}

// OpenAI API response mirrors

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}
