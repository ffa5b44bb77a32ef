//! Central shared state and router assembly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    routing::{get, post},
    Router,
};
use tracing::warn;

use haven_cache::TtlCache;
use haven_clients::{
    ChatApi, ClientError, NominatimClient, OpenAiClient, SearchApi, SearchOptions, SearchResponse,
    ServiceStats, SmsApi, Speech, SpeechApi, TavilyClient, TranscribeApi, TwilioSms,
};
use haven_core::config::HavenConfig;
use haven_dialog::{Answer, DialogEngine, FollowUpEngine, Router as DialogRouter, SessionRegistry};
use haven_nlu::{Classification, Classifier, Rewriter};
use haven_core::types::{GeoLocation, PresentableAnswer};
use haven_retrieval::Retrieval;

use crate::rate_limit::RateLimiter;

/// TTS output is short-lived: long enough for the provider to fetch and
/// play it, no longer.
const AUDIO_TTL: Duration = Duration::from_secs(10 * 60);
const AUDIO_MAX_ENTRIES: usize = 200;

/// One synthesized reply, served at GET /audio/{id}.
#[derive(Clone)]
pub struct StoredAudio {
    pub bytes: bytes::Bytes,
    pub mime: &'static str,
}

/// Central shared state — passed as Arc<AppState> to all handlers.
pub struct AppState {
    pub config: HavenConfig,
    pub engine: DialogEngine,
    pub registry: Arc<SessionRegistry>,
    pub stats: Arc<ServiceStats>,
    pub limiter: RateLimiter,
    pub audio: Arc<TtlCache<StoredAudio>>,
    pub tts: Option<Arc<dyn SpeechApi>>,
    pub stt: Option<Arc<dyn TranscribeApi>>,
    pub tts_voice: String,
    // cache handles kept for /health and the background sweepers
    pub response_cache: Arc<TtlCache<Answer>>,
    pub retrieval_cache: Arc<TtlCache<PresentableAnswer>>,
    pub classifier_cache: Arc<TtlCache<Classification>>,
    pub geocode_cache: Arc<TtlCache<Option<GeoLocation>>>,
}

impl AppState {
    pub fn new(config: HavenConfig) -> Self {
        let stats = Arc::new(ServiceStats::new());

        let openai = config
            .providers
            .openai
            .as_ref()
            .map(|cfg| Arc::new(OpenAiClient::new(cfg, stats.clone())));
        let chat: Option<Arc<dyn ChatApi>> = openai.clone().map(|c| c as Arc<dyn ChatApi>);
        let tts: Option<Arc<dyn SpeechApi>> = openai.clone().map(|c| c as Arc<dyn SpeechApi>);
        let stt: Option<Arc<dyn TranscribeApi>> =
            openai.clone().map(|c| c as Arc<dyn TranscribeApi>);

        let search: Arc<dyn SearchApi> = match config.providers.tavily.as_ref() {
            Some(cfg) => Arc::new(TavilyClient::new(
                cfg,
                config.search.timeout_ms,
                stats.clone(),
            )),
            None => Arc::new(SearchUnconfigured),
        };

        let sms: Option<Arc<dyn SmsApi>> = config
            .providers
            .twilio
            .as_ref()
            .map(|cfg| Arc::new(TwilioSms::new(cfg, stats.clone())) as Arc<dyn SmsApi>);

        let geocode = Arc::new(NominatimClient::new(
            &config.providers.nominatim,
            stats.clone(),
        ));

        let response_cache = Arc::new(TtlCache::from_config("response", &config.cache.response));
        let retrieval_cache =
            Arc::new(TtlCache::from_config("retrieval", &config.cache.retrieval));
        let classifier_cache =
            Arc::new(TtlCache::from_config("classifier", &config.cache.classifier));
        let geocode_cache = Arc::new(TtlCache::from_config("geocode", &config.cache.geocode));
        let audio = Arc::new(TtlCache::new("audio", AUDIO_TTL, AUDIO_MAX_ENTRIES));

        let classifier = Classifier::new(classifier_cache.clone(), chat.clone());
        let rewriter = Rewriter::new(geocode, geocode_cache.clone());
        let retrieval = Retrieval::new(search, retrieval_cache.clone(), &config.search);
        let followup = FollowUpEngine::new(chat.clone());
        let dialog_router = Arc::new(DialogRouter::new(
            classifier,
            rewriter,
            retrieval,
            followup,
            chat.clone(),
            response_cache.clone(),
        ));

        let registry = Arc::new(SessionRegistry::from_config(&config.session));
        let engine = DialogEngine::new(registry.clone(), dialog_router, chat, sms);

        let tts_voice = config
            .providers
            .openai
            .as_ref()
            .map(|c| c.tts_voice.clone())
            .unwrap_or_else(|| "nova".to_string());

        Self {
            limiter: RateLimiter::from_config(&config.rate_limit),
            config,
            engine,
            registry,
            stats,
            audio,
            tts,
            stt,
            tts_voice,
            response_cache,
            retrieval_cache,
            classifier_cache,
            geocode_cache,
        }
    }

    /// Kick off every background task: cache sweepers, the session reaper,
    /// and the rate-limit window sweep.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        self.response_cache.spawn_sweeper();
        self.retrieval_cache.spawn_sweeper();
        self.classifier_cache.spawn_sweeper();
        self.geocode_cache.spawn_sweeper();
        self.audio.spawn_sweeper();
        self.registry.spawn_reaper();

        let state = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                match state.upgrade() {
                    Some(state) => state.limiter.sweep(),
                    None => break,
                }
            }
        });
    }

    /// Synthesize `text` and park it in the audio store, returning the
    /// public URL for a `<Play>`. `None` (no TTS, or TTS failed) means the
    /// caller falls back to `<Say>`.
    pub async fn synthesize_url(&self, text: &str) -> Option<String> {
        let tts = self.tts.as_ref()?;
        match tts.synthesize(text, &self.tts_voice).await {
            Ok(Speech { audio, mime }) => {
                let id = uuid::Uuid::new_v4().to_string();
                self.audio.put(id.clone(), StoredAudio { bytes: audio, mime });
                Some(format!("{}/audio/{}", self.config.gateway.public_url, id))
            }
            Err(e) => {
                warn!(err = %e, "tts failed, falling back to <Say>");
                None
            }
        }
    }
}

/// Stand-in search client for deployments without a search key. Every call
/// fails over to the LLM branch via the router's fallback path.
struct SearchUnconfigured;

#[async_trait]
impl SearchApi for SearchUnconfigured {
    async fn search(
        &self,
        _query: &str,
        _opts: &SearchOptions,
    ) -> Result<SearchResponse, ClientError> {
        Err(ClientError::Network {
            service: "tavily",
            message: "search upstream not configured".to_string(),
        })
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/voice", post(crate::http::voice::voice_handler))
        .route("/voice/process", post(crate::http::voice::process_handler))
        .route("/voice/interim", post(crate::http::voice::interim_handler))
        .route("/consent", post(crate::http::voice::consent_handler))
        .route(
            "/consent/prompt",
            post(crate::http::voice::consent_prompt_handler),
        )
        .route("/status", post(crate::http::status::status_handler))
        .route(
            "/recording",
            post(crate::http::recording::recording_handler),
        )
        .route("/sms", post(crate::http::sms::sms_handler))
        .route("/audio/{id}", get(crate::http::audio::audio_handler))
        .route("/health", get(crate::http::health::health_handler))
        .route("/twilio-stream", get(crate::ws::media::media_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::http::limit_middleware,
        ))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
