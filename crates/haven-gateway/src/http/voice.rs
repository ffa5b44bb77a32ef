//! Voice webhook endpoints. Every handler answers with a provider XML
//! envelope — never a 5xx, which would drop the live call.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, response::Response, Form};
use serde::Deserialize;
use tracing::{info, warn};

use haven_core::config::REQUEST_BUDGET_MS;
use haven_core::types::CallSid;
use haven_dialog::{lines, EngineReply, ReplyAction};

use crate::app::AppState;
use crate::http::xml;
use crate::twiml::{self, GatherPrompt, VoiceResponse};

const PROCESS_ACTION: &str = "/voice/process";
const CONSENT_ACTION: &str = "/consent";
const CONSENT_PROMPT_ACTION: &str = "/consent/prompt";

/// Synthesis gets a slice of the endpoint budget; past it the envelope
/// degrades to `<Say>`.
const TTS_BUDGET: Duration = Duration::from_secs(4);

#[derive(Deserialize)]
pub struct VoiceForm {
    #[serde(rename = "CallSid")]
    call_sid: Option<String>,
    #[serde(rename = "From")]
    from: Option<String>,
}

#[derive(Deserialize)]
pub struct ProcessForm {
    #[serde(rename = "CallSid")]
    call_sid: Option<String>,
    #[serde(rename = "SpeechResult")]
    speech_result: Option<String>,
}

/// POST /voice — first webhook of a call: create the session and greet.
pub async fn voice_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<VoiceForm>,
) -> Response {
    let Some(call_sid) = form.call_sid.filter(|s| !s.is_empty()) else {
        warn!("POST /voice missing CallSid");
        return xml(twiml::regather(PROCESS_ACTION));
    };
    let sid = CallSid::from(call_sid);
    let reply = state
        .engine
        .handle_call_start(&sid, form.from.as_deref())
        .await;
    xml(reply_envelope(&state, reply).await)
}

/// POST /voice/process — one utterance in, one spoken reply out, under the
/// hard request budget.
pub async fn process_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<ProcessForm>,
) -> Response {
    let Some(call_sid) = form.call_sid.filter(|s| !s.is_empty()) else {
        warn!("POST /voice/process missing CallSid");
        return xml(twiml::regather(PROCESS_ACTION));
    };
    let sid = CallSid::from(call_sid);
    let speech = form.speech_result.unwrap_or_default();
    info!(call_sid = %sid, chars = speech.len(), "utterance webhook");

    let turn = async {
        let reply = state.engine.handle_utterance(&sid, &speech).await;
        reply_envelope(&state, reply).await
    };
    match tokio::time::timeout(Duration::from_millis(REQUEST_BUDGET_MS), turn).await {
        Ok(body) => xml(body),
        Err(_) => {
            warn!(call_sid = %sid, "request budget exhausted");
            xml(
                VoiceResponse::new()
                    .gather(PROCESS_ACTION, GatherPrompt::Say(lines::TIMEOUT_LINE))
                    .build(),
            )
        }
    }
}

/// POST /voice/interim — partial transcript; refresh activity, reply with
/// an empty envelope.
pub async fn interim_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<ProcessForm>,
) -> Response {
    if let Some(call_sid) = form.call_sid.filter(|s| !s.is_empty()) {
        state.engine.handle_interim(&CallSid::from(call_sid));
    }
    xml(twiml::empty())
}

/// POST /consent/prompt — the redirect target after the consent question
/// has been spoken: a bare speech gather feeding /consent.
pub async fn consent_prompt_handler() -> Response {
    xml(
        VoiceResponse::new()
            .gather(CONSENT_ACTION, GatherPrompt::None)
            .build(),
    )
}

/// POST /consent — yes/no to the SMS summary question, then hang up.
pub async fn consent_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<ProcessForm>,
) -> Response {
    let Some(call_sid) = form.call_sid.filter(|s| !s.is_empty()) else {
        warn!("POST /consent missing CallSid");
        return xml(twiml::regather(CONSENT_ACTION));
    };
    let sid = CallSid::from(call_sid);
    let speech = form.speech_result.unwrap_or_default();
    let reply = state.engine.handle_consent(&sid, &speech).await;
    xml(reply_envelope(&state, reply).await)
}

/// Turn an engine reply into TwiML, preferring synthesized audio and
/// degrading to `<Say>` when TTS is unavailable or over budget.
async fn reply_envelope(state: &Arc<AppState>, reply: EngineReply) -> String {
    if reply.text.is_empty() {
        return VoiceResponse::new().hangup().build();
    }

    let audio_url = match tokio::time::timeout(TTS_BUDGET, state.synthesize_url(&reply.text)).await
    {
        Ok(url) => url,
        Err(_) => {
            warn!("tts over budget, speaking with <Say>");
            None
        }
    };
    let prompt = match &audio_url {
        Some(url) => GatherPrompt::Play(url),
        None => GatherPrompt::Say(&reply.text),
    };

    match reply.action {
        ReplyAction::Gather => VoiceResponse::new().gather(PROCESS_ACTION, prompt).build(),
        // speak the consent question in full, then hand the call to the
        // consent gather via redirect
        ReplyAction::ConsentGather => speech_envelope(&audio_url, &reply.text)
            .redirect(CONSENT_PROMPT_ACTION)
            .build(),
        ReplyAction::Hangup => speech_envelope(&audio_url, &reply.text)
            .pause(1)
            .hangup()
            .build(),
    }
}

fn speech_envelope(audio_url: &Option<String>, text: &str) -> VoiceResponse {
    match audio_url {
        Some(url) => VoiceResponse::new().play(url),
        None => VoiceResponse::new().say(text),
    }
}
