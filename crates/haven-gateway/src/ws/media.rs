//! Per-call media-stream worker.
//!
//! The provider opens one websocket per call at /twilio-stream and sends
//! JSON text frames: `start`, `media` (base64 audio, inbound or outbound
//! track), `mark`, `stop`. The worker accumulates inbound audio, runs
//! transcription on `stop`, feeds the transcript through the same dialog
//! engine as the webhooks, and ships a play instruction back over the
//! socket once TTS has the reply ready.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use base64::Engine as _;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use haven_core::config::{MEDIA_LOG_SAMPLE, MEDIA_TURN_BUDGET_MS};
use haven_core::types::CallSid;
use haven_dialog::ReplyAction;

use crate::app::AppState;

const INBOUND_TRACK: &str = "inbound_track";
/// Telephony audio arrives at 8 kHz.
const MEDIA_SAMPLE_RATE: u32 = 8000;

/// Axum handler — upgrades HTTP to WebSocket at GET /twilio-stream.
pub async fn media_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_stream(socket, state))
}

#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum StreamEvent {
    Start {
        start: StartFrame,
    },
    Media {
        media: MediaFrame,
    },
    Mark {
        #[serde(default)]
        mark: Option<serde_json::Value>,
    },
    Stop {
        #[serde(default)]
        stop: Option<serde_json::Value>,
    },
}

#[derive(Deserialize)]
struct StartFrame {
    #[serde(rename = "callSid")]
    call_sid: String,
    #[serde(rename = "streamSid", default)]
    stream_sid: Option<String>,
}

#[derive(Deserialize)]
struct MediaFrame {
    #[serde(default)]
    track: String,
    #[serde(default)]
    chunk: Option<String>,
    #[serde(rename = "timestamp", default)]
    ts: Option<String>,
    payload: String,
}

/// Per-connection task — owns the audio buffer for the call's lifetime.
async fn handle_stream(socket: WebSocket, state: Arc<AppState>) {
    let (mut tx, mut rx) = socket.split();

    let mut call_sid: Option<CallSid> = None;
    // replaced with the session's token once `start` names the call
    let mut cancel = CancellationToken::new();
    let mut buffer: Vec<u8> = Vec::new();
    let mut frame_count: u64 = 0;

    let mut idle_tick = tokio::time::interval(Duration::from_secs(5));
    idle_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let event: StreamEvent = match serde_json::from_str(&text) {
                            Ok(event) => event,
                            Err(e) => {
                                debug!(err = %e, "malformed media frame, ignoring");
                                continue;
                            }
                        };
                        match event {
                            StreamEvent::Start { start } => {
                                let sid = CallSid::from(start.call_sid);
                                info!(
                                    call_sid = %sid,
                                    stream_sid = start.stream_sid.as_deref().unwrap_or("-"),
                                    "media stream started"
                                );
                                let session = state.registry.get_or_create(&sid, None);
                                cancel = session.cancel.clone();
                                call_sid = Some(sid);
                            }
                            StreamEvent::Media { media } => {
                                if media.track != INBOUND_TRACK {
                                    continue; // other tracks are dropped silently
                                }
                                frame_count += 1;
                                match base64::engine::general_purpose::STANDARD
                                    .decode(media.payload.as_bytes())
                                {
                                    Ok(bytes) => buffer.extend_from_slice(&bytes),
                                    Err(e) => debug!(err = %e, "undecodable media payload"),
                                }
                                if frame_count % MEDIA_LOG_SAMPLE == 0 {
                                    debug!(
                                        frames = frame_count,
                                        buffered = buffer.len(),
                                        chunk = media.chunk.as_deref().unwrap_or("-"),
                                        ts = media.ts.as_deref().unwrap_or("-"),
                                        "media accumulating"
                                    );
                                }
                            }
                            StreamEvent::Mark { mark } => {
                                debug!(mark = ?mark, "mark received");
                            }
                            StreamEvent::Stop { .. } => {
                                let audio = std::mem::take(&mut buffer);
                                frame_count = 0;
                                if let Some(sid) = &call_sid {
                                    run_turn(&state, sid, audio, &cancel, &mut tx).await;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!("binary frame on media socket, closing");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(err = %e, "media socket error");
                        break;
                    }
                    _ => {}
                }
            }

            // silence nudges while we wait on the caller
            _ = idle_tick.tick() => {
                if let Some(sid) = &call_sid {
                    if let Some(nudge) = state.engine.idle_nudge(sid) {
                        send_reply(&state, &mut tx, &nudge.text, nudge.action).await;
                        if nudge.action == ReplyAction::Hangup {
                            break;
                        }
                    }
                }
            }

            // call ended elsewhere — abort in-flight work and drop the buffer
            _ = cancel.cancelled() => {
                info!(call_sid = ?call_sid, "media worker cancelled");
                break;
            }
        }
    }

    if let Some(sid) = call_sid {
        debug!(call_sid = %sid, "media stream closed");
    }
}

/// One media-side dialog turn: transcribe, route, reply. Bounded by the
/// media turn budget and the session's cancellation token; either aborts
/// the in-flight upstream work.
async fn run_turn(
    state: &Arc<AppState>,
    sid: &CallSid,
    audio: Vec<u8>,
    cancel: &CancellationToken,
    tx: &mut SplitSink<WebSocket, Message>,
) {
    if audio.is_empty() {
        return;
    }
    let Some(stt) = state.stt.as_ref() else {
        warn!(call_sid = %sid, "no transcription upstream configured, dropping audio");
        return;
    };

    let wav = match crate::ws::audio::mulaw_to_wav(&audio, MEDIA_SAMPLE_RATE) {
        Ok(wav) => wav,
        Err(e) => {
            warn!(call_sid = %sid, err = %e, "audio conversion failed");
            return;
        }
    };

    let turn = async {
        let transcript = match stt.transcribe(&wav, MEDIA_SAMPLE_RATE, "en").await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                debug!(call_sid = %sid, "empty transcript");
                return None;
            }
            Err(e) => {
                warn!(call_sid = %sid, err = %e, "transcription failed");
                return None;
            }
        };
        info!(call_sid = %sid, chars = transcript.len(), "transcript ready");
        Some(state.engine.handle_utterance(sid, &transcript).await)
    };

    let reply = tokio::select! {
        _ = cancel.cancelled() => {
            debug!(call_sid = %sid, "turn aborted by call end");
            return;
        }
        result = tokio::time::timeout(Duration::from_millis(MEDIA_TURN_BUDGET_MS), turn) => {
            match result {
                Ok(Some(reply)) => reply,
                Ok(None) => return,
                Err(_) => {
                    warn!(call_sid = %sid, budget_ms = MEDIA_TURN_BUDGET_MS, "media turn over budget");
                    return;
                }
            }
        }
    };

    send_reply(state, tx, &reply.text, reply.action).await;
}

/// Ship a "speak this" instruction back over the socket: an audio URL when
/// TTS succeeded, plain text otherwise.
async fn send_reply(
    state: &Arc<AppState>,
    tx: &mut SplitSink<WebSocket, Message>,
    text: &str,
    action: ReplyAction,
) {
    if text.is_empty() {
        return;
    }
    let instruction = match state.synthesize_url(text).await {
        Some(url) => serde_json::json!({ "event": "play", "media": { "url": url } }),
        None => serde_json::json!({ "event": "say", "text": text }),
    };
    let payload = instruction.to_string();
    if tx.send(Message::Text(payload.into())).await.is_err() {
        debug!("media socket gone before reply could be sent");
        return;
    }
    if action == ReplyAction::Hangup {
        let _ = tx
            .send(Message::Text(
                serde_json::json!({ "event": "hangup" }).to_string().into(),
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_frame_parses() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"event":"start","start":{"callSid":"CA1","streamSid":"MZ1"}}"#,
        )
        .unwrap();
        match event {
            StreamEvent::Start { start } => {
                assert_eq!(start.call_sid, "CA1");
                assert_eq!(start.stream_sid.as_deref(), Some("MZ1"));
            }
            _ => panic!("expected start event"),
        }
    }

    #[test]
    fn media_frame_parses_with_track_and_payload() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"event":"media","media":{"track":"inbound_track","chunk":"3","timestamp":"120","payload":"AAAA"}}"#,
        )
        .unwrap();
        match event {
            StreamEvent::Media { media } => {
                assert_eq!(media.track, "inbound_track");
                assert_eq!(media.chunk.as_deref(), Some("3"));
                assert!(base64::engine::general_purpose::STANDARD
                    .decode(media.payload.as_bytes())
                    .is_ok());
            }
            _ => panic!("expected media event"),
        }
    }

    #[test]
    fn stop_frame_parses_without_body() {
        let event: StreamEvent = serde_json::from_str(r#"{"event":"stop"}"#).unwrap();
        assert!(matches!(event, StreamEvent::Stop { .. }));
    }

    #[test]
    fn mark_frame_parses() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"event":"mark","mark":{"name":"reply-1"}}"#).unwrap();
        assert!(matches!(event, StreamEvent::Mark { .. }));
    }
}
