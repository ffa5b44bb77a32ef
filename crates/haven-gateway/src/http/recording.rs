//! Recording callback. Nothing is stored; the URL is logged with its query
//! string removed (recording URLs can carry signed tokens).

use axum::Form;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Deserialize)]
pub struct RecordingForm {
    #[serde(rename = "RecordingSid")]
    recording_sid: Option<String>,
    #[serde(rename = "RecordingUrl")]
    recording_url: Option<String>,
    #[serde(rename = "CallSid")]
    call_sid: Option<String>,
}

/// POST /recording — 200 text.
pub async fn recording_handler(Form(form): Form<RecordingForm>) -> &'static str {
    let (Some(recording_sid), Some(url), Some(call_sid)) =
        (form.recording_sid, form.recording_url, form.call_sid)
    else {
        warn!("POST /recording missing required fields");
        return "ok";
    };

    if !url.starts_with("http://") && !url.starts_with("https://") {
        warn!(call_sid = %call_sid, "recording url is not http(s), ignoring");
        return "ok";
    }

    let redacted = url.split('?').next().unwrap_or(&url);
    info!(
        call_sid = %call_sid,
        recording_sid = %recording_sid,
        url = %redacted,
        "recording available"
    );
    "ok"
}
