//! Call status callback — terminal statuses tear the session down.

use std::sync::Arc;

use axum::{extract::State, Form};
use serde::Deserialize;
use tracing::{info, warn};

use haven_core::types::{CallSid, CallStatus};

use crate::app::AppState;

#[derive(Deserialize)]
pub struct StatusForm {
    #[serde(rename = "CallSid")]
    call_sid: Option<String>,
    #[serde(rename = "CallStatus")]
    call_status: Option<String>,
}

/// POST /status — plain 200 text; the provider retries anything else.
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<StatusForm>,
) -> &'static str {
    let (Some(call_sid), Some(raw_status)) = (form.call_sid, form.call_status) else {
        warn!("POST /status missing CallSid or CallStatus");
        return "ok";
    };
    let sid = CallSid::from(call_sid);

    match raw_status.parse::<CallStatus>() {
        Ok(status) => {
            info!(call_sid = %sid, status = %raw_status, "status callback");
            state.engine.handle_status(&sid, status).await;
        }
        Err(_) => warn!(call_sid = %sid, status = %raw_status, "unknown call status"),
    }
    "ok"
}
