//! Inbound SMS webhook — the text channel runs the same router as voice.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, response::Response, Form};
use serde::Deserialize;
use tracing::{info, warn};

use haven_dialog::lines;

use crate::app::AppState;
use crate::http::xml;
use crate::twiml;

const SMS_BUDGET: Duration = Duration::from_secs(3);

#[derive(Deserialize)]
pub struct SmsForm {
    #[serde(rename = "From")]
    from: Option<String>,
    #[serde(rename = "Body")]
    body: Option<String>,
}

/// POST /sms — provider messaging envelope in reply.
pub async fn sms_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SmsForm>,
) -> Response {
    let (Some(from), Some(body)) = (form.from, form.body.filter(|b| !b.trim().is_empty()))
    else {
        warn!("POST /sms missing From or Body");
        return xml(twiml::message_response(
            "Sorry, I couldn't read that message. Please try again.",
        ));
    };

    info!(body_chars = body.len(), "inbound sms");
    let reply = match tokio::time::timeout(SMS_BUDGET, state.engine.handle_sms(&from, &body)).await
    {
        Ok(reply) => reply,
        Err(_) => {
            warn!("sms turn over budget");
            lines::TIMEOUT_LINE.to_string()
        }
    };
    xml(twiml::message_response(&reply))
}
