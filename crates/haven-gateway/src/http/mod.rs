pub mod audio;
pub mod health;
pub mod recording;
pub mod sms;
pub mod status;
pub mod voice;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::app::AppState;

/// Fixed-window limiter at the edge. Exhausted windows get a 429 with a
/// Retry-After hint; webhook traffic from the provider sits far below the
/// default 100 requests per 15 minutes per address.
pub async fn limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    match state.limiter.check(addr.ip()) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after.as_secs().to_string())],
            Json(json!({"error": "rate limit exceeded"})),
        )
            .into_response(),
    }
}

/// Wrap a TwiML body in the provider's expected content type.
pub fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}
