//! Synthesized-audio serving for `<Play>` URLs.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::app::AppState;

/// GET /audio/{id} — bytes from the audio store, 404 once expired.
pub async fn audio_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.audio.get(&id) {
        Some(stored) => (
            [(header::CONTENT_TYPE, stored.mime)],
            stored.bytes.clone(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
