//! End-of-call conversation summary. One LLM call over the bounded
//! history; failures are logged and swallowed — teardown never blocks on
//! this.

use std::sync::Arc;

use tracing::warn;

use haven_clients::{ChatApi, ChatRequest};
use haven_core::types::{Role, Turn};

const SUMMARY_PROMPT: &str = "Summarize this support-line call in 2-3 sentences for a case \
log: what the caller needed, what resources were provided, and any follow-up promised. \
Do not include names or phone numbers.";

pub async fn summarize_call(chat: &Arc<dyn ChatApi>, history: &[Turn]) -> Option<String> {
    if history.is_empty() {
        return None;
    }
    let transcript: String = history
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                Role::User => "Caller",
                Role::Assistant => "Assistant",
            };
            format!("{speaker}: {}\n", turn.text)
        })
        .collect();

    match chat
        .complete(&ChatRequest::new(SUMMARY_PROMPT, transcript).with_max_tokens(200))
        .await
    {
        Ok(resp) if !resp.text.trim().is_empty() => Some(resp.text.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            warn!(err = %e, "call summary failed");
            None
        }
    }
}
