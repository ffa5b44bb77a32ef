//! Response router: per-utterance decision between follow-up, canned
//! lines, retrieval, and the LLM — with every failure degrading toward an
//! answer the caller can still hear.

use std::sync::Arc;

use tracing::{debug, info, warn};

use haven_cache::TtlCache;
use haven_clients::{ChatApi, ChatRequest, ChatRole, ChatTurn};
use haven_core::types::{ConfidenceBand, Intent, QueryContext, Role};
use haven_nlu::{normalize, parse_affirmation, Classifier, Rewriter};
use haven_retrieval::Retrieval;

use crate::followup::FollowUpEngine;
use crate::lines;
use crate::registry::SessionHandle;
use crate::session::{PendingConfirm, SessionState};

const ASSISTANT_SYSTEM: &str = "You are a calm, supportive phone assistant for a domestic \
violence support line. Answer in 2-3 short, speakable sentences. Be practical and warm. \
Never give medical or legal advice — point to professional resources instead. If the \
caller may be in danger, remind them they can call 911.";

/// Where an answer came from, recorded for logging and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSource {
    Retrieval,
    LlmWithContext,
    LlmOnly,
    FollowUp,
    Canned,
}

/// What the dialog engine should do after speaking the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    Gather,
    Consent,
    Hangup,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// SMS body to send on consent, when this turn produced one.
    pub sms_body: Option<String>,
    pub source: AnswerSource,
    pub fallback: bool,
    pub next: NextAction,
}

impl Answer {
    fn canned(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sms_body: None,
            source: AnswerSource::Canned,
            fallback: false,
            next: NextAction::Gather,
        }
    }
}

pub struct Router {
    classifier: Classifier,
    rewriter: Rewriter,
    retrieval: Retrieval,
    followup: FollowUpEngine,
    chat: Option<Arc<dyn ChatApi>>,
    response_cache: Arc<TtlCache<Answer>>,
}

impl Router {
    pub fn new(
        classifier: Classifier,
        rewriter: Rewriter,
        retrieval: Retrieval,
        followup: FollowUpEngine,
        chat: Option<Arc<dyn ChatApi>>,
        response_cache: Arc<TtlCache<Answer>>,
    ) -> Self {
        Self {
            classifier,
            rewriter,
            retrieval,
            followup,
            chat,
            response_cache,
        }
    }

    /// Route one utterance. Infallible: every branch failure falls back to
    /// the LLM, and the LLM's failure to a canned line.
    pub async fn route(&self, utterance: &str, session: &Arc<SessionHandle>) -> Answer {
        let normalized = normalize(utterance);

        // explicit goodbye mid-dialog moves the call toward the consent
        // question (the engine has already marked this turn Processing)
        if haven_nlu::is_end_phrase(&normalized)
            && matches!(
                session.state(),
                SessionState::AwaitingUtterance | SessionState::Processing
            )
        {
            return Answer {
                text: lines::CONSENT_PROMPT.to_string(),
                sms_body: None,
                source: AnswerSource::Canned,
                fallback: false,
                next: NextAction::Consent,
            };
        }

        // a pending "search Austin again?" question intercepts yes/no
        if let Some(pending) = session.with(|s| s.pending_confirm.take()) {
            match parse_affirmation(&normalized) {
                Some(true) => {
                    debug!(location = %pending.location, "location confirmed, re-searching");
                    return self
                        .answer_with_retrieval(
                            &pending.utterance,
                            pending.intent,
                            ConfidenceBand::High,
                            Some(pending.location.as_str()),
                            session,
                        )
                        .await;
                }
                Some(false) => return Answer::canned(lines::LOCATION_CLARIFY),
                None => {} // not a yes/no — treat as a fresh utterance
            }
        }

        // follow-up against unexpired context
        if let Some(mut ctx) = session.with(|s| s.live_context().cloned()) {
            if self.followup.is_follow_up(&normalized, &ctx).await {
                let reply = self.followup.respond(utterance, &mut ctx);
                info!(kind = ?reply.kind, "follow-up answered");
                session.with(|s| {
                    if reply.sms_body.is_some() {
                        s.last_sms = reply.sms_body.clone();
                    }
                    s.context = Some(ctx);
                });
                return Answer {
                    text: reply.text,
                    sms_body: reply.sms_body,
                    source: AnswerSource::FollowUp,
                    fallback: false,
                    next: NextAction::Gather,
                };
            }
        }

        if let Some(cached) = self.response_cache.get(&normalized) {
            debug!("response cache hit");
            return cached;
        }

        let classification = self.classifier.classify(utterance).await;
        debug!(
            intent = %classification.intent,
            confidence = classification.confidence,
            "classified utterance"
        );

        match classification.intent {
            Intent::OffTopic => return Answer::canned(lines::OFF_TOPIC_LINE),
            // the emergency path never waits on retrieval or the LLM
            Intent::EmergencyHelp => return Answer::canned(lines::EMERGENCY_LINE),
            Intent::EndConversation => {
                return Answer {
                    text: lines::CONSENT_PROMPT.to_string(),
                    sms_body: None,
                    source: AnswerSource::Canned,
                    fallback: false,
                    next: NextAction::Consent,
                }
            }
            _ => {}
        }

        // location-seeking intents need somewhere to search
        if classification.intent.is_location_seeking()
            && self.rewriter.location_phrase(utterance).is_none()
        {
            let previous = session.with(|s| s.last_location.clone());
            match previous {
                Some(location) => {
                    session.with(|s| {
                        s.pending_confirm = Some(PendingConfirm {
                            intent: classification.intent,
                            utterance: utterance.to_string(),
                            location: location.clone(),
                        });
                    });
                    return Answer::canned(lines::location_confirm(&location));
                }
                None => return Answer::canned(lines::LOCATION_CLARIFY),
            }
        }

        let band = ConfidenceBand::from_score(classification.confidence);
        let answer = match band {
            ConfidenceBand::High | ConfidenceBand::Medium | ConfidenceBand::Low => {
                self.answer_with_retrieval(utterance, classification.intent, band, None, session)
                    .await
            }
            ConfidenceBand::NonFactual => self.llm_no_context(utterance, session).await,
        };

        // degraded answers are not pinned in the cache
        if !answer.fallback {
            self.response_cache.put(normalized, answer.clone());
        }
        answer
    }

    /// Retrieval-first branch. High confidence speaks the shaped result
    /// directly; medium and low ask the LLM to answer with the retrieved
    /// context. Any failure falls back to the LLM without context.
    async fn answer_with_retrieval(
        &self,
        utterance: &str,
        intent: Intent,
        band: ConfidenceBand,
        forced_location: Option<&str>,
        session: &Arc<SessionHandle>,
    ) -> Answer {
        let session_location = session.with(|s| s.last_location.clone());
        let location_hint = forced_location.or(session_location.as_deref());

        let rewritten = self.rewriter.rewrite(utterance, intent, location_hint).await;
        let location_label = rewritten.location.as_ref().map(|l| l.location.clone());

        let retrieved = self
            .retrieval
            .retrieve(&rewritten.query, location_label.as_deref())
            .await;

        let answer = match retrieved {
            Ok(answer) => answer,
            Err(e) => {
                warn!(err = %e, code = e.code(), "retrieval failed, falling back to llm");
                let mut fallback = self.llm_no_context(utterance, session).await;
                fallback.fallback = true;
                return fallback;
            }
        };

        session.with(|s| {
            if let Some(label) = &location_label {
                s.last_location = Some(label.clone());
            }
            if !answer.results.is_empty() {
                s.last_sms = Some(answer.sms_response.clone());
                s.context = Some(QueryContext::new(
                    intent,
                    rewritten.query.clone(),
                    location_label.clone(),
                    answer.results.clone(),
                ));
            }
        });

        let sms_body = (!answer.results.is_empty()).then(|| answer.sms_response.clone());

        if matches!(band, ConfidenceBand::Medium | ConfidenceBand::Low) {
            let titles: Vec<(String, String)> = answer
                .results
                .iter()
                .map(|r| (r.title.clone(), r.url.clone()))
                .collect();
            if let Some(mut generated) = self
                .llm_with_context(utterance, &answer.voice_response, &titles, session)
                .await
            {
                generated.sms_body = sms_body;
                return generated;
            }
            // contextual generation failed; the shaped retrieval answer
            // still stands on its own
        }

        Answer {
            text: answer.voice_response.clone(),
            sms_body,
            source: AnswerSource::Retrieval,
            fallback: false,
            next: NextAction::Gather,
        }
    }

    /// LLM answer with the retrieved context in the system prompt.
    async fn llm_with_context(
        &self,
        utterance: &str,
        retrieved_voice: &str,
        titles: &[(String, String)],
        session: &Arc<SessionHandle>,
    ) -> Option<Answer> {
        let chat = self.chat.as_ref()?;
        let mut system = format!("{ASSISTANT_SYSTEM}\n\nRelevant resources just found:\n");
        system.push_str(retrieved_voice);
        for (title, url) in titles {
            system.push_str(&format!("\n- {title} ({url})"));
        }
        match chat
            .complete(
                &ChatRequest::new(system, utterance)
                    .with_history(chat_history(session, utterance))
                    .with_max_tokens(200),
            )
            .await
        {
            Ok(resp) if !resp.text.trim().is_empty() => Some(Answer {
                text: resp.text.trim().to_string(),
                sms_body: None,
                source: AnswerSource::LlmWithContext,
                fallback: false,
                next: NextAction::Gather,
            }),
            Ok(_) => None,
            Err(e) => {
                warn!(err = %e, "contextual llm call failed");
                None
            }
        }
    }

    /// Last-resort generation: LLM with no retrieval context, degrading to
    /// the canned timeout line when even that fails.
    async fn llm_no_context(&self, utterance: &str, session: &Arc<SessionHandle>) -> Answer {
        if let Some(chat) = self.chat.as_ref() {
            match chat
                .complete(
                    &ChatRequest::new(ASSISTANT_SYSTEM, utterance)
                        .with_history(chat_history(session, utterance))
                        .with_max_tokens(200),
                )
                .await
            {
                Ok(resp) if !resp.text.trim().is_empty() => {
                    return Answer {
                        text: resp.text.trim().to_string(),
                        sms_body: None,
                        source: AnswerSource::LlmOnly,
                        fallback: false,
                        next: NextAction::Gather,
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(err = %e, "llm call failed"),
            }
        }
        let mut answer = Answer::canned(lines::TIMEOUT_LINE);
        answer.fallback = true;
        answer
    }
}

/// Prior dialog turns for the LLM, excluding the utterance being routed
/// (the engine has already appended it to the session history).
fn chat_history(session: &Arc<SessionHandle>, current: &str) -> Vec<ChatTurn> {
    let mut turns: Vec<ChatTurn> = session.with(|s| {
        s.history()
            .map(|turn| ChatTurn {
                role: match turn.role {
                    Role::User => ChatRole::User,
                    Role::Assistant => ChatRole::Assistant,
                },
                content: turn.text.clone(),
            })
            .collect()
    });
    if let Some(last) = turns.last() {
        if last.role == ChatRole::User && last.content == current {
            turns.pop();
        }
    }
    turns
}
