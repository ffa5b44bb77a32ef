//! Dialog state machine: one turn loop per call, consent branch, idle
//! re-prompts, and end-of-call teardown (summary + consented SMS).

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use haven_clients::{ChatApi, SmsApi};
use haven_core::config::{MAX_REPROMPTS, PROCESS_BUDGET_MS, REPROMPT_AFTER_SECS};
use haven_core::types::{CallSid, CallStatus, SmsConsent, Turn};
use haven_nlu::parse_affirmation;

use crate::lines;
use crate::registry::{SessionHandle, SessionRegistry};
use crate::router::{NextAction, Router};
use crate::session::SessionState;
use crate::summary::summarize_call;

/// What the transport layer should do with the reply text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyAction {
    /// Speak, then gather the next utterance.
    Gather,
    /// Speak the consent question, then gather a yes/no.
    ConsentGather,
    /// Speak, then hang up.
    Hangup,
}

#[derive(Debug, Clone)]
pub struct EngineReply {
    pub text: String,
    pub action: ReplyAction,
}

impl EngineReply {
    fn gather(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: ReplyAction::Gather,
        }
    }
}

pub struct DialogEngine {
    registry: Arc<SessionRegistry>,
    router: Arc<Router>,
    chat: Option<Arc<dyn ChatApi>>,
    sms: Option<Arc<dyn SmsApi>>,
}

impl DialogEngine {
    pub fn new(
        registry: Arc<SessionRegistry>,
        router: Arc<Router>,
        chat: Option<Arc<dyn ChatApi>>,
        sms: Option<Arc<dyn SmsApi>>,
    ) -> Self {
        Self {
            registry,
            router,
            chat,
            sms,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// First webhook for a call: create the session and greet.
    pub async fn handle_call_start(&self, sid: &CallSid, caller: Option<&str>) -> EngineReply {
        let session = self.registry.get_or_create(sid, caller);
        let _turn = session.turn.lock().await;
        session.with(|s| {
            s.state = SessionState::AwaitingUtterance;
            s.touch();
        });
        info!(call_sid = %sid, "call started");
        EngineReply::gather(lines::GREETING)
    }

    /// One caller utterance. An empty transcript is the gather-timeout
    /// signal and runs the re-prompt path instead of the router.
    pub async fn handle_utterance(&self, sid: &CallSid, text: &str) -> EngineReply {
        let session = self.registry.get_or_create(sid, None);
        let _turn = session.turn.lock().await;

        if session.cancel.is_cancelled() {
            return EngineReply {
                text: String::new(),
                action: ReplyAction::Hangup,
            };
        }

        if text.trim().is_empty() {
            return self.reprompt(&session);
        }

        session.with(|s| {
            s.reprompt_count = 0;
            s.touch();
            s.state = SessionState::Processing;
            s.push_turn(Turn::user(text));
        });

        let answer = tokio::select! {
            _ = session.cancel.cancelled() => {
                info!(call_sid = %sid, "turn cancelled, call ended mid-processing");
                return EngineReply { text: String::new(), action: ReplyAction::Hangup };
            }
            routed = tokio::time::timeout(
                Duration::from_millis(PROCESS_BUDGET_MS),
                self.router.route(text, &session),
            ) => match routed {
                Ok(answer) => answer,
                Err(_) => {
                    warn!(call_sid = %sid, budget_ms = PROCESS_BUDGET_MS, "turn over budget");
                    session.with(|s| s.state = SessionState::AwaitingUtterance);
                    return EngineReply::gather(lines::TIMEOUT_LINE);
                }
            }
        };

        let action = match answer.next {
            NextAction::Gather => ReplyAction::Gather,
            NextAction::Consent => ReplyAction::ConsentGather,
            NextAction::Hangup => ReplyAction::Hangup,
        };

        session.with(|s| {
            s.push_turn(Turn::assistant(&answer.text));
            s.state = match answer.next {
                NextAction::Gather => SessionState::AwaitingUtterance,
                NextAction::Consent => SessionState::AwaitingConsent,
                NextAction::Hangup => SessionState::Ending,
            };
            s.touch();
        });

        if answer.fallback {
            info!(call_sid = %sid, "turn answered via fallback");
        }

        EngineReply {
            text: answer.text,
            action,
        }
    }

    /// Gentle nudge after silence; two strikes and the call winds down.
    fn reprompt(&self, session: &Arc<SessionHandle>) -> EngineReply {
        let strikes = session.with(|s| {
            s.reprompt_count += 1;
            s.touch();
            s.reprompt_count
        });
        if strikes > MAX_REPROMPTS {
            session.with(|s| s.state = SessionState::Ending);
            EngineReply {
                text: lines::IDLE_GOODBYE.to_string(),
                action: ReplyAction::Hangup,
            }
        } else {
            EngineReply::gather(lines::REPROMPT)
        }
    }

    /// Media-side idle check: emit a re-prompt when the caller has been
    /// silent past the threshold while we wait on an utterance.
    pub fn idle_nudge(&self, sid: &CallSid) -> Option<EngineReply> {
        let session = self.registry.get(sid)?;
        let due = session.with(|s| {
            s.state == SessionState::AwaitingUtterance
                && s.is_idle_for(Duration::from_secs(REPROMPT_AFTER_SECS))
        });
        due.then(|| self.reprompt(&session))
    }

    /// Partial transcript webhook: refresh activity, nothing else.
    pub fn handle_interim(&self, sid: &CallSid) {
        if let Some(session) = self.registry.get(sid) {
            session.touch();
        }
    }

    /// Consent answer after the goodbye branch.
    pub async fn handle_consent(&self, sid: &CallSid, speech: &str) -> EngineReply {
        let session = self.registry.get_or_create(sid, None);
        let _turn = session.turn.lock().await;

        match parse_affirmation(&speech.trim().to_lowercase()) {
            Some(true) => {
                session.with(|s| {
                    s.consent = SmsConsent::Granted;
                    s.state = SessionState::Ending;
                    s.touch();
                });
                info!(call_sid = %sid, "sms consent granted");
                EngineReply {
                    text: lines::CONSENT_YES.to_string(),
                    action: ReplyAction::Hangup,
                }
            }
            Some(false) => {
                session.with(|s| {
                    s.consent = SmsConsent::Denied;
                    s.state = SessionState::Ending;
                    s.touch();
                });
                EngineReply {
                    text: lines::CONSENT_NO.to_string(),
                    action: ReplyAction::Hangup,
                }
            }
            None => EngineReply {
                text: lines::CONSENT_REPEAT.to_string(),
                action: ReplyAction::ConsentGather,
            },
        }
    }

    /// Provider status callback. Terminal statuses tear the session down.
    pub async fn handle_status(&self, sid: &CallSid, status: CallStatus) {
        if !status.is_terminal() {
            if let Some(session) = self.registry.get(sid) {
                session.touch();
            }
            return;
        }
        self.finalize(sid).await;
    }

    /// End of call: snapshot under the lock, drop the session (cancelling
    /// any in-flight turn work), then run summary + consented SMS on the
    /// snapshot in a detached task.
    async fn finalize(&self, sid: &CallSid) {
        let Some(session) = self.registry.get(sid) else {
            return;
        };

        let (history, consent, caller, last_sms) = session.with(|s| {
            s.state = SessionState::Ended;
            (
                s.history().cloned().collect::<Vec<Turn>>(),
                s.consent,
                s.caller.clone(),
                s.last_sms.clone(),
            )
        });
        self.registry.remove(sid);
        info!(call_sid = %sid, turns = history.len(), consent = ?consent, "call ended");

        let chat = self.chat.clone();
        let sms = self.sms.clone();
        let sid = sid.clone();
        tokio::spawn(async move {
            if let Some(chat) = &chat {
                if let Some(summary) = summarize_call(chat, &history).await {
                    info!(call_sid = %sid, summary = %summary, "call summary");
                }
            }

            // summary SMS goes out only on explicit consent
            if consent != SmsConsent::Granted {
                return;
            }
            let (Some(sms), Some(to), Some(body)) = (sms, caller, last_sms) else {
                return;
            };
            match sms.send(&to, &body).await {
                Ok(receipt) => {
                    info!(call_sid = %sid, sms_id = %receipt.id, "summary sms sent")
                }
                Err(e) => warn!(call_sid = %sid, err = %e, "summary sms failed"),
            }
        });
    }

    /// Inbound SMS runs the same router against a synthetic session keyed
    /// by the sender, preferring the SMS-shaped body in the reply.
    pub async fn handle_sms(&self, from: &str, body: &str) -> String {
        let sid = CallSid::from(format!("sms:{from}"));
        let session = self.registry.get_or_create(&sid, Some(from));
        let _turn = session.turn.lock().await;
        session.with(|s| {
            s.state = SessionState::Processing;
            s.touch();
            s.push_turn(Turn::user(body));
        });

        let answer = self.router.route(body, &session).await;
        session.with(|s| {
            s.push_turn(Turn::assistant(&answer.text));
            s.state = SessionState::AwaitingUtterance;
        });
        answer.sms_body.unwrap_or(answer.text)
    }
}
