//! Per-call session state. One `CallSession` per live call, owned by the
//! registry and mutated only through its handle's short-lived data lock.

use std::collections::VecDeque;
use std::time::Instant;

use chrono::{DateTime, Utc};

use haven_core::types::{CallSid, Intent, QueryContext, SmsConsent, Turn};

/// Dialog state machine states.
///
/// ```text
/// [new] -> Greeting -> AwaitingUtterance -> Processing
///                           ^                   |
///                           +--- reply ---------+--> AwaitingConsent -> Ending -> Ended
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Greeting,
    AwaitingUtterance,
    Processing,
    AwaitingConsent,
    Ending,
    Ended,
}

/// A location confirmation the router is waiting on ("search Austin
/// again?"), carrying what to search once the caller answers.
#[derive(Debug, Clone)]
pub struct PendingConfirm {
    pub intent: Intent,
    pub utterance: String,
    pub location: String,
}

#[derive(Debug)]
pub struct CallSession {
    pub sid: CallSid,
    /// Caller number in E.164, when the provider shared it.
    pub caller: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity: Instant,
    pub state: SessionState,
    pub consent: SmsConsent,
    history: VecDeque<Turn>,
    history_max: usize,
    pub context: Option<QueryContext>,
    pub pending_confirm: Option<PendingConfirm>,
    /// The SMS body promised to the caller, sent on consent at call end.
    pub last_sms: Option<String>,
    /// Last location the caller searched, for follow-up confirmation.
    pub last_location: Option<String>,
    pub reprompt_count: u32,
}

impl CallSession {
    pub fn new(sid: CallSid, caller: Option<String>, history_max: usize) -> Self {
        Self {
            sid,
            caller,
            started_at: Utc::now(),
            last_activity: Instant::now(),
            state: SessionState::Greeting,
            consent: SmsConsent::Unknown,
            history: VecDeque::new(),
            history_max,
            context: None,
            pending_confirm: None,
            last_sms: None,
            last_location: None,
            reprompt_count: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Append a turn, dropping the oldest when over the bound.
    pub fn push_turn(&mut self, turn: Turn) {
        self.history.push_back(turn);
        while self.history.len() > self.history_max {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &Turn> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// The follow-up context, or `None` once it has expired.
    pub fn live_context(&self) -> Option<&QueryContext> {
        self.context.as_ref().filter(|ctx| !ctx.is_expired())
    }

    pub fn is_idle_for(&self, idle: std::time::Duration) -> bool {
        self.last_activity.elapsed() >= idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded() {
        let mut session = CallSession::new(CallSid::from("CA1"), None, 3);
        for i in 0..10 {
            session.push_turn(Turn::user(format!("turn {i}")));
        }
        assert_eq!(session.history_len(), 3);
        let first = session.history().next().unwrap();
        assert_eq!(first.text, "turn 7");
    }

    #[test]
    fn expired_context_reads_as_absent() {
        let mut session = CallSession::new(CallSid::from("CA1"), None, 20);
        let mut ctx = QueryContext::new(Intent::FindShelter, "q", None, Vec::new());
        // age the context past the five-minute window
        ctx.timestamp = Instant::now() - std::time::Duration::from_secs(6 * 60);
        session.context = Some(ctx);
        assert!(session.live_context().is_none());
        assert!(session.context.is_some());
    }

    #[test]
    fn new_session_starts_in_greeting() {
        let session = CallSession::new(CallSid::from("CA1"), Some("+15125550100".into()), 20);
        assert_eq!(session.state, SessionState::Greeting);
        assert_eq!(session.consent, SmsConsent::Unknown);
    }
}
