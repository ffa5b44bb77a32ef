//! Session registry: concurrent map keyed by call SID, per-session turn
//! lock, cancellation token, and an idle reaper.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use haven_core::types::CallSid;

use crate::session::{CallSession, SessionState};

/// One live call. The `turn` lock serializes webhook and media-worker
/// turns (utterances process strictly in arrival order); the inner data
/// lock is only ever held for short, non-async sections.
pub struct SessionHandle {
    pub turn: tokio::sync::Mutex<()>,
    data: Mutex<CallSession>,
    /// Cancelled when the call ends; every in-flight upstream call for the
    /// session selects against it.
    pub cancel: CancellationToken,
}

impl SessionHandle {
    fn new(session: CallSession) -> Self {
        Self {
            turn: tokio::sync::Mutex::new(()),
            data: Mutex::new(session),
            cancel: CancellationToken::new(),
        }
    }

    /// Run a closure under the data lock. Never await while inside.
    pub fn with<R>(&self, f: impl FnOnce(&mut CallSession) -> R) -> R {
        let mut session = self.data.lock().unwrap();
        f(&mut session)
    }

    pub fn state(&self) -> SessionState {
        self.with(|s| s.state)
    }

    pub fn touch(&self) {
        self.with(|s| s.touch());
    }
}

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionHandle>>,
    idle_ttl: Duration,
    history_max: usize,
}

impl SessionRegistry {
    pub fn new(idle_ttl: Duration, history_max: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_ttl,
            history_max,
        }
    }

    pub fn from_config(cfg: &haven_core::config::SessionConfig) -> Self {
        Self::new(Duration::from_millis(cfg.idle_ttl_ms), cfg.history_max)
    }

    /// Look up a session, creating it on the first webhook for a new SID.
    pub fn get_or_create(&self, sid: &CallSid, caller: Option<&str>) -> Arc<SessionHandle> {
        if let Some(handle) = self.sessions.get(sid.as_str()) {
            // backfill the caller number if a later webhook supplies it
            if let Some(caller) = caller {
                handle.with(|s| {
                    if s.caller.is_none() {
                        s.caller = Some(caller.to_string());
                    }
                });
            }
            return handle.clone();
        }
        let handle = Arc::new(SessionHandle::new(CallSession::new(
            sid.clone(),
            caller.map(str::to_string),
            self.history_max,
        )));
        debug!(call_sid = %sid, "session created");
        self.sessions
            .entry(sid.as_str().to_string())
            .or_insert(handle)
            .clone()
    }

    pub fn get(&self, sid: &CallSid) -> Option<Arc<SessionHandle>> {
        self.sessions.get(sid.as_str()).map(|h| h.clone())
    }

    /// Cancel and drop a session. In-flight work observes the token and
    /// aborts; the handle itself is freed once the last Arc goes away.
    pub fn remove(&self, sid: &CallSid) {
        if let Some((_, handle)) = self.sessions.remove(sid.as_str()) {
            handle.cancel.cancel();
            info!(call_sid = %sid, "session removed");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Reap sessions idle past the TTL. Returns how many were removed.
    pub fn reap_idle(&self) -> usize {
        let victims: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().with(|s| s.is_idle_for(self.idle_ttl)))
            .map(|entry| entry.key().clone())
            .collect();
        for sid in &victims {
            if let Some((_, handle)) = self.sessions.remove(sid) {
                handle.cancel.cancel();
                info!(call_sid = %sid, "idle session reaped");
            }
        }
        victims.len()
    }

    /// Background reaper at a fraction of the idle TTL.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let interval = (self.idle_ttl / 4).max(Duration::from_secs(5));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                match registry.upgrade() {
                    Some(registry) => {
                        registry.reap_idle();
                    }
                    None => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent_per_sid() {
        let registry = SessionRegistry::new(Duration::from_secs(60), 20);
        let sid = CallSid::from("CA1");
        let a = registry.get_or_create(&sid, None);
        let b = registry.get_or_create(&sid, Some("+15125550100"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        // the second webhook backfilled the caller
        assert_eq!(a.with(|s| s.caller.clone()), Some("+15125550100".to_string()));
    }

    #[test]
    fn remove_cancels_the_session_token() {
        let registry = SessionRegistry::new(Duration::from_secs(60), 20);
        let sid = CallSid::from("CA1");
        let handle = registry.get_or_create(&sid, None);
        assert!(!handle.cancel.is_cancelled());
        registry.remove(&sid);
        assert!(handle.cancel.is_cancelled());
        assert!(registry.get(&sid).is_none());
    }

    #[tokio::test]
    async fn reaper_removes_only_idle_sessions() {
        let registry = SessionRegistry::new(Duration::from_millis(30), 20);
        let idle = registry.get_or_create(&CallSid::from("CA-idle"), None);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let fresh = registry.get_or_create(&CallSid::from("CA-fresh"), None);
        let _ = fresh;

        let removed = registry.reap_idle();
        assert_eq!(removed, 1);
        assert!(idle.cancel.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn turn_lock_serializes_concurrent_turns() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60), 20));
        let handle = registry.get_or_create(&CallSid::from("CA1"), None);
        let in_turn = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let handle = handle.clone();
            let in_turn = in_turn.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = handle.turn.lock().await;
                let now = in_turn.fetch_add(1, Ordering::SeqCst);
                assert_eq!(now, 0, "two tasks inside one session's turn");
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_turn.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }
}
