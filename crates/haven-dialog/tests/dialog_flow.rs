// End-to-end dialog turns against fake upstreams: greet, search, follow
// up, consent, and the failure fallbacks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use haven_cache::TtlCache;
use haven_clients::{
    ChatApi, ChatRequest, ChatResponse, ClientError, GeocodeApi, SearchApi, SearchHit,
    SearchOptions, SearchResponse, SmsApi, SmsReceipt,
};
use haven_core::config::SearchConfig;
use haven_core::types::{CallSid, CallStatus, GeoLocation, GeoScope, Intent, QueryContext};
use haven_dialog::{
    lines, DialogEngine, FollowUpEngine, ReplyAction, Router, SessionRegistry,
};
use haven_nlu::{Classifier, Rewriter};
use haven_retrieval::Retrieval;

// ── Fakes ─────────────────────────────────────────────────────────────────────

struct FakeChat {
    classify_reply: Option<&'static str>,
    generate_reply: &'static str,
}

#[async_trait]
impl ChatApi for FakeChat {
    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, ClientError> {
        let text = if req.system.starts_with("You classify") {
            match self.classify_reply {
                Some(intent) => intent.to_string(),
                None => {
                    return Err(ClientError::Network {
                        service: "openai",
                        message: "unavailable".to_string(),
                    })
                }
            }
        } else if req.system.starts_with("You decide whether") {
            "no".to_string()
        } else {
            self.generate_reply.to_string()
        };
        Ok(ChatResponse {
            text,
            tokens_in: 10,
            tokens_out: 10,
        })
    }
}

struct FakeSearch {
    hits: Vec<SearchHit>,
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl SearchApi for FakeSearch {
    async fn search(
        &self,
        _query: &str,
        _opts: &SearchOptions,
    ) -> Result<SearchResponse, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(SearchResponse {
            answer: None,
            results: self.hits.clone(),
        })
    }
}

struct FakeGeocode;

#[async_trait]
impl GeocodeApi for FakeGeocode {
    async fn resolve(&self, text: &str) -> Result<Option<GeoLocation>, ClientError> {
        if text.to_lowercase().contains("austin") {
            Ok(Some(GeoLocation {
                location: "Austin, Texas".to_string(),
                is_us: true,
                scope: GeoScope::City,
            }))
        } else {
            Ok(None)
        }
    }
}

#[derive(Default)]
struct FakeSms {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl SmsApi for FakeSms {
    async fn send(&self, to: &str, body: &str) -> Result<SmsReceipt, ClientError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(SmsReceipt {
            id: "SM1".to_string(),
            status: "queued".to_string(),
        })
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

fn shelter_hit(title: &str, url: &str, score: f64) -> SearchHit {
    SearchHit {
        title: title.to_string(),
        url: url.to_string(),
        content: "Domestic violence shelter with 24/7 hotline. Call 512-555-0142 or visit \
                  100 Main St, Austin, TX 78701."
            .to_string(),
        score,
    }
}

fn default_hits() -> Vec<SearchHit> {
    vec![
        shelter_hit("Safe Haven", "https://safehaven.org", 0.95),
        shelter_hit("Family Crisis Center", "https://familycrisis.org", 0.9),
        shelter_hit("Hope Shelter", "https://hopeshelter.org", 0.85),
        shelter_hit("Low Score Refuge", "https://lowscore.org", 0.2),
        shelter_hit("Guide Page", "https://travelblog.com/top-10-things-to-do", 0.9),
    ]
}

struct TestBed {
    engine: DialogEngine,
    search: Arc<FakeSearch>,
    sms: Arc<FakeSms>,
}

fn testbed(chat: FakeChat, hits: Vec<SearchHit>, search_delay: Duration) -> TestBed {
    let mut search_cfg = SearchConfig::default();
    search_cfg.timeout_ms = 500;
    if !search_delay.is_zero() {
        search_cfg.timeout_ms = 50;
    }

    let chat: Arc<dyn ChatApi> = Arc::new(chat);
    let search = Arc::new(FakeSearch {
        hits,
        delay: search_delay,
        calls: AtomicUsize::new(0),
    });
    let sms = Arc::new(FakeSms::default());

    let classifier = Classifier::new(
        Arc::new(TtlCache::new("classifier", Duration::from_secs(3600), 100)),
        Some(chat.clone()),
    );
    let rewriter = Rewriter::new(
        Arc::new(FakeGeocode),
        Arc::new(TtlCache::new("geocode", Duration::from_secs(3600), 100)),
    );
    let retrieval = Retrieval::new(
        search.clone(),
        Arc::new(TtlCache::new("retrieval", Duration::from_secs(3600), 100)),
        &search_cfg,
    );
    let router = Arc::new(Router::new(
        classifier,
        rewriter,
        retrieval,
        FollowUpEngine::new(Some(chat.clone())),
        Some(chat.clone()),
        Arc::new(TtlCache::new("response", Duration::from_secs(3600), 100)),
    ));
    let registry = Arc::new(SessionRegistry::new(Duration::from_secs(1800), 20));
    let engine = DialogEngine::new(
        registry,
        router,
        Some(chat),
        Some(sms.clone() as Arc<dyn SmsApi>),
    );

    TestBed {
        engine,
        search,
        sms,
    }
}

fn no_llm() -> FakeChat {
    FakeChat {
        classify_reply: None,
        generate_reply: "I'm here to help however I can.",
    }
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_shelter_query_speaks_the_shaped_result() {
    let bed = testbed(no_llm(), default_hits(), Duration::ZERO);
    let sid = CallSid::from("CA100");

    let greet = bed.engine.handle_call_start(&sid, Some("+15125550100")).await;
    assert_eq!(greet.text, lines::GREETING);
    assert_eq!(greet.action, ReplyAction::Gather);

    let reply = bed
        .engine
        .handle_utterance(&sid, "find a shelter in Austin, Texas")
        .await;
    assert_eq!(
        reply.text,
        "I found 3 shelters in Austin, Texas: Safe Haven, Family Crisis Center, \
         and Hope Shelter. How else can I help you today?"
    );
    assert_eq!(reply.action, ReplyAction::Gather);
    assert_eq!(bed.search.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_query_is_served_from_cache() {
    let bed = testbed(no_llm(), default_hits(), Duration::ZERO);
    let sid = CallSid::from("CA101");
    bed.engine.handle_call_start(&sid, None).await;

    bed.engine
        .handle_utterance(&sid, "find a shelter in Austin, Texas")
        .await;
    // second session, same utterance: retrieval cache and response cache
    // both prevent a new upstream call
    let sid2 = CallSid::from("CA102");
    bed.engine.handle_call_start(&sid2, None).await;
    bed.engine
        .handle_utterance(&sid2, "find a shelter in Austin, Texas")
        .await;
    assert_eq!(bed.search.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ordinal_follow_up_within_window() {
    let bed = testbed(no_llm(), default_hits(), Duration::ZERO);
    let sid = CallSid::from("CA103");
    bed.engine.handle_call_start(&sid, None).await;
    bed.engine
        .handle_utterance(&sid, "find a shelter in Austin, Texas")
        .await;

    let reply = bed
        .engine
        .handle_utterance(&sid, "tell me more about the second one")
        .await;
    assert!(
        reply
            .text
            .starts_with("Here's what I found about Family Crisis Center:"),
        "got: {}",
        reply.text
    );
    assert!(reply
        .text
        .ends_with("Would you like me to send you the complete details?"));
    // the follow-up never re-queries search
    assert_eq!(bed.search.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_context_is_ignored_and_location_is_reclarified() {
    let bed = testbed(
        FakeChat {
            classify_reply: Some("find_shelter"),
            generate_reply: "I'm here to help.",
        },
        default_hits(),
        Duration::ZERO,
    );
    let sid = CallSid::from("CA104");
    bed.engine.handle_call_start(&sid, None).await;

    // plant an already-expired context with no remembered location
    let session = bed.engine.registry().get(&sid).unwrap();
    session.with(|s| {
        let mut ctx = QueryContext::new(Intent::FindShelter, "old query", None, Vec::new());
        ctx.timestamp = std::time::Instant::now() - Duration::from_secs(6 * 60);
        s.context = Some(ctx);
    });

    let reply = bed
        .engine
        .handle_utterance(&sid, "tell me more about the second one")
        .await;
    assert_eq!(reply.text, lines::LOCATION_CLARIFY);
    assert_eq!(bed.search.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn emergency_bypasses_retrieval() {
    let bed = testbed(no_llm(), default_hits(), Duration::ZERO);
    let sid = CallSid::from("CA105");
    bed.engine.handle_call_start(&sid, None).await;

    let reply = bed
        .engine
        .handle_utterance(&sid, "I need help now he has a gun")
        .await;
    assert_eq!(reply.text, lines::EMERGENCY_LINE);
    assert_eq!(bed.search.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn goodbye_then_consent_yes_sends_the_sms() {
    let bed = testbed(no_llm(), default_hits(), Duration::ZERO);
    let sid = CallSid::from("CA106");
    bed.engine.handle_call_start(&sid, Some("+15125550100")).await;
    bed.engine
        .handle_utterance(&sid, "find a shelter in Austin, Texas")
        .await;

    let reply = bed.engine.handle_utterance(&sid, "okay goodbye").await;
    assert_eq!(reply.text, lines::CONSENT_PROMPT);
    assert_eq!(reply.action, ReplyAction::ConsentGather);

    let reply = bed.engine.handle_consent(&sid, "yes please").await;
    assert_eq!(reply.text, lines::CONSENT_YES);
    assert_eq!(reply.action, ReplyAction::Hangup);

    bed.engine.handle_status(&sid, CallStatus::Completed).await;
    // the send runs on a detached task
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sent = bed.sms.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "+15125550100");
    assert!(sent[0].1.contains("1. Safe Haven"));
    assert!(sent[0].1.contains(haven_retrieval::SMS_TRAILER));
}

#[tokio::test]
async fn consent_no_sends_nothing() {
    let bed = testbed(no_llm(), default_hits(), Duration::ZERO);
    let sid = CallSid::from("CA107");
    bed.engine.handle_call_start(&sid, Some("+15125550100")).await;
    bed.engine
        .handle_utterance(&sid, "find a shelter in Austin, Texas")
        .await;
    bed.engine.handle_utterance(&sid, "goodbye").await;

    let reply = bed.engine.handle_consent(&sid, "no thanks").await;
    assert_eq!(reply.text, lines::CONSENT_NO);

    bed.engine.handle_status(&sid, CallStatus::Completed).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(bed.sms.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn search_timeout_falls_back_to_llm() {
    let bed = testbed(
        FakeChat {
            classify_reply: None,
            generate_reply: "There are several organizations that can help you find shelter.",
        },
        default_hits(),
        Duration::from_millis(200),
    );
    let sid = CallSid::from("CA108");
    bed.engine.handle_call_start(&sid, None).await;

    let reply = bed
        .engine
        .handle_utterance(&sid, "find a shelter in Austin, Texas")
        .await;
    assert_eq!(
        reply.text,
        "There are several organizations that can help you find shelter."
    );
    // search was attempted but timed out
    assert_eq!(bed.search.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn silence_reprompts_then_hangs_up() {
    let bed = testbed(no_llm(), default_hits(), Duration::ZERO);
    let sid = CallSid::from("CA109");
    bed.engine.handle_call_start(&sid, None).await;

    let first = bed.engine.handle_utterance(&sid, "").await;
    assert_eq!(first.text, lines::REPROMPT);
    let second = bed.engine.handle_utterance(&sid, "  ").await;
    assert_eq!(second.text, lines::REPROMPT);
    let third = bed.engine.handle_utterance(&sid, "").await;
    assert_eq!(third.action, ReplyAction::Hangup);
}

#[tokio::test]
async fn inbound_sms_gets_the_sms_shaped_answer() {
    let bed = testbed(no_llm(), default_hits(), Duration::ZERO);
    let reply = bed
        .engine
        .handle_sms("+15125550177", "find a shelter in Austin, Texas")
        .await;
    assert!(reply.contains("1. Safe Haven"));
    assert!(reply.contains(haven_retrieval::SMS_TRAILER));
}

#[tokio::test]
async fn history_stays_bounded_over_a_long_call() {
    let bed = testbed(no_llm(), default_hits(), Duration::ZERO);
    let sid = CallSid::from("CA110");
    bed.engine.handle_call_start(&sid, None).await;
    for _ in 0..15 {
        bed.engine
            .handle_utterance(&sid, "find a shelter in Austin, Texas")
            .await;
    }
    let session = bed.engine.registry().get(&sid).unwrap();
    assert!(session.with(|s| s.history_len()) <= 20);
}
