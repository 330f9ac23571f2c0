//! End-to-end tests for the HTTP surface, driven through the axum router
//! with a scripted automation client.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use warelay::automation::{self, AutomationClient, AutomationEvent, ChatRecord};
use warelay::config::RelayConfig;
use warelay::routes;
use warelay::session::{SessionController, SessionState};
use warelay::state::AppState;

/// Scripted automation client: fixed chat list, optional send failure, and a
/// counter proving whether resolution consulted the chat list.
struct ScriptedClient {
    chats: Vec<ChatRecord>,
    list_calls: AtomicUsize,
    fail_send: Option<String>,
}

impl ScriptedClient {
    fn new(chats: Vec<ChatRecord>) -> Self {
        Self {
            chats,
            list_calls: AtomicUsize::new(0),
            fail_send: None,
        }
    }
}

#[async_trait::async_trait]
impl AutomationClient for ScriptedClient {
    async fn bootstrap(
        &self,
        _events: tokio::sync::mpsc::Sender<AutomationEvent>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn list_chats(&self) -> anyhow::Result<Vec<ChatRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.chats.clone())
    }

    async fn send_message(&self, _target: &str, _body: &str) -> anyhow::Result<()> {
        match &self.fail_send {
            Some(msg) => anyhow::bail!("{msg}"),
            None => Ok(()),
        }
    }
}

fn sample_chats() -> Vec<ChatRecord> {
    vec![
        ChatRecord {
            id: "111@g.us".into(),
            name: "Johnny Appleseed".into(),
        },
        ChatRecord {
            id: "222@c.us".into(),
            name: "John Smith".into(),
        },
    ]
}

struct Harness {
    session: Arc<SessionController>,
    client: Arc<ScriptedClient>,
    app: Router,
}

fn harness_with(client: ScriptedClient) -> Harness {
    let session = Arc::new(SessionController::new());
    let client = Arc::new(client);
    let state = AppState::new(
        RelayConfig::default(),
        session.clone(),
        client.clone() as Arc<dyn AutomationClient>,
    );
    Harness {
        session,
        client,
        app: routes::app(state),
    }
}

fn harness() -> Harness {
    harness_with(ScriptedClient::new(sample_chats()))
}

async fn get(app: &Router, path: &str) -> (StatusCode, Vec<u8>) {
    let resp = app
        .clone()
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    let (status, body) = get(app, path).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_send(app: &Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let resp = app
        .clone()
        .oneshot(
            Request::post("/send")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

// ── Status endpoints ─────────────────────────────────────────

#[tokio::test]
async fn root_reports_running_with_readiness_flag() {
    let h = harness();
    let (status, json) = get_json(&h.app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "running");
    assert_eq!(json["ready"], false);

    h.session.on_ready();
    let (status, json) = get_json(&h.app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);
}

#[tokio::test]
async fn health_reports_connecting_then_ready() {
    let h = harness();
    let (status, json) = get_json(&h.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "connecting");

    h.session.on_ready();
    let (_, json) = get_json(&h.app, "/health").await;
    assert_eq!(json["status"], "ready");
}

#[tokio::test]
async fn status_endpoints_never_mutate_state() {
    let h = harness();
    h.session.on_qr_issued("XYZ");
    for _ in 0..5 {
        let _ = get_json(&h.app, "/").await;
        let _ = get_json(&h.app, "/health").await;
    }
    assert_eq!(h.session.state(), SessionState::AwaitingScan);
    assert_eq!(h.session.qr().unwrap().payload, "XYZ");
}

#[tokio::test]
async fn unknown_route_returns_404_with_route_list() {
    let h = harness();
    let (status, json) = get_json(&h.app, "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "Not found");
}

// ── QR page ──────────────────────────────────────────────────

#[tokio::test]
async fn qr_page_before_any_challenge_says_no_qr() {
    let h = harness();
    let (status, body) = get(&h.app, "/qr").await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("No QR available"));
}

#[tokio::test]
async fn qr_page_renders_challenge_while_awaiting_scan() {
    let h = harness();
    h.session.on_qr_issued("XYZ");
    let (status, body) = get(&h.app, "/qr").await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("<svg"));
}

#[tokio::test]
async fn qr_page_after_ready_never_shows_a_scan_image() {
    let h = harness();
    h.session.on_qr_issued("XYZ");
    h.session.on_ready();
    for _ in 0..3 {
        let (status, body) = get(&h.app, "/qr").await;
        assert_eq!(status, StatusCode::OK);
        let html = String::from_utf8(body).unwrap();
        assert!(html.contains("Already authenticated"));
        assert!(!html.contains("<svg"));
    }
}

// ── POST /send ───────────────────────────────────────────────

#[tokio::test]
async fn send_before_ready_is_503_regardless_of_body() {
    let h = harness();
    let (status, json) = post_send(
        &h.app,
        serde_json::json!({"contact": "5551234567", "message": "hi"}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"], "Not ready");
    assert_eq!(h.client.list_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn send_to_formatted_number_takes_numeric_path() {
    let h = harness();
    h.session.on_ready();
    let (status, json) = post_send(
        &h.app,
        serde_json::json!({"contact": "+1 (555) 123-4567", "message": "hi"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["contact"], "15551234567");
    // Numeric addressing must never consult the chat list, even though a
    // fuzzy match could exist.
    assert_eq!(h.client.list_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn send_fuzzy_match_picks_first_chat_in_order() {
    let h = harness();
    h.session.on_ready();
    let (status, json) = post_send(
        &h.app,
        serde_json::json!({"contact": "john", "message": "hi"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["contact"], "Johnny Appleseed");
    assert_eq!(h.client.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn send_unmatched_contact_is_404() {
    let h = harness();
    h.session.on_ready();
    let (status, json) = post_send(
        &h.app,
        serde_json::json!({"contact": "zzz", "message": "hi"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "Contact not found");
}

#[tokio::test]
async fn send_with_missing_fields_is_a_generic_500() {
    let h = harness();
    h.session.on_ready();
    for body in [
        serde_json::json!({"message": "hi"}),
        serde_json::json!({"contact": "john"}),
        serde_json::json!({"contact": "", "message": "hi"}),
    ] {
        let (status, json) = post_send(&h.app, body).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].is_string());
    }
}

#[tokio::test]
async fn transport_failure_returns_500_with_underlying_text() {
    let mut client = ScriptedClient::new(sample_chats());
    client.fail_send = Some("invalid wid".into());
    let h = harness_with(client);
    h.session.on_ready();
    let (status, json) = post_send(
        &h.app,
        serde_json::json!({"contact": "5551234567", "message": "hi"}),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "invalid wid");
}

// ── Full lifecycle ───────────────────────────────────────────

#[tokio::test]
async fn qr_then_ready_then_send_end_to_end() {
    let h = harness();

    // Events flow through the pump exactly as they would from the client.
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let pump = automation::spawn_event_pump(h.session.clone(), rx);

    tx.send(AutomationEvent::QrIssued("XYZ".into()))
        .await
        .unwrap();
    tx.send(AutomationEvent::Authenticated).await.unwrap();
    // Let the pump apply the QR before asserting on it.
    tokio::task::yield_now().await;

    let (_, json) = get_json(&h.app, "/health").await;
    assert_eq!(json["status"], "connecting");
    let (_, body) = get(&h.app, "/qr").await;
    assert!(String::from_utf8(body).unwrap().contains("<svg"));

    tx.send(AutomationEvent::Ready).await.unwrap();
    drop(tx);
    pump.await.unwrap();

    let (_, json) = get_json(&h.app, "/health").await;
    assert_eq!(json["status"], "ready");
    let (_, body) = get(&h.app, "/qr").await;
    assert!(String::from_utf8(body)
        .unwrap()
        .contains("Already authenticated"));

    let (status, json) = post_send(
        &h.app,
        serde_json::json!({"contact": "5551234567", "message": "hi"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["contact"], "5551234567");
}
