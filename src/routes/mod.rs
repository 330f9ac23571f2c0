pub mod send_routes;

use crate::session::SessionState;
use crate::state::SharedState;
use axum::extract::State;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

pub fn app(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/qr", get(qr_page))
        .route("/send", post(send_routes::send))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "running",
        "ready": state.session.is_ready(),
    }))
}

async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let status = if state.session.is_ready() {
        "ready"
    } else {
        "connecting"
    };
    Json(serde_json::json!({ "status": status }))
}

/// Human-facing pairing page: the scannable QR while a challenge is
/// outstanding, a notice otherwise. Always 200, it is a browser page rather
/// than an API.
async fn qr_page(State(state): State<SharedState>) -> Html<String> {
    let body = if state.session.state() == SessionState::Ready {
        "<p>Already authenticated. No QR code to scan.</p>".to_string()
    } else {
        match state.session.qr() {
            Some(qr) => match qr.svg {
                Some(svg) => format!(
                    "<p>Scan with WhatsApp &gt; Linked Devices:</p><div>{svg}</div>"
                ),
                None => format!(
                    "<p>Scan with WhatsApp &gt; Linked Devices (raw payload):</p><pre>{}</pre>",
                    qr.payload
                ),
            },
            None => "<p>No QR available yet. Waiting for the session to start...</p>".to_string(),
        }
    };

    Html(format!(
        "<!doctype html><html><head><title>warelay</title></head><body>{body}</body></html>"
    ))
}

async fn not_found() -> (axum::http::StatusCode, Json<serde_json::Value>) {
    (
        axum::http::StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "Not found",
            "routes": ["GET /", "GET /health", "GET /qr", "POST /send"],
        })),
    )
}
