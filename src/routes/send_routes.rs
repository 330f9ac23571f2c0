use crate::error::RelayError;
use crate::resolve;
use crate::state::SharedState;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Fields are optional so that a missing one reaches the mediator's own
/// validation instead of being rejected by the extractor.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub contact: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub success: bool,
    pub contact: String,
}

pub async fn send(
    State(state): State<SharedState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResponse>, RelayError> {
    let target = resolve::relay_message(
        &state.session,
        state.automation.as_ref(),
        req.contact.as_deref(),
        req.message.as_deref(),
    )
    .await?;

    Ok(Json(SendResponse {
        success: true,
        contact: target.display().to_string(),
    }))
}
