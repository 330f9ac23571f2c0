use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Everything `POST /send` can fail with, plus how each failure reaches the
/// caller. `NotReady` and `ContactNotFound` are expected operator-facing
/// outcomes; `BadInput` and `Delivery` both surface as a generic 500 to keep
/// the response contract of the service this replaces.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Not ready")]
    NotReady,
    #[error("{0}")]
    BadInput(String),
    #[error("Contact not found")]
    ContactNotFound,
    #[error("{0}")]
    Delivery(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            RelayError::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "Not ready".to_string()),
            RelayError::ContactNotFound => {
                (StatusCode::NOT_FOUND, "Contact not found".to_string())
            }
            RelayError::BadInput(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            RelayError::Delivery(msg) => {
                tracing::error!("delivery failed: {msg}");
                // The caller is a trusted internal operator; the underlying
                // transport error text is more useful than a sanitized line.
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };
        (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn not_ready_returns_503() {
        let resp = RelayError::NotReady.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "Not ready");
    }

    #[tokio::test]
    async fn contact_not_found_returns_404() {
        let resp = RelayError::ContactNotFound.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "Contact not found");
    }

    #[tokio::test]
    async fn bad_input_returns_500() {
        let resp = RelayError::BadInput("contact and message are required".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "contact and message are required");
    }

    #[tokio::test]
    async fn delivery_error_carries_underlying_text() {
        let resp = RelayError::Delivery("invalid wid".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "invalid wid");
    }
}
