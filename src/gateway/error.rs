use crate::session::SessionError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Failure response: `{"success": false, "error": ..., "session_id": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    session_id: Option<String>,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, session_id: Option<&str>) -> Self {
        Self {
            status,
            message: message.into(),
            session_id: session_id.map(str::to_string),
            retry_after_secs: None,
        }
    }

    pub fn bad_request(message: impl Into<String>, session_id: Option<&str>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, session_id)
    }

    pub fn not_found(message: impl Into<String>, session_id: Option<&str>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message, session_id)
    }

    /// Map a session failure to its HTTP status.
    pub fn from_session(err: SessionError, session_id: &str) -> Self {
        let status = match &err {
            SessionError::InvalidSessionId(_)
            | SessionError::InvalidPhone(_)
            | SessionError::NotConnected(_) => StatusCode::BAD_REQUEST,
            SessionError::Cooldown { .. } => StatusCode::TOO_MANY_REQUESTS,
            SessionError::AlreadyConnected(_) | SessionError::Superseded(_) => StatusCode::CONFLICT,
            SessionError::QrUnavailable(_) => StatusCode::NOT_FOUND,
            SessionError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::PairingTimeout
            | SessionError::PairingInterrupted
            | SessionError::Protocol(_)
            | SessionError::Workspace(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &err {
            SessionError::Workspace(e) => {
                tracing::error!(session_id, "Credential workspace failure: {e}");
                "failed to access local credentials".to_string()
            }
            other => other.to_string(),
        };
        let retry_after_secs = match &err {
            SessionError::Cooldown { remaining } => Some(remaining.as_secs_f64().ceil() as u64),
            _ => None,
        };
        Self {
            status,
            message,
            session_id: Some(session_id.to_string()),
            retry_after_secs,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.message,
            "session_id": self.session_id,
        });
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use std::time::Duration;

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn cooldown_maps_to_429_with_retry_after() {
        let err = SessionError::Cooldown {
            remaining: Duration::from_millis(4_100),
        };
        let resp = ApiError::from_session(err, "u1").into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[header::RETRY_AFTER], "5");
        let json = body_json(resp).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["session_id"], "u1");
        assert_eq!(json["error"], "wait 5 seconds before trying again");
    }

    #[tokio::test]
    async fn qr_unavailable_is_404() {
        let resp = ApiError::from_session(SessionError::QrUnavailable("u1".into()), "u1").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn workspace_errors_hide_paths() {
        let err = SessionError::Workspace(crate::session::WorkspaceError::InvalidFileName(
            "../secret".into(),
        ));
        let resp = ApiError::from_session(err, "u1").into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "failed to access local credentials");
    }

    #[tokio::test]
    async fn bad_request_without_session() {
        let resp = ApiError::bad_request("session_id is required", None).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert!(json["session_id"].is_null());
    }
}
