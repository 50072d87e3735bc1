use super::{ApiError, SharedState};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

const QR_INSTRUCTIONS: &str =
    "Open WhatsApp > Settings > Linked devices > Link a device and scan the code";
const PAIRING_INSTRUCTIONS: &str =
    "Enter this code in WhatsApp: Settings > Linked devices > Link a device > Link with phone number";

type ApiResult = Result<Json<Value>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "sessionId", alias = "session_id")]
    session_id: Option<String>,
}

impl SessionQuery {
    fn require(self) -> Result<String, ApiError> {
        self.session_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                ApiError::bad_request(
                    "sessionId query parameter is required (?sessionId=user_123)",
                    None,
                )
            })
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    number: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// GET /health
pub async fn health(State(state): State<SharedState>) -> Json<Value> {
    let registry = state.manager.registry();
    Json(json!({
        "status": "ok",
        "sessions": {
            "total": registry.len(),
            "connected": registry.connected_count(),
        },
        "runtime": crate::health::snapshot_json(),
    }))
}

/// GET /status/{session_id}
pub async fn status(State(state): State<SharedState>, Path(session_id): Path<String>) -> ApiResult {
    let view = state
        .manager
        .status(&session_id)
        .map_err(|e| ApiError::from_session(e, &session_id))?;
    Ok(Json(json!({
        "connected": view.connected,
        "status": view.status,
        "session": view.phone_number,
        "qr_available": view.qr_available,
        "timestamp": timestamp(),
        "session_id": session_id,
    })))
}

/// GET /status?sessionId=
pub async fn status_query(state: State<SharedState>, Query(query): Query<SessionQuery>) -> ApiResult {
    let session_id = query.require()?;
    status(state, Path(session_id)).await
}

/// GET /qr/{session_id}: always starts a fresh connection.
pub async fn qr(State(state): State<SharedState>, Path(session_id): Path<String>) -> ApiResult {
    tracing::info!(session_id = %session_id, "QR requested");
    let qr = state
        .manager
        .request_qr(&session_id)
        .await
        .map_err(|e| ApiError::from_session(e, &session_id))?;
    Ok(qr_body(&session_id, &qr))
}

/// GET /qr?sessionId=: reuses an existing session's QR.
pub async fn qr_query(State(state): State<SharedState>, Query(query): Query<SessionQuery>) -> ApiResult {
    let session_id = query.require()?;
    let qr = state
        .manager
        .ensure_qr(&session_id)
        .await
        .map_err(|e| ApiError::from_session(e, &session_id))?;
    Ok(qr_body(&session_id, &qr))
}

fn qr_body(session_id: &str, qr: &str) -> Json<Value> {
    Json(json!({
        "success": true,
        "qr": qr,
        "instructions": QR_INSTRUCTIONS,
        "session_id": session_id,
    }))
}

/// GET /pairing-code/{session_id}/{phone}
pub async fn pairing_code(
    State(state): State<SharedState>,
    Path((session_id, phone)): Path<(String, String)>,
) -> ApiResult {
    let outcome = state
        .manager
        .request_pairing_code(&session_id, &phone)
        .await
        .map_err(|e| ApiError::from_session(e, &session_id))?;
    Ok(Json(json!({
        "success": true,
        "pairing_code": outcome.code,
        "phone_number": outcome.phone,
        "formatted_number": outcome.phone,
        "session_id": session_id,
        "expires_in": outcome.expires_in,
        "instructions": PAIRING_INSTRUCTIONS,
        "timestamp": timestamp(),
        "auto_sent": outcome.auto_sent.unwrap_or_default(),
    })))
}

/// POST /send-message
pub async fn send_message(
    State(state): State<SharedState>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) =
        body.map_err(|e| ApiError::bad_request(format!("invalid request body: {e}"), None))?;
    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("session_id is required", None))?;
    let (Some(number), Some(message)) = (
        request.number.filter(|n| !n.trim().is_empty()),
        request.message.filter(|m| !m.is_empty()),
    ) else {
        return Err(ApiError::bad_request(
            "number and message are required",
            Some(&session_id),
        ));
    };

    let message_id = state
        .manager
        .send_message(&session_id, &number, &message)
        .await
        .map_err(|e| ApiError::from_session(e, &session_id))?;
    Ok(Json(json!({
        "success": true,
        "messageId": message_id,
        "timestamp": timestamp(),
        "session_id": session_id,
    })))
}

/// POST /reconnect/{session_id}
pub async fn reconnect(State(state): State<SharedState>, Path(session_id): Path<String>) -> ApiResult {
    state
        .manager
        .reconnect(&session_id)
        .map_err(|e| ApiError::from_session(e, &session_id))?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Reconnect started for session {session_id}"),
        "session_id": session_id,
    })))
}

/// POST /clear-session/{session_id}
pub async fn clear_session(State(state): State<SharedState>, Path(session_id): Path<String>) -> ApiResult {
    let outcome = state
        .manager
        .clear(&session_id)
        .map_err(|e| ApiError::from_session(e, &session_id))?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Session {session_id} cleared"),
        "existed": outcome.existed,
        "workspace_removed": outcome.workspace_removed,
        "session_id": session_id,
    })))
}

/// GET /sessions
pub async fn list_sessions(State(state): State<SharedState>) -> Json<Value> {
    let sessions = state.manager.list();
    Json(json!({
        "success": true,
        "total_sessions": sessions.len(),
        "sessions": sessions,
        "timestamp": timestamp(),
    }))
}

/// GET /qr-quick/{session_id}: demo only.
pub async fn qr_quick(State(state): State<SharedState>, Path(session_id): Path<String>) -> ApiResult {
    require_demo(&state, &session_id)?;
    crate::session::validate_session_id(&session_id).map_err(|e| ApiError::from_session(e, &session_id))?;

    if let Some(qr) = state.manager.current_qr(&session_id) {
        return Ok(Json(json!({
            "success": true,
            "qr": qr,
            "instructions": QR_INSTRUCTIONS,
            "session_id": session_id,
            "method": "existing",
        })));
    }
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    let demo = format!("2@demo_{}_{}", Utc::now().timestamp_millis(), &nonce[..8]);
    tracing::info!(session_id = %session_id, "Synthetic demo QR generated");
    Ok(Json(json!({
        "success": true,
        "qr": demo,
        "instructions": "Demo QR code, for testing only",
        "session_id": session_id,
        "method": "quick_demo",
    })))
}

/// GET /quick-pairing-code/{session_id}/{phone}: demo only.
pub async fn quick_pairing_code(
    State(state): State<SharedState>,
    Path((session_id, phone)): Path<(String, String)>,
) -> ApiResult {
    require_demo(&state, &session_id)?;
    crate::session::validate_session_id(&session_id).map_err(|e| ApiError::from_session(e, &session_id))?;
    let formatted = crate::session::normalize_phone(&phone, &state.manager.config().country_code)
        .map_err(|e| ApiError::from_session(e, &session_id))?;
    let code = uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    tracing::info!(session_id = %session_id, "Synthetic demo pairing code generated");
    Ok(Json(json!({
        "success": true,
        "pairing_code": code,
        "phone_number": phone,
        "formatted_number": formatted,
        "session_id": session_id,
        "expires_in": state.manager.config().pairing_code_ttl_secs,
        "instructions": "Locally generated demo code, for testing only",
        "timestamp": timestamp(),
        "method": "quick_generation",
    })))
}

fn require_demo(state: &SharedState, session_id: &str) -> Result<(), ApiError> {
    if state.demo_endpoints {
        Ok(())
    } else {
        Err(ApiError::not_found("demo endpoints are disabled", Some(session_id)))
    }
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("no such endpoint", None)
}
