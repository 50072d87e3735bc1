//! Session record and its serializable view.

use super::error::SessionError;
use super::scheduler::ScheduledTask;
use crate::protocol::{ConnectMode, ProtocolConnection};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Uninitialized,
    Initializing,
    Connecting,
    QrReady,
    Pairing,
    Connected,
    Disconnected,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Connecting => "connecting",
            Self::QrReady => "qr_ready",
            Self::Pairing => "pairing",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live protocol connection plus the task pumping its events.
/// Dropping it closes the connection and stops the pump.
pub(crate) struct LiveConnection {
    pub handle: Arc<dyn ProtocolConnection>,
    pub pump: Option<AbortHandle>,
}

impl LiveConnection {
    pub fn new(handle: Arc<dyn ProtocolConnection>) -> Self {
        Self { handle, pump: None }
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// In-flight pairing-code request for a session.
pub(crate) struct PairingState {
    pub phone: String,
    pub requested: bool,
    pub code_issued: bool,
    pub reply: Option<oneshot::Sender<Result<String, SessionError>>>,
}

impl PairingState {
    pub fn new(phone: String, reply: oneshot::Sender<Result<String, SessionError>>) -> Self {
        Self {
            phone,
            requested: false,
            code_issued: false,
            reply: Some(reply),
        }
    }

    /// Deliver the outcome to the waiting caller, once.
    pub fn resolve(&mut self, result: Result<String, SessionError>) {
        if result.is_ok() {
            self.code_issued = true;
        }
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(result);
        }
    }
}

/// In-memory state of one session. Owned by the registry; dropping it
/// releases the connection and stops the backup timer.
pub struct SessionRecord {
    pub(crate) id: String,
    pub(crate) generation: u64,
    pub(crate) mode: ConnectMode,
    pub(crate) status: SessionStatus,
    pub(crate) connected: bool,
    pub(crate) qr: Option<String>,
    pub(crate) identity: Option<String>,
    pub(crate) last_error: Option<String>,
    pub(crate) last_backup_at: Option<Instant>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) connection: Option<LiveConnection>,
    pub(crate) backup_timer: Option<ScheduledTask>,
    pub(crate) pairing: Option<PairingState>,
}

impl SessionRecord {
    pub(crate) fn new(id: impl Into<String>, generation: u64, mode: ConnectMode) -> Self {
        Self {
            id: id.into(),
            generation,
            mode,
            status: SessionStatus::Uninitialized,
            connected: false,
            qr: None,
            identity: None,
            last_error: None,
            last_backup_at: None,
            updated_at: Utc::now(),
            connection: None,
            backup_timer: None,
            pairing: None,
        }
    }

    /// Move to `status`, keeping the cached flags consistent: the backup
    /// timer only lives while connected and a QR only while `qr_ready`.
    pub(crate) fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.connected = status == SessionStatus::Connected;
        if !self.connected {
            self.backup_timer = None;
        }
        if status != SessionStatus::QrReady {
            self.qr = None;
        }
        self.updated_at = Utc::now();
    }

    pub(crate) fn set_qr(&mut self, qr: String) {
        self.set_status(SessionStatus::QrReady);
        self.qr = Some(qr);
    }

    pub(crate) fn fail(&mut self, error: impl ToString) {
        self.connection = None;
        self.last_error = Some(error.to_string());
        self.set_status(SessionStatus::Error);
    }

    pub(crate) fn handle(&self) -> Option<Arc<dyn ProtocolConnection>> {
        self.connection.as_ref().map(|c| Arc::clone(&c.handle))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn qr(&self) -> Option<&str> {
        self.qr.as_deref()
    }

    pub fn has_backup_timer(&self) -> bool {
        self.backup_timer.is_some()
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.id.clone(),
            status: self.status.as_str().to_string(),
            connected: self.connected,
            qr_available: self.qr.is_some(),
            phone_number: self
                .identity
                .as_deref()
                .map(|jid| jid.split(['@', ':']).next().unwrap_or(jid).to_string()),
            last_error: self.last_error.clone(),
            last_seen: self.updated_at.to_rfc3339(),
        }
    }
}

/// Read-only snapshot of a session for API consumers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionView {
    pub session_id: String,
    pub status: String,
    pub connected: bool,
    pub qr_available: bool,
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub last_seen: String,
}

impl SessionView {
    /// View for an id the registry does not hold.
    pub fn not_initialized(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            status: "not_initialized".into(),
            connected: false,
            qr_available: false,
            phone_number: None,
            last_error: None,
            last_seen: Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(SessionStatus::QrReady).unwrap(),
            serde_json::json!("qr_ready")
        );
        assert_eq!(SessionStatus::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn qr_is_cleared_when_leaving_qr_ready() {
        let mut record = SessionRecord::new("u1", 1, ConnectMode::Qr);
        record.set_qr("2@abc".into());
        assert_eq!(record.status(), SessionStatus::QrReady);
        assert_eq!(record.qr(), Some("2@abc"));

        record.set_status(SessionStatus::Connected);
        assert!(record.qr().is_none());
        assert!(record.is_connected());

        record.set_status(SessionStatus::Disconnected);
        assert!(!record.is_connected());
    }

    #[test]
    fn view_extracts_phone_from_identity() {
        let mut record = SessionRecord::new("u1", 1, ConnectMode::Qr);
        record.identity = Some("5561995021362:7@s.whatsapp.net".into());
        record.set_status(SessionStatus::Connected);
        let view = record.view();
        assert_eq!(view.phone_number.as_deref(), Some("5561995021362"));
        assert_eq!(view.status, "connected");
        assert!(!view.qr_available);
    }

    #[test]
    fn pairing_state_resolves_once() {
        let (tx, mut rx) = oneshot::channel();
        let mut state = PairingState::new("5561995021362".into(), tx);
        state.resolve(Ok("ABCD1234".into()));
        state.resolve(Err(SessionError::PairingTimeout));
        assert!(state.code_issued);
        assert_eq!(rx.try_recv().unwrap().unwrap(), "ABCD1234");
    }

    #[test]
    fn unknown_session_view() {
        let view = SessionView::not_initialized("ghost");
        assert_eq!(view.status, "not_initialized");
        assert!(!view.connected);
    }
}
