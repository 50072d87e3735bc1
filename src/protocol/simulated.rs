//! Deterministic in-process backend.
//!
//! Fresh workspaces get `Connecting`, an unregistered `creds.json` and, in QR
//! mode, a QR challenge. Workspaces whose `creds.json` is registered open
//! straight away. Callers can inject events, finish a login, make opens or
//! pairing requests fail, and inspect live handles.

use super::{Connection, ConnectMode, OpenRequest, ProtocolConnection, ProtocolConnector, ProtocolEvent};
use crate::store::SessionFiles;
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const CREDS_FILE: &str = "creds.json";
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingBehavior {
    #[default]
    Succeed,
    Fail,
    /// Never answer, so the caller's timeout fires.
    Hang,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedBehavior {
    /// Error message returned by `open` when set.
    pub fail_open: Option<String>,
    pub pairing: PairingBehavior,
}

pub struct SimulatedConnector {
    identity_domain: String,
    behavior: Mutex<SimulatedBehavior>,
    connections: Mutex<HashMap<String, Vec<Arc<SimulatedConnection>>>>,
    opened: AtomicUsize,
}

impl SimulatedConnector {
    pub fn new(identity_domain: impl Into<String>) -> Self {
        Self {
            identity_domain: identity_domain.into(),
            behavior: Mutex::new(SimulatedBehavior::default()),
            connections: Mutex::new(HashMap::new()),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: SimulatedBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Total successful `open` calls.
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Connections for `session_id` that have not been closed.
    pub fn live_handles(&self, session_id: &str) -> usize {
        self.connections
            .lock()
            .get(session_id)
            .map_or(0, |conns| conns.iter().filter(|c| !c.is_closed()).count())
    }

    /// Messages sent through any connection of `session_id`, as (recipient, text).
    pub fn sent_messages(&self, session_id: &str) -> Vec<(String, String)> {
        self.connections
            .lock()
            .get(session_id)
            .map(|conns| conns.iter().flat_map(|c| c.sent.lock().clone()).collect())
            .unwrap_or_default()
    }

    /// Deliver `event` on the newest live connection of `session_id`.
    /// Returns false when there is none.
    pub async fn emit(&self, session_id: &str, event: ProtocolEvent) -> bool {
        let Some(conn) = self.latest_live(session_id) else {
            return false;
        };
        let Some(tx) = conn.sender() else {
            return false;
        };
        tx.send(event).await.is_ok()
    }

    /// Simulate the user confirming the login on their phone: credentials
    /// become registered and the connection opens.
    pub async fn complete_login(&self, session_id: &str, phone: &str) -> bool {
        let identity = format!("{phone}@{}", self.identity_domain);
        let creds = registered_creds(&identity);
        self.emit(session_id, ProtocolEvent::CredentialsChanged(creds)).await
            && self
                .emit(
                    session_id,
                    ProtocolEvent::ConnectionOpened {
                        identity: Some(identity),
                    },
                )
                .await
    }

    fn latest_live(&self, session_id: &str) -> Option<Arc<SimulatedConnection>> {
        self.connections
            .lock()
            .get(session_id)
            .and_then(|conns| conns.iter().rev().find(|c| !c.is_closed()).cloned())
    }
}

#[async_trait]
impl ProtocolConnector for SimulatedConnector {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn open(&self, request: OpenRequest) -> Result<Connection> {
        let behavior = self.behavior.lock().clone();
        if let Some(message) = behavior.fail_open {
            bail!("{message}");
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let registered = registered_identity(&request.credentials);

        let mut initial = Vec::new();
        match registered {
            Some(identity) => {
                initial.push(ProtocolEvent::CredentialsChanged(request.credentials.clone()));
                initial.push(ProtocolEvent::ConnectionOpened {
                    identity: Some(identity),
                });
            }
            None => {
                initial.push(ProtocolEvent::Connecting);
                initial.push(ProtocolEvent::CredentialsChanged(fresh_creds()));
                if request.mode == ConnectMode::Qr {
                    initial.push(ProtocolEvent::QrIssued(format!(
                        "2@sim_{}",
                        uuid::Uuid::new_v4().simple()
                    )));
                }
            }
        }
        for event in initial {
            tx.try_send(event)?;
        }

        let conn = Arc::new(SimulatedConnection {
            sender: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            pairing: behavior.pairing,
            sent: Mutex::new(Vec::new()),
        });
        self.connections
            .lock()
            .entry(request.session_id.clone())
            .or_default()
            .push(Arc::clone(&conn));
        self.opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(session_id = %request.session_id, mode = ?request.mode, "Simulated connection opened");

        Ok(Connection {
            handle: conn,
            events: rx,
        })
    }
}

struct SimulatedConnection {
    sender: Mutex<Option<mpsc::Sender<ProtocolEvent>>>,
    closed: AtomicBool,
    pairing: PairingBehavior,
    sent: Mutex<Vec<(String, String)>>,
}

impl SimulatedConnection {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn sender(&self) -> Option<mpsc::Sender<ProtocolEvent>> {
        self.sender.lock().clone()
    }
}

#[async_trait]
impl ProtocolConnection for SimulatedConnection {
    async fn request_pairing_code(&self, _phone: &str) -> Result<String> {
        if self.is_closed() {
            bail!("connection closed");
        }
        match self.pairing {
            PairingBehavior::Succeed => {
                let id = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
                Ok(id[..8].to_string())
            }
            PairingBehavior::Fail => bail!("pairing rejected by server"),
            PairingBehavior::Hang => std::future::pending::<Result<String>>().await,
        }
    }

    async fn send_message(&self, recipient: &str, text: &str) -> Result<String> {
        if self.is_closed() {
            bail!("connection closed");
        }
        self.sent.lock().push((recipient.to_string(), text.to_string()));
        let id = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
        Ok(format!("3EB0{}", &id[..16]))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.sender.lock().take();
    }
}

fn fresh_creds() -> SessionFiles {
    let creds = serde_json::json!({
        "registered": false,
        "registration_id": uuid::Uuid::new_v4().as_u128() as u16,
    });
    [(CREDS_FILE.to_string(), creds.to_string())].into()
}

fn registered_creds(identity: &str) -> SessionFiles {
    let creds = serde_json::json!({
        "registered": true,
        "me": { "id": identity },
    });
    [(CREDS_FILE.to_string(), creds.to_string())].into()
}

fn registered_identity(credentials: &SessionFiles) -> Option<String> {
    let raw = credentials.get(CREDS_FILE)?;
    let creds: serde_json::Value = serde_json::from_str(raw).ok()?;
    if !creds.get("registered")?.as_bool()? {
        return None;
    }
    creds
        .pointer("/me/id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(id: &str, credentials: SessionFiles, mode: ConnectMode) -> OpenRequest {
        OpenRequest {
            session_id: id.into(),
            workspace: PathBuf::from("/tmp/unused"),
            credentials,
            mode,
        }
    }

    #[tokio::test]
    async fn fresh_qr_connection_emits_qr() {
        let sim = SimulatedConnector::new("s.whatsapp.net");
        let mut conn = sim.open(request("u1", SessionFiles::new(), ConnectMode::Qr)).await.unwrap();
        assert_eq!(conn.events.recv().await, Some(ProtocolEvent::Connecting));
        assert!(matches!(conn.events.recv().await, Some(ProtocolEvent::CredentialsChanged(_))));
        match conn.events.recv().await {
            Some(ProtocolEvent::QrIssued(qr)) => assert!(qr.starts_with("2@sim_")),
            other => panic!("expected QR, got {other:?}"),
        }
        assert_eq!(sim.live_handles("u1"), 1);
    }

    #[tokio::test]
    async fn registered_credentials_open_immediately() {
        let sim = SimulatedConnector::new("s.whatsapp.net");
        let creds = registered_creds("5561995021362@s.whatsapp.net");
        let mut conn = sim.open(request("u1", creds, ConnectMode::Qr)).await.unwrap();
        assert!(matches!(conn.events.recv().await, Some(ProtocolEvent::CredentialsChanged(_))));
        assert_eq!(
            conn.events.recv().await,
            Some(ProtocolEvent::ConnectionOpened {
                identity: Some("5561995021362@s.whatsapp.net".into())
            })
        );
    }

    #[tokio::test]
    async fn close_ends_event_stream_and_rejects_sends() {
        let sim = SimulatedConnector::new("s.whatsapp.net");
        let mut conn = sim.open(request("u1", SessionFiles::new(), ConnectMode::Pairing)).await.unwrap();
        conn.handle.close();
        conn.handle.close();
        while conn.events.recv().await.is_some() {}
        assert_eq!(sim.live_handles("u1"), 0);
        assert!(conn.handle.send_message("x@s.whatsapp.net", "hi").await.is_err());
        assert!(!sim.emit("u1", ProtocolEvent::Connecting).await);
    }

    #[tokio::test]
    async fn pairing_codes_are_eight_uppercase_chars() {
        let sim = SimulatedConnector::new("s.whatsapp.net");
        let conn = sim.open(request("u1", SessionFiles::new(), ConnectMode::Pairing)).await.unwrap();
        let code = conn.handle.request_pairing_code("5561995021362").await.unwrap();
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn failing_open_is_reported() {
        let sim = SimulatedConnector::new("s.whatsapp.net");
        sim.set_behavior(SimulatedBehavior {
            fail_open: Some("handshake refused".into()),
            ..SimulatedBehavior::default()
        });
        let err = sim.open(request("u1", SessionFiles::new(), ConnectMode::Qr)).await.err().unwrap();
        assert_eq!(err.to_string(), "handshake refused");
        assert_eq!(sim.opened_count(), 0);
    }
}
