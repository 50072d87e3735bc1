//! Messaging protocol collaborator.
//!
//! The wire protocol lives outside this crate. A [`ProtocolConnector`] opens
//! connections; each [`Connection`] carries a handle for commands and a
//! receiver of [`ProtocolEvent`]s in the order the backend emits them.

pub mod simulated;

pub use simulated::{PairingBehavior, SimulatedBehavior, SimulatedConnector};

use crate::config::ProtocolConfig;
use crate::store::SessionFiles;
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Close code the server uses when the device was logged out.
pub const LOGGED_OUT: u16 = 401;
/// Close code for a corrupted or rejected session.
pub const BAD_SESSION: u16 = 500;
/// Close code asking the client to restart the connection.
pub const RESTART_REQUIRED: u16 = 515;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Authenticate by scanning a QR challenge.
    Qr,
    /// Authenticate with a pairing code typed on the phone.
    Pairing,
}

#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub session_id: String,
    pub workspace: PathBuf,
    pub credentials: SessionFiles,
    pub mode: ConnectMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// Handshake started; pairing codes may be requested from here on.
    Connecting,
    /// Local auth material changed. Carries the complete new snapshot.
    CredentialsChanged(SessionFiles),
    QrIssued(String),
    ConnectionOpened { identity: Option<String> },
    ConnectionClosed(DisconnectReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DisconnectReason {
    pub status_code: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// The device was unlinked. Never reconnect.
    LoggedOut,
    /// Server-side session conflict. Reconnect after the long cooldown.
    Conflict,
    /// Anything else. Reconnect after the standard delay.
    Transient,
}

impl DisconnectReason {
    pub fn new(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    pub fn classify(&self) -> DisconnectKind {
        match self.status_code {
            Some(LOGGED_OUT) => DisconnectKind::LoggedOut,
            Some(BAD_SESSION | RESTART_REQUIRED) => DisconnectKind::Conflict,
            _ if self.message.contains("device_removed") || self.message.contains("conflict") => {
                DisconnectKind::Conflict
            }
            _ => DisconnectKind::Transient,
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{code} {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Command side of a live connection.
#[async_trait]
pub trait ProtocolConnection: Send + Sync {
    async fn request_pairing_code(&self, phone: &str) -> Result<String>;

    /// Send a text message. Returns the message id assigned by the backend.
    async fn send_message(&self, recipient: &str, text: &str) -> Result<String>;

    /// Terminate the connection. Idempotent.
    fn close(&self);
}

pub struct Connection {
    pub handle: Arc<dyn ProtocolConnection>,
    pub events: mpsc::Receiver<ProtocolEvent>,
}

#[async_trait]
pub trait ProtocolConnector: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self, request: OpenRequest) -> Result<Connection>;
}

/// Build the connector named by `config.backend`.
pub fn create_connector(config: &ProtocolConfig) -> Result<Arc<dyn ProtocolConnector>> {
    match config.backend.as_str() {
        "simulated" | "sim" => Ok(Arc::new(SimulatedConnector::new(
            config.identity_domain.clone(),
        ))),
        other => anyhow::bail!("Unknown protocol backend: {other}. Supported: simulated"),
    }
}
