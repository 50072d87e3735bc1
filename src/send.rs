//! One-shot send: open a session from its local credentials, deliver a
//! single text message, close.

use crate::config::Config;
use crate::protocol::{self, ConnectMode, OpenRequest, ProtocolConnector, ProtocolEvent};
use crate::session::{recipient_jid, validate_session_id, CredentialWorkspace};
use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio::time;

/// How long to wait for the connection to open before giving up.
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run(config: &Config, session_id: &str, number: &str, text: &str) -> Result<String> {
    let connector = protocol::create_connector(&config.protocol)?;
    let workspace = CredentialWorkspace::new(
        &config.sessions.workspace_dir,
        config.sessions.workspace_prefix.clone(),
    );
    send_once(connector.as_ref(), &workspace, session_id, number, text, OPEN_TIMEOUT).await
}

/// Open `session_id` on its existing workspace, wait up to `open_timeout`
/// for the connection to open, and send `text` to `number`. Returns the
/// message id.
pub async fn send_once(
    connector: &dyn ProtocolConnector,
    workspace: &CredentialWorkspace,
    session_id: &str,
    number: &str,
    text: &str,
    open_timeout: Duration,
) -> Result<String> {
    validate_session_id(session_id)?;
    if !workspace.exists(session_id) {
        bail!(
            "No credentials for session {session_id} under {}; link the device first",
            workspace.root().display()
        );
    }
    let credentials = workspace
        .read_snapshot(session_id)
        .with_context(|| format!("Failed to read credentials for session {session_id}"))?;

    let mut connection = connector
        .open(OpenRequest {
            session_id: session_id.to_string(),
            workspace: workspace.dir(session_id),
            credentials,
            mode: ConnectMode::Qr,
        })
        .await
        .with_context(|| format!("Failed to open session {session_id}"))?;

    let opened = time::timeout(open_timeout, async {
        while let Some(event) = connection.events.recv().await {
            match event {
                ProtocolEvent::ConnectionOpened { identity } => return Ok(identity),
                ProtocolEvent::QrIssued(_) => {
                    bail!("Session {session_id} is not logged in (a QR code was issued)")
                }
                ProtocolEvent::ConnectionClosed(reason) => {
                    bail!("Connection closed before opening: {reason}")
                }
                ProtocolEvent::CredentialsChanged(files) => {
                    if let Err(e) = workspace.write_snapshot(session_id, &files) {
                        tracing::warn!(session_id, "Failed to persist credentials locally: {e}");
                    }
                }
                ProtocolEvent::Connecting => {}
            }
        }
        bail!("Event stream ended before the connection opened")
    })
    .await;

    let result = match opened {
        Ok(Ok(identity)) => {
            tracing::info!(session_id, identity = ?identity, "Connected");
            let jid = recipient_jid(number);
            connection
                .handle
                .send_message(&jid, text)
                .await
                .with_context(|| format!("Failed to send message to {jid}"))
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(anyhow::anyhow!(
            "Session {session_id} did not connect within {}s",
            open_timeout.as_secs()
        )),
    };
    connection.handle.close();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SimulatedConnector;
    use crate::store::SessionFiles;
    use tempfile::TempDir;

    fn registered_workspace(tmp: &TempDir, session_id: &str) -> CredentialWorkspace {
        let workspace = CredentialWorkspace::new(tmp.path(), "auth_info_");
        let creds = serde_json::json!({
            "registered": true,
            "me": { "id": "5561995021362@s.whatsapp.net" },
        });
        let files: SessionFiles = [("creds.json".to_string(), creds.to_string())].into();
        workspace.write_snapshot(session_id, &files).unwrap();
        workspace
    }

    #[tokio::test]
    async fn sends_through_registered_session() {
        let tmp = TempDir::new().unwrap();
        let workspace = registered_workspace(&tmp, "u1");
        let sim = SimulatedConnector::new("s.whatsapp.net");

        let id = send_once(&sim, &workspace, "u1", "61995021362", "hello", OPEN_TIMEOUT)
            .await
            .unwrap();
        assert!(id.starts_with("3EB0"));
        assert_eq!(
            sim.sent_messages("u1"),
            vec![("61995021362@s.whatsapp.net".to_string(), "hello".to_string())]
        );
        assert_eq!(sim.live_handles("u1"), 0);
    }

    #[tokio::test]
    async fn missing_workspace_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let workspace = CredentialWorkspace::new(tmp.path(), "auth_info_");
        let sim = SimulatedConnector::new("s.whatsapp.net");
        let err = send_once(&sim, &workspace, "u1", "61995021362", "hello", OPEN_TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No credentials"));
        assert_eq!(sim.opened_count(), 0);
    }

    #[tokio::test]
    async fn unregistered_session_fails_and_closes() {
        let tmp = TempDir::new().unwrap();
        let workspace = CredentialWorkspace::new(tmp.path(), "auth_info_");
        workspace.ensure("u1").unwrap();
        let sim = SimulatedConnector::new("s.whatsapp.net");
        let err = send_once(&sim, &workspace, "u1", "61995021362", "hello", OPEN_TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not logged in"));
        assert_eq!(sim.live_handles("u1"), 0);
        assert!(sim.sent_messages("u1").is_empty());
    }
}
