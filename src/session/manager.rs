//! Session lifecycle manager.
//!
//! Drives each session through
//! `initializing → connecting → qr_ready | pairing → connected → disconnected`,
//! with `error` reachable on local failure. Every connection gets its own
//! event pump task, so events for one session are handled in emission order
//! while sessions interleave freely. Each connection carries a generation
//! number; events from a replaced connection are dropped.

use super::error::SessionError;
use super::lock::ConnectionLocks;
use super::registry::SessionRegistry;
use super::scheduler::{TaskKey, TaskKind, TaskScheduler};
use super::types::{LiveConnection, PairingState, SessionRecord, SessionStatus, SessionView};
use super::validate::{normalize_phone, recipient_jid, validate_session_id};
use super::workspace::CredentialWorkspace;
use crate::config::SessionsConfig;
use crate::protocol::{
    Connection, ConnectMode, DisconnectKind, DisconnectReason, OpenRequest, ProtocolConnector,
    ProtocolEvent,
};
use crate::store::{BackupReport, CredentialStore, RestoreOutcome, SessionFiles, StoreError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::{self, Instant};

/// Scheduler key for the one-off startup restore sweep. `*` is never a
/// valid session id.
const STARTUP_RESTORE_KEY: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingOutcome {
    pub code: String,
    pub phone: String,
    pub expires_in: u64,
    /// Set when the code was also delivered through another connected session.
    pub auto_sent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearOutcome {
    pub existed: bool,
    pub workspace_removed: bool,
}

pub struct SessionManager {
    config: SessionsConfig,
    registry: SessionRegistry,
    locks: ConnectionLocks,
    scheduler: TaskScheduler,
    workspace: CredentialWorkspace,
    store: Arc<dyn CredentialStore>,
    connector: Arc<dyn ProtocolConnector>,
    generation: AtomicU64,
    stopping: AtomicBool,
}

impl SessionManager {
    pub fn new(
        config: SessionsConfig,
        store: Arc<dyn CredentialStore>,
        connector: Arc<dyn ProtocolConnector>,
    ) -> Arc<Self> {
        let workspace = CredentialWorkspace::new(&config.workspace_dir, config.workspace_prefix.clone());
        Arc::new(Self {
            config,
            registry: SessionRegistry::new(),
            locks: ConnectionLocks::new(),
            scheduler: TaskScheduler::new(),
            workspace,
            store,
            connector,
            generation: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SessionsConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn locks(&self) -> &ConnectionLocks {
        &self.locks
    }

    pub fn workspace(&self) -> &CredentialWorkspace {
        &self.workspace
    }

    // ── Operations ───────────────────────────────────────────────

    /// Open a QR-mode connection for `session_id`, restoring stored
    /// credentials first.
    pub async fn connect(self: &Arc<Self>, session_id: &str) -> Result<(), SessionError> {
        validate_session_id(session_id)?;
        self.start(session_id, ConnectMode::Qr, None).await.map(drop)
    }

    /// Replace the session with a fresh connection and wait for its QR code.
    pub async fn request_qr(self: &Arc<Self>, session_id: &str) -> Result<String, SessionError> {
        validate_session_id(session_id)?;
        if self.teardown(session_id) {
            time::sleep(self.config.replace_grace()).await;
        }
        self.start(session_id, ConnectMode::Qr, None).await?;
        self.wait_for_qr(session_id).await
    }

    /// Return the session's current QR code, starting the session first
    /// when it does not exist. An existing session is left untouched.
    pub async fn ensure_qr(self: &Arc<Self>, session_id: &str) -> Result<String, SessionError> {
        validate_session_id(session_id)?;
        if let Some(qr) = self.registry.with(session_id, |r| r.qr.clone()) {
            return qr.ok_or_else(|| SessionError::QrUnavailable(session_id.into()));
        }
        self.start(session_id, ConnectMode::Qr, None).await?;
        self.wait_for_qr(session_id).await
    }

    async fn wait_for_qr(&self, session_id: &str) -> Result<String, SessionError> {
        let deadline = Instant::now() + self.config.qr_wait();
        loop {
            let state = self
                .registry
                .with(session_id, |r| (r.qr.clone(), r.connected));
            match state {
                Some((Some(qr), _)) => return Ok(qr),
                Some((None, true)) => return Err(SessionError::AlreadyConnected(session_id.into())),
                None => return Err(SessionError::Superseded(session_id.into())),
                Some((None, false)) => {}
            }
            if Instant::now() >= deadline {
                tracing::warn!(session_id, "No QR code issued within {:?}", self.config.qr_wait());
                return Err(SessionError::QrUnavailable(session_id.into()));
            }
            time::sleep(self.config.qr_poll_interval()).await;
        }
    }

    /// Latest unconsumed QR payload, without touching the connection.
    pub fn current_qr(&self, session_id: &str) -> Option<String> {
        self.registry.with(session_id, |r| r.qr.clone()).flatten()
    }

    /// Start a pairing-code login for `session_id` and return the code.
    pub async fn request_pairing_code(
        self: &Arc<Self>,
        session_id: &str,
        phone: &str,
    ) -> Result<PairingOutcome, SessionError> {
        validate_session_id(session_id)?;
        let phone = normalize_phone(phone, &self.config.country_code)?;
        self.locks
            .try_acquire(session_id, self.config.pairing_cooldown())
            .map_err(|remaining| SessionError::Cooldown { remaining })?;

        tracing::info!(session_id, phone = %phone, "Pairing code requested");
        let result = self.run_pairing(session_id, &phone).await;
        self.locks.release(session_id);

        let code = result?;
        let auto_sent = self.deliver_pairing_code(session_id, &phone, &code).await;
        Ok(PairingOutcome {
            code,
            phone,
            expires_in: self.config.pairing_code_ttl_secs,
            auto_sent,
        })
    }

    /// Send a text message through a connected session. Returns the message id.
    pub async fn send_message(
        &self,
        session_id: &str,
        number: &str,
        text: &str,
    ) -> Result<String, SessionError> {
        validate_session_id(session_id)?;
        let handle = self
            .registry
            .with(session_id, |r| if r.connected { r.handle() } else { None })
            .flatten()
            .ok_or_else(|| SessionError::NotConnected(session_id.into()))?;

        let jid = recipient_jid(number);
        let message_id = handle
            .send_message(&jid, text)
            .await
            .map_err(SessionError::protocol)?;
        tracing::info!(session_id, recipient = %jid, message_id = %message_id, "Message sent");
        Ok(message_id)
    }

    /// Tear the session down and connect again after the manual delay.
    /// Returns whether a session existed.
    pub fn reconnect(self: &Arc<Self>, session_id: &str) -> Result<bool, SessionError> {
        validate_session_id(session_id)?;
        if self.stopping.load(Ordering::SeqCst) {
            return Err(SessionError::ShuttingDown);
        }
        let existed = self.teardown(session_id);
        self.schedule_reconnect(session_id, self.config.manual_reconnect_delay());
        tracing::info!(session_id, existed, "Manual reconnect scheduled");
        Ok(existed)
    }

    /// Remove the session, cancel everything scheduled for it, and delete
    /// its local credentials.
    pub fn clear(&self, session_id: &str) -> Result<ClearOutcome, SessionError> {
        validate_session_id(session_id)?;
        let existed = self.teardown(session_id);
        self.locks.release(session_id);
        let workspace_removed = match self.workspace.remove(session_id) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(session_id, "Failed to delete credential workspace: {e}");
                false
            }
        };
        tracing::info!(session_id, existed, workspace_removed, "Session cleared");
        Ok(ClearOutcome {
            existed,
            workspace_removed,
        })
    }

    pub fn status(&self, session_id: &str) -> Result<SessionView, SessionError> {
        validate_session_id(session_id)?;
        Ok(self
            .registry
            .with(session_id, SessionRecord::view)
            .unwrap_or_else(|| SessionView::not_initialized(session_id)))
    }

    pub fn list(&self) -> Vec<SessionView> {
        self.registry.list()
    }

    /// Schedule the startup sweep that reconnects every session the store knows.
    pub fn schedule_startup_restore(self: &Arc<Self>, delay: Duration, stagger: Duration) {
        let manager = Arc::clone(self);
        self.scheduler.schedule_once(
            TaskKey::new(STARTUP_RESTORE_KEY, TaskKind::Restore),
            delay,
            async move {
                match manager.restore_known_sessions(stagger).await {
                    Ok(count) => tracing::info!(count, "Startup restore scheduled"),
                    Err(e) => {
                        crate::health::mark_component_error("credential_store", &e);
                        tracing::warn!("Could not list stored sessions: {e}");
                    }
                }
            },
        );
    }

    /// Schedule a connect for every stored session not already in the
    /// registry, `stagger` apart. Returns how many were scheduled.
    pub async fn restore_known_sessions(self: &Arc<Self>, stagger: Duration) -> Result<usize, StoreError> {
        let ids = self.store.list_sessions().await?;
        let mut scheduled: u32 = 0;
        for id in ids {
            if let Err(e) = validate_session_id(&id) {
                tracing::warn!("Skipping stored session: {e}");
                continue;
            }
            if self.registry.contains(&id) {
                tracing::debug!(session_id = %id, "Already active; skipping restore");
                continue;
            }
            let manager = Arc::clone(self);
            let sid = id.clone();
            let queued = self.scheduler.schedule_once(
                TaskKey::new(&id, TaskKind::Restore),
                stagger.saturating_mul(scheduled),
                async move {
                    if manager.registry.contains(&sid) {
                        return;
                    }
                    if let Err(e) = manager.start(&sid, ConnectMode::Qr, None).await {
                        tracing::warn!(session_id = %sid, "Restore connect failed: {e}");
                    }
                },
            );
            if queued {
                scheduled += 1;
            }
        }
        Ok(scheduled as usize)
    }

    /// Back up the session's local credentials now. `None` when there was
    /// nothing to send.
    pub async fn backup_now(&self, session_id: &str) -> Option<BackupReport> {
        let files = match self.workspace.read_snapshot(session_id) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(session_id, "Cannot read credentials for backup: {e}");
                return None;
            }
        };
        if files.is_empty() {
            tracing::debug!(session_id, "No credential files to back up");
            return None;
        }
        let report = self.store.backup(session_id, &files).await;
        if !report.is_stored() {
            tracing::warn!(
                session_id,
                attempts = report.attempts,
                "Credential backup failed; continuing with local credentials only"
            );
        }
        Some(report)
    }

    /// Stop scheduling and close every session.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scheduler.stop();
        let closed = self.registry.clear();
        tracing::info!(closed, "Session manager stopped");
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Create a fresh record and open a connection for it. Returns the
    /// generation of the new connection.
    ///
    /// Nothing is awaited after the record receives its connection, so a
    /// task aborted mid-start never leaves a half-attached session.
    async fn start(
        self: &Arc<Self>,
        session_id: &str,
        mode: ConnectMode,
        pairing: Option<PairingState>,
    ) -> Result<u64, SessionError> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(SessionError::ShuttingDown);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut record = SessionRecord::new(session_id, generation, mode);
        record.set_status(SessionStatus::Initializing);
        record.pairing = pairing;
        self.registry.insert(record);
        tracing::info!(session_id, generation, ?mode, "Starting session");

        if let Err(e) = self.workspace.ensure(session_id) {
            self.registry
                .update_current(session_id, generation, |r| r.fail(&e));
            return Err(e.into());
        }
        self.registry.update_current(session_id, generation, |r| {
            r.set_status(SessionStatus::Connecting);
        });

        if mode == ConnectMode::Qr {
            self.restore_credentials(session_id).await;
        }
        if !self.registry.is_current(session_id, generation) {
            return Err(SessionError::Superseded(session_id.into()));
        }

        let credentials = match self.workspace.read_snapshot(session_id) {
            Ok(files) => files,
            Err(e) => {
                self.registry
                    .update_current(session_id, generation, |r| r.fail(&e));
                return Err(e.into());
            }
        };
        let request = OpenRequest {
            session_id: session_id.to_string(),
            workspace: self.workspace.dir(session_id),
            credentials,
            mode,
        };
        let Connection { handle, events } = match self.connector.open(request).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!(session_id, "Failed to open connection: {e:#}");
                crate::health::mark_component_error("sessions", format!("{session_id}: {e}"));
                let err = SessionError::protocol(&e);
                self.registry
                    .update_current(session_id, generation, |r| r.fail(&err));
                return Err(err);
            }
        };

        let mut live = LiveConnection::new(handle);
        let attached = self.registry.update_current(session_id, generation, |r| {
            live.pump = Some(self.spawn_event_pump(session_id, generation, events));
            r.connection = Some(live);
        });
        if attached.is_none() {
            return Err(SessionError::Superseded(session_id.into()));
        }
        crate::health::mark_component_ok("sessions");
        Ok(generation)
    }

    async fn restore_credentials(&self, session_id: &str) {
        match self.store.restore(session_id).await {
            RestoreOutcome::Restored(files) => match self.workspace.write_snapshot(session_id, &files) {
                Ok(()) => tracing::info!(session_id, files = files.len(), "Restored credentials into workspace"),
                Err(e) => tracing::warn!(session_id, "Failed to write restored credentials: {e}"),
            },
            RestoreOutcome::Absent => tracing::debug!(session_id, "No stored credentials to restore"),
            RestoreOutcome::Failed(e) => {
                tracing::warn!(session_id, "Credential restore failed, using local workspace: {e}");
            }
        }
    }

    /// Close the session's connection, cancel its pending tasks, and drop the
    /// record. Returns whether a record existed.
    fn teardown(&self, session_id: &str) -> bool {
        let cancelled = self.scheduler.cancel_session(session_id);
        let existed = self.registry.remove(session_id);
        if existed || cancelled > 0 {
            tracing::debug!(session_id, cancelled, "Session torn down");
        }
        existed
    }

    async fn run_pairing(self: &Arc<Self>, session_id: &str, phone: &str) -> Result<String, SessionError> {
        match self.registry.with(session_id, |r| r.connected) {
            Some(true) => return Err(SessionError::AlreadyConnected(session_id.into())),
            Some(false) => {
                self.teardown(session_id);
                time::sleep(self.config.replace_grace()).await;
            }
            None => {
                self.scheduler.cancel_session(session_id);
            }
        }
        time::sleep(self.config.pairing_settle()).await;

        let (tx, rx) = oneshot::channel();
        let state = PairingState::new(phone.to_string(), tx);
        let generation = self.start(session_id, ConnectMode::Pairing, Some(state)).await?;

        let outcome = match time::timeout(self.config.pairing_timeout(), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::PairingInterrupted),
            Err(_) => Err(SessionError::PairingTimeout),
        };

        if let Err(e) = &outcome {
            if !matches!(e, SessionError::AlreadyConnected(_)) {
                tracing::warn!(session_id, "Pairing failed: {e}");
                self.scheduler
                    .cancel(&TaskKey::new(session_id, TaskKind::PairingRequest));
                self.registry.update_current(session_id, generation, |r| {
                    r.pairing = None;
                    r.fail(e);
                });
            }
        }
        outcome
    }

    async fn deliver_pairing_code(&self, session_id: &str, phone: &str, code: &str) -> Option<String> {
        let (via, handle) = self
            .registry
            .find_connected_except(session_id, |r| (r.id.clone(), r.handle()))?;
        let handle = handle?;
        let text = format!(
            "Your WhatsApp pairing code: {code}\n\n\
             Enter it under Settings > Linked devices > Link a device.\n\n\
             Valid for {} minutes.",
            self.config.pairing_code_ttl_secs / 60
        );
        match handle.send_message(&recipient_jid(phone), &text).await {
            Ok(_) => {
                tracing::info!(session_id, via = %via, "Pairing code delivered over WhatsApp");
                Some(format!("Pairing code sent to {phone} via session {via}"))
            }
            Err(e) => {
                tracing::warn!(session_id, via = %via, "Could not deliver pairing code: {e}");
                None
            }
        }
    }

    // ── Events ───────────────────────────────────────────────────

    fn spawn_event_pump(
        self: &Arc<Self>,
        session_id: &str,
        generation: u64,
        mut events: mpsc::Receiver<ProtocolEvent>,
    ) -> AbortHandle {
        let manager = Arc::clone(self);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                manager.handle_event(&session_id, generation, event);
            }
            tracing::debug!(session_id = %session_id, generation, "Event stream ended");
        })
        .abort_handle()
    }

    fn handle_event(self: &Arc<Self>, session_id: &str, generation: u64, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Connecting => self.on_connecting(session_id, generation),
            ProtocolEvent::CredentialsChanged(files) => {
                self.on_credentials_changed(session_id, generation, &files);
            }
            ProtocolEvent::QrIssued(qr) => {
                let applied = self.registry.update_current(session_id, generation, |r| {
                    if r.pairing.is_none() {
                        r.set_qr(qr);
                    }
                });
                if applied.is_some() {
                    tracing::info!(session_id, "QR code issued");
                }
            }
            ProtocolEvent::ConnectionOpened { identity } => self.on_open(session_id, generation, identity),
            ProtocolEvent::ConnectionClosed(reason) => self.on_close(session_id, generation, &reason),
        }
    }

    fn on_connecting(self: &Arc<Self>, session_id: &str, generation: u64) {
        let phone = self
            .registry
            .update_current(session_id, generation, |r| {
                let phone = r
                    .pairing
                    .as_mut()
                    .filter(|p| !p.requested)
                    .map(|p| {
                        p.requested = true;
                        p.phone.clone()
                    });
                if phone.is_some() {
                    r.set_status(SessionStatus::Pairing);
                } else if r.pairing.is_none() && r.status != SessionStatus::QrReady {
                    r.set_status(SessionStatus::Connecting);
                }
                phone
            })
            .flatten();

        let Some(phone) = phone else { return };
        let manager = Arc::clone(self);
        let sid = session_id.to_string();
        self.scheduler.schedule_once(
            TaskKey::new(session_id, TaskKind::PairingRequest),
            self.config.pairing_request_delay(),
            async move {
                manager.issue_pairing_code(&sid, generation, &phone).await;
            },
        );
    }

    async fn issue_pairing_code(&self, session_id: &str, generation: u64, phone: &str) {
        let Some(handle) = self
            .registry
            .update_current(session_id, generation, |r| r.handle())
            .flatten()
        else {
            return;
        };
        tracing::info!(session_id, phone, "Requesting pairing code");
        let result = handle
            .request_pairing_code(phone)
            .await
            .map_err(SessionError::protocol);
        match &result {
            Ok(_) => tracing::info!(session_id, "Pairing code generated"),
            Err(e) => tracing::warn!(session_id, "Pairing code request failed: {e}"),
        }
        self.registry.update_current(session_id, generation, move |r| {
            if let Some(pairing) = r.pairing.as_mut() {
                pairing.resolve(result);
            }
        });
    }

    fn on_credentials_changed(self: &Arc<Self>, session_id: &str, generation: u64, files: &SessionFiles) {
        if !self.registry.is_current(session_id, generation) {
            return;
        }
        if let Err(e) = self.workspace.write_snapshot(session_id, files) {
            tracing::warn!(session_id, "Failed to persist credentials locally: {e}");
        }

        let throttle = self.config.backup_throttle();
        let due = self
            .registry
            .update_current(session_id, generation, |r| {
                let now = Instant::now();
                let due = r
                    .last_backup_at
                    .is_none_or(|last| now.duration_since(last) > throttle);
                if due {
                    r.last_backup_at = Some(now);
                }
                due
            })
            .unwrap_or(false);

        if due {
            self.schedule_backup(session_id, TaskKind::CredentialBackup, Duration::ZERO);
        } else {
            tracing::debug!(session_id, "Credential backup throttled");
        }
    }

    fn on_open(self: &Arc<Self>, session_id: &str, generation: u64, identity: Option<String>) {
        let manager = Arc::clone(self);
        let sid = session_id.to_string();
        let timer = self
            .scheduler
            .spawn_interval(self.config.periodic_backup(), move || {
                let manager = Arc::clone(&manager);
                let sid = sid.clone();
                async move {
                    manager.backup_now(&sid).await;
                }
            });

        let opened = self.registry.update_current(session_id, generation, |r| {
            if let Some(mut pairing) = r.pairing.take() {
                if !pairing.code_issued {
                    pairing.resolve(Err(SessionError::AlreadyConnected(session_id.into())));
                }
            }
            if identity.is_some() {
                r.identity = identity;
            }
            r.last_error = None;
            r.set_status(SessionStatus::Connected);
            r.backup_timer = Some(timer);
        });
        if opened.is_none() {
            return;
        }

        tracing::info!(session_id, "Session connected");
        crate::health::mark_component_ok("sessions");
        self.schedule_backup(
            session_id,
            TaskKind::PostConnectBackup,
            self.config.post_connect_backup(),
        );
    }

    fn on_close(self: &Arc<Self>, session_id: &str, generation: u64, reason: &DisconnectReason) {
        let reconnect = self.registry.update_current(session_id, generation, |r| {
            r.connection = None;
            r.last_error = Some(reason.to_string());
            r.set_status(SessionStatus::Disconnected);
            match r.pairing.take() {
                Some(mut pairing) if !pairing.code_issued => {
                    pairing.resolve(Err(SessionError::PairingInterrupted));
                    false
                }
                _ => true,
            }
        });

        match reconnect {
            None => {}
            Some(false) => {
                tracing::info!(session_id, reason = %reason, "Connection closed during pairing; not reconnecting");
            }
            Some(true) => match reason.classify() {
                DisconnectKind::LoggedOut => {
                    tracing::info!(session_id, reason = %reason, "Session logged out; not reconnecting");
                }
                DisconnectKind::Conflict => {
                    let delay = self.config.conflict_reconnect_delay();
                    tracing::warn!(session_id, reason = %reason, ?delay, "Session conflict; reconnecting after cooldown");
                    self.schedule_reconnect(session_id, delay);
                }
                DisconnectKind::Transient => {
                    let delay = self.config.reconnect_delay();
                    tracing::info!(session_id, reason = %reason, ?delay, "Connection closed; reconnecting");
                    self.schedule_reconnect(session_id, delay);
                }
            },
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, session_id: &str, delay: Duration) {
        let manager = Arc::clone(self);
        let sid = session_id.to_string();
        self.scheduler.schedule_once(
            TaskKey::new(session_id, TaskKind::Reconnect),
            delay,
            async move {
                if let Err(e) = manager.start(&sid, ConnectMode::Qr, None).await {
                    tracing::warn!(session_id = %sid, "Reconnect failed: {e}");
                }
            },
        );
    }

    fn schedule_backup(self: &Arc<Self>, session_id: &str, kind: TaskKind, delay: Duration) {
        let manager = Arc::clone(self);
        let sid = session_id.to_string();
        self.scheduler.schedule_once(TaskKey::new(session_id, kind), delay, async move {
            manager.backup_now(&sid).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SimulatedConnector;
    use crate::store::MemoryCredentialStore;
    use tempfile::TempDir;

    fn manager(tmp: &TempDir) -> (Arc<SessionManager>, Arc<SimulatedConnector>) {
        let config = SessionsConfig {
            workspace_dir: tmp.path().to_path_buf(),
            ..SessionsConfig::default()
        };
        let connector = Arc::new(SimulatedConnector::new("s.whatsapp.net"));
        let manager = SessionManager::new(
            config,
            Arc::new(MemoryCredentialStore::new()),
            connector.clone(),
        );
        (manager, connector)
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_ids_are_rejected_before_connecting() {
        let tmp = TempDir::new().unwrap();
        let (manager, connector) = manager(&tmp);
        let err = manager.request_qr("../etc").await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(connector.opened_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_phone_does_not_take_the_lock() {
        let tmp = TempDir::new().unwrap();
        let (manager, connector) = manager(&tmp);
        let err = manager.request_pairing_code("u1", "12345").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidPhone(_)));
        assert!(!manager.locks().is_held("u1"));
        assert_eq!(connector.opened_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn status_of_unknown_session() {
        let tmp = TempDir::new().unwrap();
        let (manager, _) = manager(&tmp);
        assert_eq!(manager.status("ghost").unwrap().status, "not_initialized");
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_connected_session() {
        let tmp = TempDir::new().unwrap();
        let (manager, _) = manager(&tmp);
        let err = manager.send_message("u1", "5561995021362", "hi").await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_refuses_new_connections() {
        let tmp = TempDir::new().unwrap();
        let (manager, _) = manager(&tmp);
        manager.shutdown();
        assert!(matches!(
            manager.connect("u1").await.unwrap_err(),
            SessionError::ShuttingDown
        ));
        assert!(matches!(manager.reconnect("u1").unwrap_err(), SessionError::ShuttingDown));
    }
}
