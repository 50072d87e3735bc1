use super::{BackupOutcome, BackupReport, CredentialStore, RestoreOutcome, SessionFiles, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-process store that keeps snapshots in a map and counts calls.
#[derive(Default)]
pub struct MemoryCredentialStore {
    snapshots: Mutex<HashMap<String, SessionFiles>>,
    backups: AtomicUsize,
    restores: AtomicUsize,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: &str, files: SessionFiles) {
        self.snapshots.lock().insert(session_id.to_string(), files);
    }

    pub fn get(&self, session_id: &str) -> Option<SessionFiles> {
        self.snapshots.lock().get(session_id).cloned()
    }

    pub fn backup_calls(&self) -> usize {
        self.backups.load(Ordering::SeqCst)
    }

    pub fn restore_calls(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn backup(&self, session_id: &str, files: &SessionFiles) -> BackupReport {
        self.backups.fetch_add(1, Ordering::SeqCst);
        self.insert(session_id, files.clone());
        BackupReport {
            outcome: BackupOutcome::Stored,
            attempts: 1,
            waits: Vec::new(),
        }
    }

    async fn restore(&self, session_id: &str) -> RestoreOutcome {
        self.restores.fetch_add(1, Ordering::SeqCst);
        match self.get(session_id) {
            Some(files) if !files.is_empty() => RestoreOutcome::Restored(files),
            _ => RestoreOutcome::Absent,
        }
    }

    async fn list_sessions(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.snapshots.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
