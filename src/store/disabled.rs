use super::{BackupOutcome, BackupReport, CredentialStore, RestoreOutcome, SessionFiles, StoreError};
use async_trait::async_trait;

/// Store used when `store.enabled = false`.
///
/// Nothing is kept anywhere but the local workspace: restores are always
/// absent, so a reconnect never overwrites newer local credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCredentialStore;

#[async_trait]
impl CredentialStore for DisabledCredentialStore {
    async fn backup(&self, _session_id: &str, _files: &SessionFiles) -> BackupReport {
        BackupReport {
            outcome: BackupOutcome::Stored,
            attempts: 0,
            waits: Vec::new(),
        }
    }

    async fn restore(&self, _session_id: &str) -> RestoreOutcome {
        RestoreOutcome::Absent
    }

    async fn list_sessions(&self) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keeps_nothing() {
        let store = DisabledCredentialStore;
        let files: SessionFiles = [("creds.json".to_string(), "{}".to_string())].into();
        let report = store.backup("u1", &files).await;
        assert!(report.is_stored());
        assert_eq!(report.attempts, 0);
        assert_eq!(store.restore("u1").await, RestoreOutcome::Absent);
        assert!(store.list_sessions().await.unwrap().is_empty());
    }
}
