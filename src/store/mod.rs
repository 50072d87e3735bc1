//! Credential store client: backup and restore of per-session auth material
//! through an external HTTP service.
//!
//! Store failures never propagate into the session state machine. Backups
//! return a [`BackupReport`] and restores a [`RestoreOutcome`]; only the
//! startup listing returns a plain `Result`.

pub mod disabled;
pub mod http;
pub mod memory;
pub mod retry;

pub use disabled::DisabledCredentialStore;
pub use http::HttpCredentialStore;
pub use memory::MemoryCredentialStore;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Snapshot of a credential workspace: file name → file content.
pub type SessionFiles = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("credential store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("credential store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("credential store is unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Stored,
    Failed { last_error: String },
}

/// Result of one backup call, including how many attempts it took and the
/// backoff waits taken between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub outcome: BackupOutcome,
    pub attempts: u32,
    pub waits: Vec<Duration>,
}

impl BackupReport {
    pub fn is_stored(&self) -> bool {
        self.outcome == BackupOutcome::Stored
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored(SessionFiles),
    /// Nothing stored for this session. Not an error.
    Absent,
    Failed(String),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Push a snapshot. Retries internally and never returns an error.
    async fn backup(&self, session_id: &str, files: &SessionFiles) -> BackupReport;

    /// Fetch the stored snapshot, if any.
    async fn restore(&self, session_id: &str) -> RestoreOutcome;

    /// Session ids known to the store, used to reconnect at startup.
    async fn list_sessions(&self) -> Result<Vec<String>, StoreError>;
}
