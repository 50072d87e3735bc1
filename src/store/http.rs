use super::{
    BackupOutcome, BackupReport, CredentialStore, RestoreOutcome, RetryPolicy, SessionFiles,
    StoreError,
};
use crate::config::StoreConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct BackupRequest<'a> {
    session_id: &'a str,
    session_data: &'a SessionFiles,
}

#[derive(Deserialize)]
struct RestoreResponse {
    #[serde(default)]
    session_data: Option<SessionFiles>,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    sessions: Vec<ListedSession>,
}

#[derive(Deserialize)]
struct ListedSession {
    session_id: String,
}

/// Client for the backup service (`POST /session/backup`,
/// `GET /session/restore`, `GET /session/list`).
pub struct HttpCredentialStore {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    backup_policy: RetryPolicy,
    restore_policy: RetryPolicy,
}

impl HttpCredentialStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(10),
            backup_policy: RetryPolicy::backup_default(),
            restore_policy: RetryPolicy::restore_default(),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.base_url.clone())
            .with_request_timeout(Duration::from_millis(config.request_timeout_ms))
            .with_backup_policy(RetryPolicy::new(
                config.backup_attempts,
                Duration::from_millis(config.backup_backoff_ms),
            ))
            .with_restore_policy(RetryPolicy::new(
                config.restore_attempts,
                Duration::from_millis(config.restore_backoff_ms),
            ))
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_backup_policy(mut self, policy: RetryPolicy) -> Self {
        self.backup_policy = policy;
        self
    }

    pub fn with_restore_policy(mut self, policy: RetryPolicy) -> Self {
        self.restore_policy = policy;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn backup_once(&self, session_id: &str, files: &SessionFiles) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.url("/session/backup"))
            .timeout(self.request_timeout)
            .json(&BackupRequest {
                session_id,
                session_data: files,
            })
            .send()
            .await?;
        ensure_success(response).await.map(drop)
    }

    /// `Ok(None)` means the store has nothing for this session.
    async fn restore_once(&self, session_id: &str) -> Result<Option<SessionFiles>, StoreError> {
        let response = self
            .client
            .get(self.url("/session/restore"))
            .query(&[("session_id", session_id)])
            .timeout(self.request_timeout)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: RestoreResponse = ensure_success(response).await?.json().await?;
        Ok(body.session_data.filter(|files| !files.is_empty()))
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body: truncate(&body, 200),
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[async_trait]
impl CredentialStore for HttpCredentialStore {
    async fn backup(&self, session_id: &str, files: &SessionFiles) -> BackupReport {
        let mut waits = Vec::new();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.backup_once(session_id, files).await {
                Ok(()) => {
                    tracing::info!(session_id, attempt, files = files.len(), "Credentials backed up");
                    crate::health::mark_component_ok("credential_store");
                    return BackupReport {
                        outcome: BackupOutcome::Stored,
                        attempts: attempt,
                        waits,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        session_id,
                        attempt,
                        max_attempts = self.backup_policy.attempts,
                        "Credential backup failed: {e}"
                    );
                    match self.backup_policy.delay_after(attempt) {
                        Some(delay) => {
                            waits.push(delay);
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!(session_id, "Giving up on credential backup after {attempt} attempts");
                            crate::health::mark_component_error("credential_store", &e);
                            return BackupReport {
                                outcome: BackupOutcome::Failed {
                                    last_error: e.to_string(),
                                },
                                attempts: attempt,
                                waits,
                            };
                        }
                    }
                }
            }
        }
    }

    async fn restore(&self, session_id: &str) -> RestoreOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.restore_once(session_id).await {
                Ok(Some(files)) => {
                    tracing::info!(session_id, attempt, files = files.len(), "Credentials restored from store");
                    crate::health::mark_component_ok("credential_store");
                    return RestoreOutcome::Restored(files);
                }
                Ok(None) => {
                    tracing::info!(session_id, "No stored credentials");
                    crate::health::mark_component_ok("credential_store");
                    return RestoreOutcome::Absent;
                }
                Err(e) => {
                    tracing::warn!(
                        session_id,
                        attempt,
                        max_attempts = self.restore_policy.attempts,
                        "Credential restore failed: {e}"
                    );
                    match self.restore_policy.delay_after(attempt) {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => {
                            crate::health::mark_component_error("credential_store", &e);
                            return RestoreOutcome::Failed(e.to_string());
                        }
                    }
                }
            }
        }
    }

    async fn list_sessions(&self) -> Result<Vec<String>, StoreError> {
        let response = self
            .client
            .get(self.url("/session/list"))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let body: ListResponse = ensure_success(response).await?.json().await?;
        Ok(body.sessions.into_iter().map(|s| s.session_id).collect())
    }
}
