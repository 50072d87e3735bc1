//! Credential store client against a mock backup service.
//!
//! Covers retry counting and backoff progression for backups, per-attempt
//! timeouts and transport failures, restore semantics for 404 / empty /
//! transient failures, and the startup listing.

use serde_json::json;
use std::time::{Duration, Instant};
use wa_sessiond::store::{
    BackupOutcome, CredentialStore, HttpCredentialStore, RestoreOutcome, RetryPolicy, SessionFiles,
};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STEP: Duration = Duration::from_millis(20);

fn store(server: &MockServer) -> HttpCredentialStore {
    HttpCredentialStore::new(format!("{}/api/", server.uri()))
        .with_request_timeout(Duration::from_secs(2))
        .with_backup_policy(RetryPolicy::new(3, STEP))
        .with_restore_policy(RetryPolicy::new(3, STEP))
}

const SHORT_TIMEOUT: Duration = Duration::from_millis(200);
const HANG: Duration = Duration::from_secs(5);

fn impatient_store(base: &str) -> HttpCredentialStore {
    HttpCredentialStore::new(format!("{base}/api/"))
        .with_request_timeout(SHORT_TIMEOUT)
        .with_backup_policy(RetryPolicy::new(3, STEP))
        .with_restore_policy(RetryPolicy::new(3, STEP))
}

/// Base URL of a port nothing listens on.
fn refused_base() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn creds() -> SessionFiles {
    [
        ("creds.json".to_string(), r#"{"registered":true}"#.to_string()),
        ("pre-key-1.json".to_string(), "{}".to_string()),
    ]
    .into()
}

// ─────────────────────────────────────────────────────────────────────────────
// Backup
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn backup_sends_session_id_and_files() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/session/backup"))
        .and(body_partial_json(json!({
            "session_id": "user_123",
            "session_data": { "creds.json": "{\"registered\":true}" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let report = store(&server).backup("user_123", &creds()).await;
    assert!(report.is_stored());
    assert_eq!(report.attempts, 1);
    assert!(report.waits.is_empty());
}

#[tokio::test]
async fn backup_retries_with_linear_backoff_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/session/backup"))
        .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/session/backup"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let report = store(&server).backup("u1", &creds()).await;
    assert!(report.is_stored());
    assert_eq!(report.attempts, 3);
    assert_eq!(report.waits, vec![STEP, STEP * 2]);
}

#[tokio::test]
async fn backup_gives_up_after_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/session/backup"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(3)
        .mount(&server)
        .await;

    let report = store(&server).backup("u1", &creds()).await;
    assert_eq!(report.attempts, 3);
    assert_eq!(report.waits, vec![STEP, STEP * 2]);
    match report.outcome {
        BackupOutcome::Failed { last_error } => {
            assert!(last_error.contains("503"), "unexpected error: {last_error}");
            assert!(last_error.contains("maintenance"));
        }
        BackupOutcome::Stored => panic!("backup should have failed"),
    }
}

#[tokio::test]
async fn hung_backup_attempts_are_abandoned_and_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/session/backup"))
        .respond_with(ResponseTemplate::new(200).set_delay(HANG))
        .expect(3)
        .mount(&server)
        .await;

    let started = Instant::now();
    let report = impatient_store(&server.uri()).backup("u1", &creds()).await;
    assert!(started.elapsed() < HANG, "attempts must not wait for the hung response");
    assert_eq!(report.attempts, 3);
    assert_eq!(report.waits, vec![STEP, STEP * 2]);
    assert!(matches!(report.outcome, BackupOutcome::Failed { .. }));
}

#[tokio::test]
async fn backup_succeeds_after_two_timed_out_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/session/backup"))
        .respond_with(ResponseTemplate::new(200).set_delay(HANG))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/session/backup"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let report = impatient_store(&server.uri()).backup("u1", &creds()).await;
    assert!(report.is_stored());
    assert_eq!(report.attempts, 3);
    assert_eq!(report.waits, vec![STEP, STEP * 2]);
}

#[tokio::test]
async fn backup_to_unreachable_store_fails_after_all_attempts() {
    let report = impatient_store(&refused_base()).backup("u1", &creds()).await;
    assert_eq!(report.attempts, 3);
    assert_eq!(report.waits, vec![STEP, STEP * 2]);
    match report.outcome {
        BackupOutcome::Failed { last_error } => {
            assert!(last_error.contains("request failed"), "unexpected error: {last_error}");
        }
        BackupOutcome::Stored => panic!("backup should have failed"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Restore
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn restore_returns_stored_files() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/session/restore"))
        .and(query_param("session_id", "u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "session_data": creds(),
        })))
        .mount(&server)
        .await;

    assert_eq!(
        store(&server).restore("u1").await,
        RestoreOutcome::Restored(creds())
    );
}

#[tokio::test]
async fn restore_not_found_is_absent_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/session/restore"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(store(&server).restore("u1").await, RestoreOutcome::Absent);
}

#[tokio::test]
async fn restore_empty_payload_is_absent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/session/restore"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "session_data": {} })))
        .mount(&server)
        .await;

    assert_eq!(store(&server).restore("u1").await, RestoreOutcome::Absent);
}

#[tokio::test]
async fn restore_recovers_from_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/session/restore"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/session/restore"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "session_data": creds() })))
        .mount(&server)
        .await;

    assert_eq!(
        store(&server).restore("u1").await,
        RestoreOutcome::Restored(creds())
    );
}

#[tokio::test]
async fn restore_failure_after_all_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/session/restore"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    assert!(matches!(
        store(&server).restore("u1").await,
        RestoreOutcome::Failed(_)
    ));
}

#[tokio::test]
async fn hung_restore_attempts_time_out_and_fail() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/session/restore"))
        .respond_with(ResponseTemplate::new(200).set_delay(HANG))
        .expect(3)
        .mount(&server)
        .await;

    let started = Instant::now();
    let outcome = impatient_store(&server.uri()).restore("u1").await;
    assert!(started.elapsed() < HANG);
    assert!(matches!(outcome, RestoreOutcome::Failed(_)));
}

#[tokio::test]
async fn restore_from_unreachable_store_fails() {
    assert!(matches!(
        impatient_store(&refused_base()).restore("u1").await,
        RestoreOutcome::Failed(_)
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Listing
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn list_sessions_returns_ids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/session/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sessions": [
                { "session_id": "user_1", "updated_at": "2025-01-01T00:00:00Z" },
                { "session_id": "user_2" }
            ]
        })))
        .mount(&server)
        .await;

    assert_eq!(
        store(&server).list_sessions().await.unwrap(),
        vec!["user_1".to_string(), "user_2".to_string()]
    );
}

#[tokio::test]
async fn list_sessions_surfaces_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/session/list"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    assert!(store(&server).list_sessions().await.is_err());
}
