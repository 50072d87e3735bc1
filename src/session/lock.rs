use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Per-session timestamps of the last guarded connection attempt.
///
/// This is a cooldown, not mutual exclusion: it only refuses a second
/// attempt for the same session that starts within the window.
#[derive(Default)]
pub struct ConnectionLocks {
    entries: Mutex<HashMap<String, Instant>>,
}

impl ConnectionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt for `session_id`, or return how long the caller
    /// must wait when one started less than `cooldown` ago.
    pub fn try_acquire(&self, session_id: &str, cooldown: Duration) -> Result<(), Duration> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if let Some(started) = entries.get(session_id) {
            let elapsed = now.duration_since(*started);
            if elapsed < cooldown {
                return Err(cooldown - elapsed);
            }
        }
        entries.insert(session_id.to_string(), now);
        Ok(())
    }

    pub fn release(&self, session_id: &str) {
        self.entries.lock().remove(session_id);
    }

    pub fn is_held(&self, session_id: &str) -> bool {
        self.entries.lock().contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn second_attempt_within_cooldown_reports_remaining() {
        let locks = ConnectionLocks::new();
        assert!(locks.try_acquire("u1", COOLDOWN).is_ok());
        tokio::time::advance(Duration::from_secs(12)).await;
        assert_eq!(locks.try_acquire("u1", COOLDOWN), Err(Duration::from_secs(18)));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_expires() {
        let locks = ConnectionLocks::new();
        assert!(locks.try_acquire("u1", COOLDOWN).is_ok());
        tokio::time::advance(COOLDOWN).await;
        assert!(locks.try_acquire("u1", COOLDOWN).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn release_allows_immediate_retry() {
        let locks = ConnectionLocks::new();
        assert!(locks.try_acquire("u1", COOLDOWN).is_ok());
        locks.release("u1");
        assert!(!locks.is_held("u1"));
        assert!(locks.try_acquire("u1", COOLDOWN).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_are_independent() {
        let locks = ConnectionLocks::new();
        assert!(locks.try_acquire("u1", COOLDOWN).is_ok());
        assert!(locks.try_acquire("u2", COOLDOWN).is_ok());
    }
}
