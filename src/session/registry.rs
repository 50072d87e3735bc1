use super::types::{SessionRecord, SessionView};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Session id → record. The single source of truth for session state.
///
/// All access goes through short closures under one lock, which is never
/// held across an `.await`. Removing or replacing a record drops it, which
/// closes its connection and stops its backup timer.
#[derive(Default)]
pub struct SessionRegistry {
    records: Mutex<HashMap<String, SessionRecord>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.records.lock().contains_key(session_id)
    }

    pub fn with<R>(&self, session_id: &str, f: impl FnOnce(&SessionRecord) -> R) -> Option<R> {
        self.records.lock().get(session_id).map(f)
    }

    pub fn update<R>(&self, session_id: &str, f: impl FnOnce(&mut SessionRecord) -> R) -> Option<R> {
        self.records.lock().get_mut(session_id).map(f)
    }

    /// Like [`SessionRegistry::update`] but only while the record still
    /// belongs to connection `generation`. Events from a replaced
    /// connection fall through here.
    pub fn update_current<R>(
        &self,
        session_id: &str,
        generation: u64,
        f: impl FnOnce(&mut SessionRecord) -> R,
    ) -> Option<R> {
        self.records
            .lock()
            .get_mut(session_id)
            .filter(|r| r.generation == generation)
            .map(f)
    }

    pub fn is_current(&self, session_id: &str, generation: u64) -> bool {
        self.with(session_id, |r| r.generation == generation)
            .unwrap_or(false)
    }

    /// Store `record`, dropping any previous record for the same id.
    pub fn insert(&self, record: SessionRecord) {
        let previous = self.records.lock().insert(record.id.clone(), record);
        drop(previous);
    }

    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self.records.lock().remove(session_id);
        removed.is_some()
    }

    /// Drop every record.
    pub fn clear(&self) -> usize {
        let drained: Vec<SessionRecord> = self.records.lock().drain().map(|(_, r)| r).collect();
        drained.len()
    }

    pub fn list(&self) -> Vec<SessionView> {
        let mut views: Vec<SessionView> = self.records.lock().values().map(SessionRecord::view).collect();
        views.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        views
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn connected_count(&self) -> usize {
        self.records.lock().values().filter(|r| r.connected).count()
    }

    /// First connected session other than `exclude`, ordered by id.
    pub fn find_connected_except<R>(
        &self,
        exclude: &str,
        f: impl FnOnce(&SessionRecord) -> R,
    ) -> Option<R> {
        let records = self.records.lock();
        let mut candidates: Vec<&SessionRecord> = records
            .values()
            .filter(|r| r.connected && r.id != exclude && r.connection.is_some())
            .collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        candidates.first().map(|r| f(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ConnectMode;
    use crate::session::types::SessionStatus;

    #[test]
    fn insert_replaces_existing_record() {
        let registry = SessionRegistry::new();
        registry.insert(SessionRecord::new("u1", 1, ConnectMode::Qr));
        registry.insert(SessionRecord::new("u1", 2, ConnectMode::Qr));
        assert_eq!(registry.len(), 1);
        assert!(registry.is_current("u1", 2));
        assert!(!registry.is_current("u1", 1));
    }

    #[test]
    fn stale_generation_updates_are_ignored() {
        let registry = SessionRegistry::new();
        registry.insert(SessionRecord::new("u1", 7, ConnectMode::Qr));
        let stale = registry.update_current("u1", 6, |r| r.set_status(SessionStatus::Connected));
        assert!(stale.is_none());
        registry.update_current("u1", 7, |r| r.set_status(SessionStatus::Connecting));
        assert_eq!(registry.with("u1", |r| r.status()), Some(SessionStatus::Connecting));
    }

    #[test]
    fn list_is_sorted_and_remove_deletes() {
        let registry = SessionRegistry::new();
        for id in ["b", "a", "c"] {
            registry.insert(SessionRecord::new(id, 1, ConnectMode::Qr));
        }
        let ids: Vec<String> = registry.list().into_iter().map(|v| v.session_id).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert!(registry.remove("b"));
        assert!(!registry.remove("b"));
        assert!(!registry.contains("b"));
        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
    }
}
