//! Delayed-task queue keyed by session and purpose.
//!
//! Every deferred action (reconnects, backups, pairing requests, startup
//! restores) goes through here so it can be inspected and cancelled when a
//! session is cleared, replaced, or the process stops.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Reconnect,
    PostConnectBackup,
    CredentialBackup,
    PairingRequest,
    Restore,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub session_id: String,
    pub kind: TaskKind,
}

impl TaskKey {
    pub fn new(session_id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
        }
    }
}

struct PendingTask {
    id: u64,
    deadline: Instant,
    abort: AbortHandle,
}

/// A task that is aborted when this value is dropped.
#[derive(Debug)]
pub struct ScheduledTask {
    abort: AbortHandle,
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

#[derive(Default)]
pub struct TaskScheduler {
    tasks: Arc<Mutex<HashMap<TaskKey, PendingTask>>>,
    next_id: AtomicU64,
    stopped: AtomicBool,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once after `delay`. An existing task with the same key is
    /// aborted and replaced. The entry stays visible until `task` finishes.
    /// Returns false after [`TaskScheduler::stop`].
    pub fn schedule_once<F>(&self, key: TaskKey, delay: Duration, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.stopped.load(Ordering::SeqCst) {
            tracing::debug!(session_id = %key.session_id, kind = ?key.kind, "Scheduler stopped; dropping task");
            return false;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + delay;
        let tasks = Arc::clone(&self.tasks);
        let own_key = key.clone();

        // Hold the map lock across spawn so the task cannot finish and
        // remove itself before its entry exists.
        let mut map = self.tasks.lock();
        let handle = tokio::spawn(async move {
            time::sleep_until(deadline).await;
            task.await;
            let mut map = tasks.lock();
            if map.get(&own_key).is_some_and(|t| t.id == id) {
                map.remove(&own_key);
            }
        });
        let pending = PendingTask {
            id,
            deadline,
            abort: handle.abort_handle(),
        };
        if let Some(previous) = map.insert(key, pending) {
            previous.abort.abort();
        }
        true
    }

    /// Run `tick` every `period`, first after one full period.
    pub fn spawn_interval<F, Fut>(&self, period: Duration, mut tick: F) -> ScheduledTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        ScheduledTask {
            abort: handle.abort_handle(),
        }
    }

    pub fn cancel(&self, key: &TaskKey) -> bool {
        match self.tasks.lock().remove(key) {
            Some(task) => {
                task.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every task belonging to `session_id`. Returns how many were pending.
    pub fn cancel_session(&self, session_id: &str) -> usize {
        let mut map = self.tasks.lock();
        let keys: Vec<TaskKey> = map
            .keys()
            .filter(|k| k.session_id == session_id)
            .cloned()
            .collect();
        for key in &keys {
            if let Some(task) = map.remove(key) {
                task.abort.abort();
            }
        }
        keys.len()
    }

    /// Tasks for `session_id` with time left until they fire (zero once running).
    pub fn pending(&self, session_id: &str) -> Vec<(TaskKind, Duration)> {
        let now = Instant::now();
        let mut out: Vec<(TaskKind, Duration)> = self
            .tasks
            .lock()
            .iter()
            .filter(|(k, _)| k.session_id == session_id)
            .map(|(k, t)| (k.kind, t.deadline.saturating_duration_since(now)))
            .collect();
        out.sort_by_key(|(_, remaining)| *remaining);
        out
    }

    pub fn is_pending(&self, key: &TaskKey) -> bool {
        self.tasks.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort everything and refuse new one-shot tasks.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let mut map = self.tasks.lock();
        let count = map.len();
        for (_, task) in map.drain() {
            task.abort.abort();
        }
        tracing::info!(cancelled = count, "Task scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let c = Arc::new(AtomicUsize::new(0));
        let read = {
            let c = Arc::clone(&c);
            move || c.load(Ordering::SeqCst)
        };
        (c, read)
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_after_delay() {
        let scheduler = TaskScheduler::new();
        let (c, read) = counter();
        scheduler.schedule_once(TaskKey::new("u1", TaskKind::Reconnect), Duration::from_secs(10), async move {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(
            scheduler.pending("u1"),
            vec![(TaskKind::Reconnect, Duration::from_secs(10))]
        );
        time::sleep(Duration::from_secs(9)).await;
        assert_eq!(read(), 0);
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(read(), 1);
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_replaces_previous_task() {
        let scheduler = TaskScheduler::new();
        let (c, read) = counter();
        for _ in 0..3 {
            let c = Arc::clone(&c);
            scheduler.schedule_once(TaskKey::new("u1", TaskKind::Reconnect), Duration::from_secs(5), async move {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(scheduler.len(), 1);
        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(read(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_session_only_touches_that_session() {
        let scheduler = TaskScheduler::new();
        let (c, read) = counter();
        for (id, kind) in [
            ("u1", TaskKind::Reconnect),
            ("u1", TaskKind::PostConnectBackup),
            ("u2", TaskKind::Reconnect),
        ] {
            let c = Arc::clone(&c);
            scheduler.schedule_once(TaskKey::new(id, kind), Duration::from_secs(1), async move {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(scheduler.cancel_session("u1"), 2);
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(read(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_stops_when_dropped() {
        let scheduler = TaskScheduler::new();
        let (c, read) = counter();
        let task = scheduler.spawn_interval(Duration::from_secs(60), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        time::sleep(Duration::from_secs(59)).await;
        assert_eq!(read(), 0);
        time::sleep(Duration::from_secs(62)).await;
        assert_eq!(read(), 2);
        drop(task);
        time::sleep(Duration::from_secs(600)).await;
        assert_eq!(read(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_scheduler_refuses_new_tasks() {
        let scheduler = TaskScheduler::new();
        scheduler.schedule_once(TaskKey::new("u1", TaskKind::Restore), Duration::from_secs(1), async {});
        scheduler.stop();
        assert!(scheduler.is_empty());
        assert!(!scheduler.schedule_once(TaskKey::new("u1", TaskKind::Restore), Duration::ZERO, async {}));
    }
}
