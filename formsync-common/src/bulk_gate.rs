//! Task-scoped "bulk operation in progress" gate
//!
//! A bulk clear or demo fill holds a [`BulkGuard`] for its task while the
//! transaction runs and for a short settle period after commit. Autosave paths
//! check [`BulkGate::is_active`] for their own task only, so unrelated tasks
//! are never blocked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::models::TaskId;

/// Default settle delay after a bulk commit
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Registry of tasks with a bulk operation in flight
#[derive(Clone, Debug)]
pub struct BulkGate {
    active: Arc<Mutex<HashMap<TaskId, usize>>>,
    settle: Duration,
}

impl Default for BulkGate {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE)
    }
}

impl BulkGate {
    pub fn new(settle: Duration) -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            settle,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, usize>> {
        // A panic while holding this lock cannot leave the counts inconsistent
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark a bulk operation as started for `task_id`
    ///
    /// Guards nest: the gate stays active until every guard is released.
    pub fn acquire(&self, task_id: TaskId) -> BulkGuard {
        *self.lock().entry(task_id).or_insert(0) += 1;
        tracing::debug!(task_id, "Bulk gate acquired");
        BulkGuard {
            gate: self.clone(),
            task_id,
        }
    }

    /// True while any bulk guard for `task_id` is held
    pub fn is_active(&self, task_id: TaskId) -> bool {
        self.lock().get(&task_id).is_some_and(|&count| count > 0)
    }

    fn release(&self, task_id: TaskId) {
        let mut active = self.lock();
        if let Some(count) = active.get_mut(&task_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                active.remove(&task_id);
            }
        }
        tracing::debug!(task_id, "Bulk gate released");
    }
}

/// RAII marker of an in-flight bulk operation
///
/// Dropping the guard releases the gate immediately (failure path). After a
/// successful commit use [`BulkGuard::release_after_settle`].
#[derive(Debug)]
#[must_use = "dropping the guard releases the bulk gate immediately"]
pub struct BulkGuard {
    gate: BulkGate,
    task_id: TaskId,
}

impl BulkGuard {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Keep the gate closed for the settle delay, then release it
    ///
    /// Returns immediately; the release happens on a background task.
    pub fn release_after_settle(self) {
        let settle = self.gate.settle;
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            drop(self);
        });
    }
}

impl Drop for BulkGuard {
    fn drop(&mut self) {
        self.gate.release(self.task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_is_task_scoped() {
        let gate = BulkGate::default();
        let guard = gate.acquire(1);

        assert!(gate.is_active(1));
        assert!(!gate.is_active(2));

        drop(guard);
        assert!(!gate.is_active(1));
    }

    #[test]
    fn test_nested_guards() {
        let gate = BulkGate::default();
        let first = gate.acquire(5);
        let second = gate.acquire(5);

        drop(first);
        assert!(gate.is_active(5));
        drop(second);
        assert!(!gate.is_active(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_after_settle() {
        let gate = BulkGate::new(Duration::from_millis(500));
        gate.acquire(9).release_after_settle();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(gate.is_active(9), "gate must stay closed during settle delay");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!gate.is_active(9));
    }
}
