//! Client Reconciliation Cache
//!
//! Holds one task's editable state on the client: what the user sees, what
//! has not been sent yet, what is on the wire, and what the server last
//! confirmed. Server snapshots are merged last-write-wins by timestamp and
//! never touch a field the user is working on.

use chrono::{DateTime, Utc};
use formsync_common::models::{ProgressSnapshot, Responses, ResponsesSnapshot, TaskId, TaskStatus};
use formsync_common::normalize::{is_empty_value, METADATA_PREFIX};
use formsync_common::{progress, BulkGate, FieldCatalog};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Edits drained for one autosave round
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingFlush {
    /// Non-empty values to store
    pub values: Responses,
    /// Fields the user emptied
    pub cleared: Vec<String>,
}

impl PendingFlush {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.cleared.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len() + self.cleared.len()
    }

    /// Move `keys` into a separate flush, leaving the rest in `self`
    pub fn split_off(&mut self, keys: &[String]) -> PendingFlush {
        let mut taken = PendingFlush::default();
        for key in keys {
            if let Some(value) = self.values.remove(key) {
                taken.values.insert(key.clone(), value);
            }
        }
        self.cleared.retain(|key| {
            if keys.contains(key) {
                taken.cleared.push(key.clone());
                false
            } else {
                true
            }
        });
        taken
    }
}

/// Result of merging a server snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Snapshot merged; `changed` fields took the server value
    Applied { changed: usize },
    /// Older than the confirmed state; nothing changed
    Stale,
}

#[derive(Debug)]
pub struct ReconciliationCache {
    task_id: TaskId,
    values: Responses,
    /// Unsent edits; `Value::Null` marks a cleared field
    pending: BTreeMap<String, Value>,
    /// Sent but not yet acknowledged
    in_flight: BTreeMap<String, Value>,
    focused: HashSet<String>,
    confirmed_at: Option<DateTime<Utc>>,
    progress: u8,
    status: TaskStatus,
    gate: BulkGate,
    /// Server-reported bulk operation, trusted for one settle period
    remote_bulk_until: Option<Instant>,
    remote_bulk_settle: Duration,
}

impl ReconciliationCache {
    pub fn new(task_id: TaskId, gate: BulkGate) -> Self {
        let remote_bulk_settle = gate.settle_delay();
        Self {
            task_id,
            values: Responses::new(),
            pending: BTreeMap::new(),
            in_flight: BTreeMap::new(),
            focused: HashSet::new(),
            confirmed_at: None,
            progress: 0,
            status: TaskStatus::NotStarted,
            gate,
            remote_bulk_until: None,
            remote_bulk_settle,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn values(&self) -> &Responses {
        &self.values
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_focused(&self, key: &str) -> bool {
        self.focused.contains(key)
    }

    /// True while this client or, per the last snapshot, another session
    /// runs a bulk operation on the task
    pub fn bulk_in_progress(&self) -> bool {
        self.gate.is_active(self.task_id)
            || self
                .remote_bulk_until
                .is_some_and(|until| Instant::now() < until)
    }

    /// Local progress estimate including unconfirmed edits
    pub fn estimated_progress(&self, catalog: &FieldCatalog) -> u8 {
        progress::calculate(&self.values, catalog)
    }

    /// Optimistic edit; returns false when the edit was dropped
    pub fn edit(&mut self, key: &str, value: Value) -> bool {
        if key.is_empty() || key.starts_with(METADATA_PREFIX) {
            debug!(task_id = self.task_id, field = key, "Ignoring edit of metadata field");
            return false;
        }
        if self.bulk_in_progress() {
            debug!(task_id = self.task_id, field = key, "Edit dropped during bulk operation");
            return false;
        }

        if is_empty_value(&value) {
            self.values.remove(key);
            self.pending.insert(key.to_string(), Value::Null);
        } else {
            self.values.insert(key.to_string(), value.clone());
            self.pending.insert(key.to_string(), value);
        }
        true
    }

    pub fn focus(&mut self, key: &str) {
        self.focused.insert(key.to_string());
    }

    pub fn blur(&mut self, key: &str) {
        self.focused.remove(key);
    }

    /// Drain pending edits for a flush
    ///
    /// While a bulk operation is running the queue is discarded instead.
    pub fn take_pending(&mut self) -> PendingFlush {
        if self.bulk_in_progress() {
            if !self.pending.is_empty() {
                debug!(
                    task_id = self.task_id,
                    dropped = self.pending.len(),
                    "Discarding queued edits during bulk operation"
                );
                self.pending.clear();
            }
            return PendingFlush::default();
        }

        let mut flush = PendingFlush::default();
        for (key, value) in std::mem::take(&mut self.pending) {
            self.in_flight.insert(key.clone(), value.clone());
            if value.is_null() {
                flush.cleared.push(key);
            } else {
                flush.values.insert(key, value);
            }
        }
        flush
    }

    /// Put a failed flush back in the queue, unless newer edits replaced it
    pub fn restore(&mut self, flush: PendingFlush) {
        let entries = flush
            .values
            .into_iter()
            .chain(flush.cleared.into_iter().map(|key| (key, Value::Null)));
        for (key, value) in entries {
            if self.in_flight.get(&key) == Some(&value) {
                self.in_flight.remove(&key);
            }
            self.pending.entry(key).or_insert(value);
        }
    }

    /// Mark flushed values as confirmed by the server
    pub fn acknowledge(&mut self, flush: &PendingFlush) {
        for (key, value) in &flush.values {
            if self.in_flight.get(key) == Some(value) {
                self.in_flight.remove(key);
            }
        }
        for key in &flush.cleared {
            if self.in_flight.get(key).is_some_and(Value::is_null) {
                self.in_flight.remove(key);
            }
        }
    }

    fn is_protected(&self, key: &str) -> bool {
        self.focused.contains(key) || self.pending.contains_key(key) || self.in_flight.contains_key(key)
    }

    fn is_stale(&self, timestamp: &DateTime<Utc>) -> bool {
        self.confirmed_at.is_some_and(|confirmed| *timestamp < confirmed)
    }

    fn confirm(&mut self, progress: u8, status: TaskStatus, bulk: bool, timestamp: DateTime<Utc>) {
        self.progress = progress;
        self.status = status;
        self.confirmed_at = Some(timestamp);
        self.remote_bulk_until = bulk.then(|| Instant::now() + self.remote_bulk_settle);
    }

    /// Merge the progress figures of a write response or progress snapshot
    pub fn apply_progress(&mut self, snapshot: &ProgressSnapshot) -> SnapshotOutcome {
        if self.is_stale(&snapshot.timestamp) {
            return SnapshotOutcome::Stale;
        }
        self.confirm(
            snapshot.progress,
            snapshot.status,
            snapshot.bulk_in_progress,
            snapshot.timestamp,
        );
        SnapshotOutcome::Applied { changed: 0 }
    }

    /// Merge an authoritative snapshot of every stored answer
    pub fn apply_snapshot(&mut self, snapshot: &ResponsesSnapshot) -> SnapshotOutcome {
        let meta = &snapshot.snapshot;
        if self.is_stale(&meta.timestamp) {
            debug!(
                task_id = self.task_id,
                snapshot = %meta.timestamp,
                "Ignoring stale snapshot"
            );
            return SnapshotOutcome::Stale;
        }

        let mut changed = 0;

        let absent: Vec<String> = self
            .values
            .keys()
            .filter(|key| !snapshot.responses.contains_key(*key) && !self.is_protected(key))
            .cloned()
            .collect();
        for key in absent {
            self.values.remove(&key);
            changed += 1;
        }

        for (key, value) in &snapshot.responses {
            if self.is_protected(key) || self.values.get(key) == Some(value) {
                continue;
            }
            self.values.insert(key.clone(), value.clone());
            changed += 1;
        }

        self.confirm(meta.progress, meta.status, meta.bulk_in_progress, meta.timestamp);
        SnapshotOutcome::Applied { changed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn cache() -> ReconciliationCache {
        ReconciliationCache::new(1, BulkGate::new(Duration::from_millis(500)))
    }

    fn snapshot(responses: Value, timestamp: DateTime<Utc>) -> ResponsesSnapshot {
        ResponsesSnapshot {
            snapshot: ProgressSnapshot {
                task_id: 1,
                progress: 40,
                status: TaskStatus::InProgress,
                bulk_in_progress: false,
                timestamp,
            },
            responses: serde_json::from_value(responses).unwrap(),
        }
    }

    #[test]
    fn test_edit_queues_and_take_pending_splits_clears() {
        let mut cache = cache();
        assert!(cache.edit("name", json!("Acme")));
        assert!(cache.edit("website", json!("")));

        let flush = cache.take_pending();
        assert_eq!(flush.values["name"], "Acme");
        assert_eq!(flush.cleared, vec!["website".to_string()]);
        assert_eq!(cache.pending_len(), 0);
        assert!(cache.take_pending().is_empty());
    }

    #[test]
    fn test_metadata_edits_are_ignored() {
        let mut cache = cache();
        assert!(!cache.edit("_internal", json!("x")));
        assert!(cache.values().is_empty());
    }

    #[test]
    fn test_edits_dropped_while_gate_held() {
        let gate = BulkGate::default();
        let mut cache = ReconciliationCache::new(1, gate.clone());
        cache.edit("before", json!("queued"));

        let guard = gate.acquire(1);
        assert!(!cache.edit("during", json!("x")));
        assert!(cache.take_pending().is_empty());
        drop(guard);

        // Queued edits were discarded, not deferred
        assert!(cache.take_pending().is_empty());
        assert!(cache.value("during").is_none());
    }

    #[test]
    fn test_gate_for_other_task_does_not_block() {
        let gate = BulkGate::default();
        let mut cache = ReconciliationCache::new(1, gate.clone());
        let _guard = gate.acquire(2);

        assert!(cache.edit("name", json!("Acme")));
        assert_eq!(cache.take_pending().len(), 1);
    }

    #[test]
    fn test_snapshot_replaces_unprotected_fields() {
        let mut cache = cache();
        let now = Utc::now();
        cache.apply_snapshot(&snapshot(json!({"a": "1", "b": "2"}), now));

        let outcome = cache.apply_snapshot(&snapshot(
            json!({"a": "changed", "c": "3"}),
            now + ChronoDuration::milliseconds(5),
        ));

        assert_eq!(outcome, SnapshotOutcome::Applied { changed: 3 });
        assert_eq!(cache.value("a"), Some(&json!("changed")));
        assert!(cache.value("b").is_none());
        assert_eq!(cache.value("c"), Some(&json!("3")));
        assert_eq!(cache.progress(), 40);
    }

    #[test]
    fn test_stale_snapshot_is_ignored() {
        let mut cache = cache();
        let now = Utc::now();
        cache.apply_snapshot(&snapshot(json!({"a": "new"}), now));

        let outcome = cache.apply_snapshot(&snapshot(
            json!({"a": "old"}),
            now - ChronoDuration::milliseconds(1),
        ));

        assert_eq!(outcome, SnapshotOutcome::Stale);
        assert_eq!(cache.value("a"), Some(&json!("new")));
        assert_eq!(cache.confirmed_at(), Some(now));
    }

    #[test]
    fn test_fields_being_edited_survive_snapshots() {
        let mut cache = cache();
        let now = Utc::now();
        cache.apply_snapshot(&snapshot(json!({"focused": "server", "queued": "server"}), now));

        cache.focus("focused");
        cache.edit("queued", json!("local"));
        cache.edit("sent", json!("local"));
        let flush = cache.take_pending();

        cache.apply_snapshot(&snapshot(
            json!({"focused": "other", "queued": "other"}),
            now + ChronoDuration::milliseconds(1),
        ));

        assert_eq!(cache.value("focused"), Some(&json!("server")));
        assert_eq!(cache.value("queued"), Some(&json!("local")));
        // In flight and absent from the snapshot: kept until acknowledged
        assert_eq!(cache.value("sent"), Some(&json!("local")));

        cache.acknowledge(&flush);
        cache.blur("focused");
        cache.apply_snapshot(&snapshot(
            json!({"focused": "other", "queued": "local", "sent": "local"}),
            now + ChronoDuration::milliseconds(2),
        ));
        assert_eq!(cache.value("focused"), Some(&json!("other")));
    }

    #[test]
    fn test_split_off_moves_only_named_keys() {
        let mut cache = cache();
        cache.edit("a", json!("1"));
        cache.edit("b", json!("2"));
        cache.edit("c", json!(""));
        let mut flush = cache.take_pending();

        let failed = flush.split_off(&["b".to_string(), "c".to_string()]);

        assert_eq!(flush.values.keys().collect::<Vec<_>>(), ["a"]);
        assert!(flush.cleared.is_empty());
        assert_eq!(failed.values["b"], "2");
        assert_eq!(failed.cleared, ["c"]);
    }

    #[test]
    fn test_restore_keeps_newer_edit() {
        let mut cache = cache();
        cache.edit("name", json!("first"));
        let flush = cache.take_pending();

        cache.edit("name", json!("second"));
        cache.restore(flush);

        let retry = cache.take_pending();
        assert_eq!(retry.values["name"], "second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_bulk_flag_expires_after_settle() {
        let mut cache = cache();
        let mut busy = snapshot(json!({}), Utc::now());
        busy.snapshot.bulk_in_progress = true;
        cache.apply_snapshot(&busy);

        assert!(cache.bulk_in_progress());
        assert!(!cache.edit("name", json!("x")));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!cache.bulk_in_progress());
        assert!(cache.edit("name", json!("x")));
    }

    #[test]
    fn test_estimated_progress_counts_local_edits() {
        let catalog = FieldCatalog::builtin(formsync_common::models::AssessmentVariant::C);
        let mut cache = cache();
        let key = catalog.required_fields().next().unwrap().key.clone();

        assert_eq!(cache.estimated_progress(&catalog), 0);
        cache.edit(&key, json!("value"));
        assert_eq!(cache.estimated_progress(&catalog), 25);
    }
}
