//! Autosaving editing session for one task

use formsync_common::models::{BulkOperationResponse, TaskId};
use formsync_common::{BulkGate, FieldCatalog};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{ReconciliationCache, SnapshotOutcome};
use crate::chain::FallbackChain;
use crate::config::ClientConfig;
use crate::coordinator::{BatchCoordinator, BatchOutcome};
use crate::error::{ClientError, ClientResult};
use crate::transport::AssessmentTransport;

/// What one flush persisted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    pub saved: Option<BatchOutcome>,
    pub cleared: Option<BatchOutcome>,
}

impl FlushReport {
    pub fn updated_count(&self) -> usize {
        self.saved.as_ref().map_or(0, |o| o.updated_count)
            + self.cleared.as_ref().map_or(0, |o| o.updated_count)
    }

    pub fn is_empty(&self) -> bool {
        self.saved.is_none() && self.cleared.is_none()
    }
}

struct SessionInner {
    task_id: TaskId,
    catalog: Arc<FieldCatalog>,
    transport: Arc<dyn AssessmentTransport>,
    coordinator: BatchCoordinator,
    cache: Mutex<ReconciliationCache>,
    gate: BulkGate,
    dirty: Notify,
    /// Serializes flushes so edits reach the server in order
    flush_lock: tokio::sync::Mutex<()>,
    autosave_debounce: Duration,
}

/// Cheap to clone; clones share one cache
#[derive(Clone)]
pub struct AssessmentSession {
    inner: Arc<SessionInner>,
}

impl AssessmentSession {
    pub fn new(
        task_id: TaskId,
        catalog: FieldCatalog,
        transport: Arc<dyn AssessmentTransport>,
        config: &ClientConfig,
    ) -> Self {
        let gate = BulkGate::new(config.bulk_settle());
        let coordinator = BatchCoordinator::new(transport.clone(), FallbackChain::from_config(config));

        Self {
            inner: Arc::new(SessionInner {
                task_id,
                catalog: Arc::new(catalog),
                transport,
                coordinator,
                cache: Mutex::new(ReconciliationCache::new(task_id, gate.clone())),
                gate,
                dirty: Notify::new(),
                flush_lock: tokio::sync::Mutex::new(()),
                autosave_debounce: config.autosave_debounce(),
            }),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.inner.task_id
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.inner.catalog
    }

    pub fn gate(&self) -> &BulkGate {
        &self.inner.gate
    }

    fn cache(&self) -> MutexGuard<'_, ReconciliationCache> {
        self.inner
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read the cache under its lock
    pub fn with_cache<R>(&self, f: impl FnOnce(&ReconciliationCache) -> R) -> R {
        f(&self.cache())
    }

    /// Optimistic edit, scheduling an autosave; false when dropped
    pub fn edit(&self, key: &str, value: Value) -> bool {
        let accepted = self.cache().edit(key, value);
        if accepted {
            self.inner.dirty.notify_one();
        }
        accepted
    }

    pub fn focus(&self, key: &str) {
        self.cache().focus(key);
    }

    /// Stop tracking a field as being edited and schedule a flush
    pub fn blur(&self, key: &str) {
        self.cache().blur(key);
        self.inner.dirty.notify_one();
    }

    /// Send every pending edit now
    pub async fn flush(&self) -> ClientResult<FlushReport> {
        let _serial = self.inner.flush_lock.lock().await;

        let mut flush = self.cache().take_pending();
        if flush.is_empty() {
            return Ok(FlushReport::default());
        }

        let variant = self.inner.catalog.variant();
        let task_id = self.inner.task_id;
        let mut report = FlushReport::default();

        if !flush.values.is_empty() {
            match self
                .inner
                .coordinator
                .persist_normalized(variant, task_id, &flush.values)
                .await
            {
                Ok(outcome) => report.saved = Some(outcome),
                Err(e) => {
                    self.cache().restore(flush);
                    return Err(e);
                }
            }
        }

        if !flush.cleared.is_empty() {
            match self
                .inner
                .coordinator
                .clear_fields(variant, task_id, &flush.cleared)
                .await
            {
                Ok(outcome) => report.cleared = Some(outcome),
                Err(e) => {
                    let saved_failed = report.saved.map(|o| o.failed).unwrap_or_default();
                    let mut retry = flush.split_off(&saved_failed);
                    retry.cleared.append(&mut flush.cleared);

                    let mut cache = self.cache();
                    cache.acknowledge(&flush);
                    cache.restore(retry);
                    return Err(e);
                }
            }
        }

        // Partial per-field success: unwritten keys stay queued for the next flush
        let failed: Vec<String> = [&report.saved, &report.cleared]
            .into_iter()
            .flatten()
            .flat_map(|o| o.failed.iter().cloned())
            .collect();
        let retry = flush.split_off(&failed);

        let mut cache = self.cache();
        cache.acknowledge(&flush);
        if !retry.is_empty() {
            warn!(task_id, failed = retry.len(), "Fields not saved; kept for retry");
            cache.restore(retry);
        }
        for outcome in [&report.saved, &report.cleared].into_iter().flatten() {
            if let (Some(progress), Some(status), Some(timestamp)) =
                (outcome.progress, outcome.status, outcome.timestamp)
            {
                cache.apply_progress(&formsync_common::models::ProgressSnapshot {
                    task_id,
                    progress,
                    status,
                    bulk_in_progress: false,
                    timestamp,
                });
            }
        }
        drop(cache);

        debug!(task_id, updated = report.updated_count(), "Flush complete");
        Ok(report)
    }

    /// Debounced autosave loop; abort the handle to stop it
    pub fn spawn_autosave(&self) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                session.inner.dirty.notified().await;

                // Restart the quiet period on every new edit
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(session.inner.autosave_debounce) => break,
                        _ = session.inner.dirty.notified() => continue,
                    }
                }

                if let Err(e) = session.flush().await {
                    warn!(task_id = session.task_id(), "Autosave failed: {}", e);
                }
            }
        })
    }

    /// Pull the authoritative snapshot and merge it
    pub async fn resync(&self) -> ClientResult<SnapshotOutcome> {
        let snapshot = self
            .inner
            .transport
            .responses(self.inner.catalog.variant(), self.inner.task_id)
            .await?;
        let outcome = self.cache().apply_snapshot(&snapshot);
        debug!(task_id = self.inner.task_id, ?outcome, "Resynced");
        Ok(outcome)
    }

    /// Remove every stored answer of the task
    pub async fn clear_all(&self) -> ClientResult<BulkOperationResponse> {
        self.bulk(BulkKind::Clear).await
    }

    /// Replace the task's answers with generated demo data
    pub async fn demo_fill(&self) -> ClientResult<BulkOperationResponse> {
        self.bulk(BulkKind::Demo).await
    }

    async fn bulk(&self, kind: BulkKind) -> ClientResult<BulkOperationResponse> {
        let task_id = self.inner.task_id;
        if self.inner.gate.is_active(task_id) {
            return Err(ClientError::BulkInProgress(task_id));
        }

        let guard = self.inner.gate.acquire(task_id);
        // Queued edits would race the replace; they are dropped
        self.cache().take_pending();

        let variant = self.inner.catalog.variant();
        let result = match kind {
            BulkKind::Clear => self.inner.transport.clear(variant, task_id).await,
            BulkKind::Demo => self.inner.transport.demo_autofill(variant, task_id).await,
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(task_id, ?kind, "Bulk operation failed: {}", e);
                drop(guard);
                return Err(e.into());
            }
        };

        info!(task_id, ?kind, progress = response.progress, "{}", response.message);
        if let Err(e) = self.resync().await {
            warn!(task_id, "Resync after bulk operation failed: {}", e);
        }
        guard.release_after_settle();

        Ok(response)
    }
}

#[derive(Debug, Clone, Copy)]
enum BulkKind {
    Clear,
    Demo,
}
