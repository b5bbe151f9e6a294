//! In-process transport and change feed doubles for unit tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use formsync_common::models::{
    AssessmentVariant, BulkOperationResponse, ProgressSnapshot, Responses, ResponsesSnapshot,
    TaskId, TaskStatus, UpdateResponse,
};
use formsync_common::normalize::is_empty_value;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{AssessmentTransport, ChangeFeed, FeedEvent};

fn rejected() -> TransportError {
    TransportError::Status {
        status: 500,
        body: "rejected".into(),
    }
}

/// Scriptable server stand-in backed by an in-memory response map
#[derive(Default)]
pub(crate) struct MockTransport {
    pub(crate) fail_variant_batch: bool,
    pub(crate) fail_legacy_batch: bool,
    /// Fields the single-field endpoints accept; `None` accepts every field
    pub(crate) accepted_fields: Option<HashSet<String>>,
    pub(crate) fail_bulk: bool,
    pub(crate) store: Mutex<Responses>,
    pub(crate) calls: Mutex<HashMap<&'static str, usize>>,
    pub(crate) silent_flags: Mutex<Vec<bool>>,
    pub(crate) batches: Mutex<Vec<Responses>>,
    pub(crate) in_flight: AtomicUsize,
    pub(crate) max_in_flight: AtomicUsize,
    pub(crate) last_timestamp: Mutex<Option<DateTime<Utc>>>,
}

impl MockTransport {
    fn record(&self, name: &'static str) {
        *self.calls.lock().unwrap().entry(name).or_insert(0) += 1;
    }

    pub(crate) fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub(crate) fn last_batch(&self) -> Option<Responses> {
        self.batches.lock().unwrap().last().cloned()
    }

    pub(crate) fn all_field_writes_silent(&self) -> bool {
        self.silent_flags.lock().unwrap().iter().all(|&s| s)
    }

    pub(crate) fn max_concurrent_fields(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn stored(&self) -> Responses {
        self.store.lock().unwrap().clone()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        let mut last = self.last_timestamp.lock().unwrap();
        let next = match *last {
            Some(prev) => formsync_common::time::next_after(&prev),
            None => formsync_common::time::now(),
        };
        *last = Some(next);
        next
    }

    fn progress(&self) -> u8 {
        (self.store.lock().unwrap().len() * 10).min(100) as u8
    }

    fn update_response(&self, updated_count: usize) -> UpdateResponse {
        let progress = self.progress();
        UpdateResponse {
            updated_count,
            progress,
            status: TaskStatus::derive(TaskStatus::NotStarted, progress),
            timestamp: self.timestamp(),
        }
    }

    fn snapshot(&self, task_id: TaskId) -> ProgressSnapshot {
        let progress = self.progress();
        ProgressSnapshot {
            task_id,
            progress,
            status: TaskStatus::derive(TaskStatus::NotStarted, progress),
            bulk_in_progress: false,
            timestamp: self.timestamp(),
        }
    }

    fn store_batch(&self, responses: &Responses) {
        self.batches.lock().unwrap().push(responses.clone());
        self.store
            .lock()
            .unwrap()
            .extend(responses.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    async fn field(&self, key: &str, value: &Value, silent: bool) -> Result<UpdateResponse, TransportError> {
        self.silent_flags.lock().unwrap().push(silent);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let accepted = self
            .accepted_fields
            .as_ref()
            .map_or(true, |fields| fields.contains(key));
        if !accepted {
            return Err(rejected());
        }

        let mut store = self.store.lock().unwrap();
        if is_empty_value(value) {
            store.remove(key);
        } else {
            store.insert(key.to_string(), value.clone());
        }
        drop(store);
        Ok(self.update_response(1))
    }
}

#[async_trait]
impl AssessmentTransport for MockTransport {
    async fn variant_batch(
        &self,
        _variant: AssessmentVariant,
        _task_id: TaskId,
        responses: &Responses,
    ) -> Result<UpdateResponse, TransportError> {
        self.record("variant_batch");
        if self.fail_variant_batch {
            return Err(rejected());
        }
        self.store_batch(responses);
        Ok(self.update_response(responses.len()))
    }

    async fn legacy_batch(
        &self,
        _task_id: TaskId,
        responses: &Responses,
    ) -> Result<UpdateResponse, TransportError> {
        self.record("legacy_batch");
        if self.fail_legacy_batch {
            return Err(rejected());
        }
        self.store_batch(responses);
        Ok(self.update_response(responses.len()))
    }

    async fn variant_field(
        &self,
        _variant: AssessmentVariant,
        _task_id: TaskId,
        field_key: &str,
        value: &Value,
        silent: bool,
    ) -> Result<UpdateResponse, TransportError> {
        self.record("variant_field");
        self.field(field_key, value, silent).await
    }

    async fn legacy_field(
        &self,
        _task_id: TaskId,
        field_key: &str,
        value: &Value,
        silent: bool,
    ) -> Result<UpdateResponse, TransportError> {
        self.record("legacy_field");
        self.field(field_key, value, silent).await
    }

    async fn recalculate(&self, task_id: TaskId) -> Result<ProgressSnapshot, TransportError> {
        self.record("recalculate");
        Ok(self.snapshot(task_id))
    }

    async fn progress(&self, task_id: TaskId) -> Result<ProgressSnapshot, TransportError> {
        self.record("progress");
        Ok(self.snapshot(task_id))
    }

    async fn responses(
        &self,
        _variant: AssessmentVariant,
        task_id: TaskId,
    ) -> Result<ResponsesSnapshot, TransportError> {
        self.record("responses");
        Ok(ResponsesSnapshot {
            snapshot: self.snapshot(task_id),
            responses: self.stored(),
        })
    }

    async fn clear(
        &self,
        _variant: AssessmentVariant,
        _task_id: TaskId,
    ) -> Result<BulkOperationResponse, TransportError> {
        self.record("clear");
        if self.fail_bulk {
            return Err(rejected());
        }
        let removed = std::mem::take(&mut *self.store.lock().unwrap()).len();
        Ok(BulkOperationResponse {
            success: true,
            message: format!("Cleared {} responses", removed),
            progress: 0,
            field_count: 0,
        })
    }

    async fn demo_autofill(
        &self,
        _variant: AssessmentVariant,
        _task_id: TaskId,
    ) -> Result<BulkOperationResponse, TransportError> {
        self.record("demo_autofill");
        if self.fail_bulk {
            return Err(rejected());
        }
        let demo: Responses = (1..=10)
            .map(|i| (format!("demo_{}", i), Value::from("yes")))
            .collect();
        *self.store.lock().unwrap() = demo;
        Ok(BulkOperationResponse {
            success: true,
            message: "Demo data generated".into(),
            progress: 100,
            field_count: 10,
        })
    }
}

type FeedItem = Result<FeedEvent, TransportError>;

/// Change feed whose connections are handed out from a script
///
/// Once the script is exhausted every further connection stays open and
/// silent.
#[derive(Default)]
pub(crate) struct MockFeed {
    script: Mutex<VecDeque<Result<mpsc::UnboundedReceiver<FeedItem>, TransportError>>>,
    pub(crate) connects: AtomicUsize,
}

impl MockFeed {
    /// Queue a connection; events sent on the returned sender reach the watcher
    pub(crate) fn push_connection(&self) -> mpsc::UnboundedSender<FeedItem> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script.lock().unwrap().push_back(Ok(rx));
        tx
    }

    pub(crate) fn push_failure(&self) {
        self.script.lock().unwrap().push_back(Err(TransportError::Network(
            "connection refused".into(),
        )));
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeFeed for MockFeed {
    async fn connect(&self, _task_id: TaskId) -> Result<BoxStream<'static, FeedItem>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            Some(Err(e)) => Err(e),
            None => Ok(stream::pending().boxed()),
        }
    }
}
