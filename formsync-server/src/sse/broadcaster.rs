//! Scoped SSE broadcaster
//!
//! Each scope (one task, or every task of one company) owns an [`EventBus`].
//! Publishing is best effort: a lagging or disconnected connection simply
//! misses events and is expected to pull the progress snapshot on reconnect.

use axum::response::sse::{Event, KeepAlive, Sse};
use formsync_common::models::{CompanyId, TaskId};
use formsync_common::{BroadcastEvent, EventBus};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// Event name of the first frame on every connection
pub const CONNECTED_EVENT: &str = "connected";

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Subscription scope of an SSE connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Task(TaskId),
    Company(CompanyId),
}

/// Registry of per-scope event buses
#[derive(Clone)]
pub struct ChangeBroadcaster {
    scopes: Arc<Mutex<HashMap<Scope, EventBus>>>,
    capacity: usize,
}

impl ChangeBroadcaster {
    /// `capacity` is the per-scope buffer; slower connections lag past it
    pub fn new(capacity: usize) -> Self {
        info!("Change broadcaster initialized with capacity {}", capacity);
        Self {
            scopes: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Scope, EventBus>> {
        self.scopes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to future events of `scope`
    pub fn subscribe(&self, scope: Scope) -> broadcast::Receiver<BroadcastEvent> {
        self.lock()
            .entry(scope)
            .or_insert_with(|| EventBus::new(self.capacity))
            .subscribe()
    }

    /// Publish to the task scope and the owning company scope
    ///
    /// Returns the number of connections reached. Scopes left without
    /// subscribers are pruned.
    pub fn publish(&self, company_id: CompanyId, event: BroadcastEvent) -> usize {
        let mut scopes = self.lock();

        let mut reached = 0;
        for scope in [Scope::Task(event.task_id), Scope::Company(company_id)] {
            if let Some(bus) = scopes.get(&scope) {
                reached += bus.emit_lossy(event.clone());
            }
        }

        scopes.retain(|_, bus| bus.subscriber_count() > 0);

        debug!(
            task_id = event.task_id,
            company_id,
            event = event.event_type(),
            reached,
            "Published change event"
        );
        reached
    }

    /// Number of scopes with live subscribers (as of the last prune)
    pub fn scope_count(&self) -> usize {
        self.lock().len()
    }

    pub fn subscriber_count(&self, scope: Scope) -> usize {
        self.lock().get(&scope).map_or(0, EventBus::subscriber_count)
    }

    /// SSE event stream for a new connection to `scope`
    ///
    /// The first frame is always `connected`; clients pull the authoritative
    /// snapshot on it before trusting later events.
    pub fn subscribe_stream(&self, scope: Scope) -> impl Stream<Item = Result<Event, Infallible>> {
        let rx = self.subscribe(scope);

        let connected = Event::default()
            .event(CONNECTED_EVENT)
            .data(connected_payload(scope).to_string());

        let events = BroadcastStream::new(rx).filter_map(move |result| async move {
            match result {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => Some(Ok(Event::default().event(event.event_type()).data(json))),
                    Err(e) => {
                        warn!("Failed to serialize change event: {}", e);
                        None
                    }
                },
                Err(e) => {
                    // Lagged: the client catches up through its next resync
                    warn!(?scope, "SSE connection lagging: {}", e);
                    None
                }
            }
        });

        stream::once(async move { Ok(connected) }).chain(events)
    }

    /// Axum SSE response for GET /events
    pub fn handle_sse_connection(
        &self,
        scope: Scope,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let stream = self.subscribe_stream(scope);
        info!(
            ?scope,
            subscribers = self.subscriber_count(scope),
            "New SSE connection"
        );

        Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(KEEP_ALIVE_INTERVAL)
                .text("keep-alive"),
        )
    }
}

fn connected_payload(scope: Scope) -> serde_json::Value {
    let timestamp = formsync_common::time::now();
    match scope {
        Scope::Task(task_id) => json!({"type": CONNECTED_EVENT, "taskId": task_id, "timestamp": timestamp}),
        Scope::Company(company_id) => {
            json!({"type": CONNECTED_EVENT, "companyId": company_id, "timestamp": timestamp})
        }
    }
}
