//! Change-feed watcher with pull-based resync
//!
//! Events are only hints: on every connect, on every event for the task and
//! on an optional interval the watcher pulls the authoritative snapshot. A
//! dropped stream is reconnected with capped exponential backoff.

use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::session::AssessmentSession;
use crate::transport::{ChangeFeed, FeedEvent};

pub struct TaskWatcher {
    session: AssessmentSession,
    feed: Arc<dyn ChangeFeed>,
    resync_interval: Option<Duration>,
    reconnect_initial: Duration,
    reconnect_max: Duration,
}

impl TaskWatcher {
    pub fn new(session: AssessmentSession, feed: Arc<dyn ChangeFeed>, config: &ClientConfig) -> Self {
        let (reconnect_initial, reconnect_max) = config.reconnect_bounds();
        Self {
            session,
            feed,
            resync_interval: config.resync_interval(),
            reconnect_initial,
            reconnect_max,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Watch until the task is aborted
    pub async fn run(self) {
        let task_id = self.session.task_id();
        let mut backoff = self.reconnect_initial;

        loop {
            match self.feed.connect(task_id).await {
                Ok(stream) => {
                    info!(task_id, "Change feed connected");
                    backoff = self.reconnect_initial;
                    self.resync("connect").await;
                    self.consume(stream).await;
                }
                Err(e) => {
                    warn!(task_id, "Change feed connection failed: {}", e);
                }
            }

            debug!(task_id, delay_ms = backoff.as_millis() as u64, "Reconnecting change feed");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.reconnect_max);
        }
    }

    async fn consume(
        &self,
        mut stream: BoxStream<'static, Result<FeedEvent, TransportError>>,
    ) {
        let task_id = self.session.task_id();
        let mut interval = self.resync_interval.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(FeedEvent::Connected)) => debug!(task_id, "Change feed handshake"),
                    Some(Ok(FeedEvent::Change(event))) if event.task_id == task_id => {
                        debug!(task_id, event = event.event_type(), "Change notification");
                        self.resync("event").await;
                    }
                    Some(Ok(FeedEvent::Change(_))) => {}
                    Some(Err(e)) => {
                        warn!(task_id, "Change feed error: {}", e);
                        return;
                    }
                    None => {
                        info!(task_id, "Change feed closed");
                        return;
                    }
                },
                _ = tick(&mut interval) => self.resync("interval").await,
            }
        }
    }

    async fn resync(&self, reason: &'static str) {
        if let Err(e) = self.session.resync().await {
            warn!(task_id = self.session.task_id(), reason, "Resync failed: {}", e);
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFeed, MockTransport};
    use formsync_common::models::AssessmentVariant;
    use formsync_common::{BroadcastEvent, FieldCatalog};

    fn config() -> ClientConfig {
        ClientConfig {
            resync_interval_ms: None,
            reconnect_initial_ms: 100,
            reconnect_max_ms: 400,
            ..Default::default()
        }
    }

    fn setup(config: &ClientConfig) -> (Arc<MockTransport>, Arc<MockFeed>, TaskWatcher) {
        let transport = Arc::new(MockTransport::default());
        let feed = Arc::new(MockFeed::default());
        let session = AssessmentSession::new(
            3,
            FieldCatalog::builtin(AssessmentVariant::B),
            transport.clone(),
            config,
        );
        let watcher = TaskWatcher::new(session, feed.clone(), config);
        (transport, feed, watcher)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resyncs_on_connect_and_relevant_events() {
        let config = config();
        let (transport, feed, watcher) = setup(&config);
        let events = feed.push_connection();
        let handle = watcher.spawn();

        settle().await;
        assert_eq!(transport.calls("responses"), 1);

        events.send(Ok(FeedEvent::Connected)).unwrap();
        events
            .send(Ok(FeedEvent::Change(BroadcastEvent::task_updated(3))))
            .unwrap();
        events
            .send(Ok(FeedEvent::Change(BroadcastEvent::task_updated(99))))
            .unwrap();
        settle().await;
        assert_eq!(transport.calls("responses"), 2);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_with_backoff_and_resyncs() {
        let config = config();
        let (transport, feed, watcher) = setup(&config);
        feed.push_failure();
        feed.push_failure();
        let events = feed.push_connection();
        let handle = watcher.spawn();

        // Failures at t=0 and t=100, connected at t=300
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(feed.connects(), 2);
        assert_eq!(transport.calls("responses"), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(feed.connects(), 3);
        assert_eq!(transport.calls("responses"), 1);

        // Stream error: reconnect after the reset initial delay and resync again
        events
            .send(Err(TransportError::Network("reset".into())))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(feed.connects(), 4);
        assert_eq!(transport.calls("responses"), 2);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_resync() {
        let config = ClientConfig {
            resync_interval_ms: Some(1000),
            ..config()
        };
        let (transport, feed, watcher) = setup(&config);
        let _events = feed.push_connection();
        let handle = watcher.spawn();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(transport.calls("responses"), 3);

        handle.abort();
    }
}
