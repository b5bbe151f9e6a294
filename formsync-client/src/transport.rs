//! Server transport
//!
//! [`AssessmentTransport`] is the seam between the coordinator/session and
//! the HTTP API; [`ChangeFeed`] is the SSE side. [`HttpTransport`] implements
//! both with reqwest.

use async_trait::async_trait;
use formsync_common::models::{
    AssessmentVariant, BulkOperationResponse, ProgressSnapshot, Responses, ResponsesSnapshot,
    TaskId, UpdateResponse,
};
use formsync_common::BroadcastEvent;
use futures::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::sse_parser::{SseFrame, SseParser};

/// Calls against the assessment API
#[async_trait]
pub trait AssessmentTransport: Send + Sync {
    /// POST /assessment/{variant}/batch-update/{taskId}
    async fn variant_batch(
        &self,
        variant: AssessmentVariant,
        task_id: TaskId,
        responses: &Responses,
    ) -> Result<UpdateResponse, TransportError>;

    /// POST /assessment/legacy-batch-update/{taskId}
    async fn legacy_batch(
        &self,
        task_id: TaskId,
        responses: &Responses,
    ) -> Result<UpdateResponse, TransportError>;

    /// POST /assessment/{variant}/response/{taskId}/{fieldKey}
    async fn variant_field(
        &self,
        variant: AssessmentVariant,
        task_id: TaskId,
        field_key: &str,
        value: &Value,
        silent: bool,
    ) -> Result<UpdateResponse, TransportError>;

    /// POST /assessment/legacy-response/{taskId}/{fieldKey}
    async fn legacy_field(
        &self,
        task_id: TaskId,
        field_key: &str,
        value: &Value,
        silent: bool,
    ) -> Result<UpdateResponse, TransportError>;

    /// POST /assessment/progress/{taskId}/recalculate
    async fn recalculate(&self, task_id: TaskId) -> Result<ProgressSnapshot, TransportError>;

    /// GET /assessment/progress/{taskId}
    async fn progress(&self, task_id: TaskId) -> Result<ProgressSnapshot, TransportError>;

    /// GET /assessment/{variant}/responses/{taskId}
    async fn responses(
        &self,
        variant: AssessmentVariant,
        task_id: TaskId,
    ) -> Result<ResponsesSnapshot, TransportError>;

    /// POST /assessment/{variant}/clear/{taskId}
    async fn clear(
        &self,
        variant: AssessmentVariant,
        task_id: TaskId,
    ) -> Result<BulkOperationResponse, TransportError>;

    /// POST /assessment/{variant}/demo-autofill/{taskId}
    async fn demo_autofill(
        &self,
        variant: AssessmentVariant,
        task_id: TaskId,
    ) -> Result<BulkOperationResponse, TransportError>;
}

/// Item of the change feed
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// First frame of every connection
    Connected,
    Change(BroadcastEvent),
}

/// Subscription to the server's change feed for one task
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn connect(
        &self,
        task_id: TaskId,
    ) -> Result<BoxStream<'static, Result<FeedEvent, TransportError>>, TransportError>;
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    /// Client without a total timeout, for the long-lived SSE stream
    stream_client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let user_agent = concat!("formsync-client/", env!("CARGO_PKG_VERSION"));

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        let stream_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            stream_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        Self::new(config.base_url.clone(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, TransportError> {
        debug!(path, "POST");
        let mut request = self.client.post(self.url(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        Self::read(request.send().await?).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        debug!(path, "GET");
        Self::read(self.client.get(self.url(path)).send().await?).await
    }
}

/// Single-field endpoint path with the key as one escaped segment
fn field_path(prefix: &str, field_key: &str, silent: bool) -> String {
    format!(
        "{}/{}?silent={}",
        prefix,
        urlencoding::encode(field_key),
        silent
    )
}

#[async_trait]
impl AssessmentTransport for HttpTransport {
    async fn variant_batch(
        &self,
        variant: AssessmentVariant,
        task_id: TaskId,
        responses: &Responses,
    ) -> Result<UpdateResponse, TransportError> {
        let path = format!("/assessment/{}/batch-update/{}", variant, task_id);
        self.post(&path, Some(json!({ "responses": responses }))).await
    }

    async fn legacy_batch(
        &self,
        task_id: TaskId,
        responses: &Responses,
    ) -> Result<UpdateResponse, TransportError> {
        let path = format!("/assessment/legacy-batch-update/{}", task_id);
        self.post(&path, Some(json!({ "responses": responses }))).await
    }

    async fn variant_field(
        &self,
        variant: AssessmentVariant,
        task_id: TaskId,
        field_key: &str,
        value: &Value,
        silent: bool,
    ) -> Result<UpdateResponse, TransportError> {
        let path = field_path(
            &format!("/assessment/{}/response/{}", variant, task_id),
            field_key,
            silent,
        );
        self.post(&path, Some(json!({ "value": value }))).await
    }

    async fn legacy_field(
        &self,
        task_id: TaskId,
        field_key: &str,
        value: &Value,
        silent: bool,
    ) -> Result<UpdateResponse, TransportError> {
        let path = field_path(
            &format!("/assessment/legacy-response/{}", task_id),
            field_key,
            silent,
        );
        self.post(&path, Some(json!({ "value": value }))).await
    }

    async fn recalculate(&self, task_id: TaskId) -> Result<ProgressSnapshot, TransportError> {
        self.post(&format!("/assessment/progress/{}/recalculate", task_id), None)
            .await
    }

    async fn progress(&self, task_id: TaskId) -> Result<ProgressSnapshot, TransportError> {
        self.get(&format!("/assessment/progress/{}", task_id)).await
    }

    async fn responses(
        &self,
        variant: AssessmentVariant,
        task_id: TaskId,
    ) -> Result<ResponsesSnapshot, TransportError> {
        self.get(&format!("/assessment/{}/responses/{}", variant, task_id))
            .await
    }

    async fn clear(
        &self,
        variant: AssessmentVariant,
        task_id: TaskId,
    ) -> Result<BulkOperationResponse, TransportError> {
        self.post(&format!("/assessment/{}/clear/{}", variant, task_id), None)
            .await
    }

    async fn demo_autofill(
        &self,
        variant: AssessmentVariant,
        task_id: TaskId,
    ) -> Result<BulkOperationResponse, TransportError> {
        self.post(
            &format!("/assessment/{}/demo-autofill/{}", variant, task_id),
            None,
        )
        .await
    }
}

/// Map a parsed SSE frame to a feed item; unknown frames are skipped
fn frame_to_event(frame: SseFrame) -> Option<Result<FeedEvent, TransportError>> {
    match frame.event.as_deref() {
        Some("connected") => Some(Ok(FeedEvent::Connected)),
        Some(_) | None => match serde_json::from_str::<BroadcastEvent>(&frame.data) {
            Ok(event) => Some(Ok(FeedEvent::Change(event))),
            Err(e) => {
                warn!(event = ?frame.event, "Ignoring unparseable SSE frame: {}", e);
                None
            }
        },
    }
}

/// Decode the longest valid UTF-8 prefix, keeping a split code point buffered
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) => e.valid_up_to(),
    };
    let rest = pending.split_off(valid);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    text
}

#[async_trait]
impl ChangeFeed for HttpTransport {
    async fn connect(
        &self,
        task_id: TaskId,
    ) -> Result<BoxStream<'static, Result<FeedEvent, TransportError>>, TransportError> {
        let response = self
            .stream_client
            .get(self.url("/events"))
            .query(&[("taskId", task_id)])
            .header("accept", "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut parser = SseParser::new();
        let mut pending = Vec::new();

        let events = response
            .bytes_stream()
            .map(move |chunk| -> Vec<Result<FeedEvent, TransportError>> {
                match chunk {
                    Ok(bytes) => {
                        pending.extend_from_slice(&bytes);
                        let text = take_utf8(&mut pending);
                        parser
                            .feed(&text)
                            .into_iter()
                            .filter_map(frame_to_event)
                            .collect()
                    }
                    Err(e) => vec![Err(TransportError::from(e))],
                }
            })
            .flat_map(futures::stream::iter);

        Ok(events.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_path_escapes_key_segment() {
        assert_eq!(
            field_path("/assessment/legacy-response/4", "legal_entity_name", true),
            "/assessment/legacy-response/4/legal_entity_name?silent=true"
        );
        assert_eq!(
            field_path("/assessment/a/response/4", "a b/c?d", false),
            "/assessment/a/response/4/a%20b%2Fc%3Fd?silent=false"
        );
    }

    #[test]
    fn test_take_utf8_keeps_split_code_point() {
        let bytes = "é".as_bytes();
        let mut pending = vec![b'a', bytes[0]];
        assert_eq!(take_utf8(&mut pending), "a");
        assert_eq!(pending.len(), 1);

        pending.push(bytes[1]);
        assert_eq!(take_utf8(&mut pending), "é");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_frame_mapping() {
        let connected = SseFrame {
            event: Some("connected".into()),
            data: "{}".into(),
            id: None,
        };
        assert_eq!(frame_to_event(connected).unwrap().unwrap(), FeedEvent::Connected);

        let change = SseFrame {
            event: Some("task_updated".into()),
            data: serde_json::to_string(&BroadcastEvent::task_updated(3)).unwrap(),
            id: None,
        };
        match frame_to_event(change).unwrap().unwrap() {
            FeedEvent::Change(event) => assert_eq!(event.task_id, 3),
            other => panic!("unexpected {:?}", other),
        }

        let garbage = SseFrame {
            event: Some("task_updated".into()),
            data: "nope".into(),
            id: None,
        };
        assert!(frame_to_event(garbage).is_none());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let transport = HttpTransport::new("http://localhost:1/", Duration::from_secs(1)).unwrap();
        assert_eq!(transport.url("/health"), "http://localhost:1/health");
    }
}
