//! Error types for formsync-client

use formsync_common::models::TaskId;
use thiserror::Error;

/// Failure of a single call to the server
///
/// Inside the coordinator every variant just means "try the next stage".
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection, timeout or protocol failure
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// 2xx response with an unreadable body
    #[error("Decode error: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Every persistence stage ran and nothing was stored
    #[error(
        "Could not save {attempted} field(s) for task {task_id}: every save strategy failed. \
         Your edits are kept locally; check your connection and retry."
    )]
    TotalFailure { task_id: TaskId, attempted: usize },

    /// A bulk operation is running for the task
    #[error("Bulk operation in progress for task {0}")]
    BulkInProgress(TaskId),

    #[error(transparent)]
    Common(#[from] formsync_common::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
