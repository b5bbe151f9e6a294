//! formsync-client: client side of response reconciliation
//!
//! - [`transport`]: reqwest calls against the assessment API and the SSE feed
//! - [`coordinator`]: Batch Update Coordinator walking a [`FallbackChain`]
//! - [`cache`]: Client Reconciliation Cache
//! - [`session`]: autosaving session with bulk operations
//! - [`watcher`]: change-feed consumer with pull-based resync

pub mod cache;
pub mod chain;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod session;
pub mod sse_parser;
pub mod transport;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{PendingFlush, ReconciliationCache, SnapshotOutcome};
pub use chain::{FallbackChain, Stage, StageKind};
pub use config::ClientConfig;
pub use coordinator::{BatchCoordinator, BatchOutcome};
pub use error::{ClientError, ClientResult, TransportError};
pub use session::{AssessmentSession, FlushReport};
pub use transport::{AssessmentTransport, ChangeFeed, FeedEvent, HttpTransport};
pub use watcher::TaskWatcher;
