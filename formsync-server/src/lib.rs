//! formsync-server library interface
//!
//! Exposes the router and state for the binary and for integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod sse;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use formsync_common::{BulkGate, CatalogSet};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::sse::ChangeBroadcaster;

/// Default upper bound for lock retries when no config is supplied
const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Field catalogs for every assessment variant
    pub catalogs: Arc<CatalogSet>,
    /// Scoped change broadcaster feeding GET /events
    pub broadcaster: ChangeBroadcaster,
    /// Task-scoped bulk operation gate
    pub bulk_gate: BulkGate,
    /// Upper bound for retrying writes on lock contention
    pub max_lock_wait_ms: u64,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// State with built-in defaults (used by tests)
    pub fn new(db: SqlitePool, catalogs: CatalogSet) -> Self {
        Self {
            db,
            catalogs: Arc::new(catalogs),
            broadcaster: ChangeBroadcaster::new(100),
            bulk_gate: BulkGate::default(),
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
            startup_time: Utc::now(),
        }
    }

    /// State configured from the server configuration
    pub fn from_config(db: SqlitePool, catalogs: CatalogSet, config: &ServerConfig) -> Self {
        Self {
            broadcaster: ChangeBroadcaster::new(config.broadcast_capacity),
            bulk_gate: BulkGate::new(config.bulk_settle()),
            max_lock_wait_ms: config.max_lock_wait_ms,
            ..Self::new(db, catalogs)
        }
    }

    /// Replace the bulk gate settle delay
    pub fn with_bulk_settle(mut self, settle: Duration) -> Self {
        self.bulk_gate = BulkGate::new(settle);
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::response_routes())
        .merge(api::bulk_routes())
        .merge(api::progress_routes())
        .merge(api::sse_routes())
        .merge(api::health_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
