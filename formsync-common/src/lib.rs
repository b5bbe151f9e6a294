//! # formsync Common Library
//!
//! Shared code for the formsync server and client:
//! - Domain models and wire types
//! - Field catalogs per assessment variant
//! - Field Format Normalizer and Progress Calculator
//! - Broadcast event types (BroadcastEvent, EventBus)
//! - Task-scoped bulk operation gate
//! - Configuration loading and time helpers

pub mod bulk_gate;
pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod time;

pub use bulk_gate::{BulkGate, BulkGuard};
pub use catalog::{CatalogSet, FieldCatalog, FieldDefinition};
pub use error::{Error, Result};
pub use events::{BroadcastEvent, EventBus, EventKind};
pub use models::{
    AssessmentVariant, CompanyId, ProgressSnapshot, ResponsePayload, Responses,
    ResponsesSnapshot, Task, TaskId, TaskStatus,
};
