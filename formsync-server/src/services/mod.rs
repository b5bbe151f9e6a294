//! Server-side services behind the HTTP handlers

pub mod bulk_populator;
pub mod demo_data;
pub mod progress_service;

pub use bulk_populator::{BulkMode, BulkOutcome};
