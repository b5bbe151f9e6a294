//! Change Broadcaster: scoped SSE fan-out of task change events

pub mod broadcaster;

pub use broadcaster::{ChangeBroadcaster, Scope};
