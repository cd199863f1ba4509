//! The named-lock registry backing the scheduler's "already running"
//! semantics (spec.md §4.I) is pure in-process coordination with no I/O,
//! so it lives with its only caller at
//! `application::scheduler::{LockRegistry, LockGuard}` rather than here.
//! Re-exported for callers that reach for locks through the
//! infrastructure module path.

pub use crate::application::scheduler::{LockGuard, LockRegistry};
