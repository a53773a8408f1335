//! studiobook — reservation admission & commit engine for a tutoring studio.
//!
//! Students book one-hour study slots. The engine validates each request
//! against per-slot seat capacity, per-day and per-month quotas, and commits
//! every accepted batch atomically against WAL-backed ledgers, so concurrent
//! requests can never overshoot a limit.

pub mod compactor;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
mod store;
mod wal;

pub use engine::{Engine, EngineError};
