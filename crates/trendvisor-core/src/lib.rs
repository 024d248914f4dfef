//! Core types and error definitions for the Trendvisor pipeline.
//!
//! This crate provides the types shared by the bus, the state store and the
//! agents: the typed event envelope, the durable task record with its state
//! machine, the presentation sink and the unified error type.
//!
//! # Main types
//!
//! - [`TrendvisorError`]: Unified error enum for all Trendvisor subsystems.
//! - [`TrendvisorResult`]: Convenience alias for `Result<T, TrendvisorError>`.
//! - [`Event`] / [`EventPayload`] / [`EventType`]: Typed bus events.
//! - [`TaskRecord`] / [`TaskStatus`] / [`TaskUpdate`]: Durable task state.
//! - [`PipelineObserver`] / [`StatusRecord`]: Presentation sink.
//!
//! # Error classes
//!
//! | class | raised by | handled by |
//! |---|---|---|
//! | [`TrendvisorError::Validation`] | event decoding, record invariants | logged and dropped |
//! | [`TrendvisorError::Tool`] | stage tools | owning agent, surfaced as `TASK_FAILED` |
//! | [`TrendvisorError::StoreUnavailable`], [`TrendvisorError::BusUnavailable`] | construction | fatal |
//! | [`TrendvisorError::Agent`] | handler faults | agent worker, logged |

/// Error types.
pub mod error;
/// Bus event envelope and payloads.
pub mod event;
/// Presentation sink.
pub mod observer;
/// Task record and status state machine.
pub mod task;

pub use error::{ToolFailure, TrendvisorError, TrendvisorResult};
pub use event::{Event, EventEnvelope, EventPayload, EventType};
pub use observer::{
    PipelineObserver, RecordingObserver, SharedObserver, StatusRecord, TracingObserver,
};
pub use task::{TaskRecord, TaskStatus, TaskUpdate, DATA_PATH, REPORT_PATH};
