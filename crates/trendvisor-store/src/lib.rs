//! Durable task-state storage for the Trendvisor pipeline.
//!
//! Every task is stored as one JSON snapshot keyed by `task:<task_id>`.
//! Status transitions and write-once fields are enforced by
//! [`TaskRecord::apply`](trendvisor_core::TaskRecord::apply), so both
//! backends give the same guarantees.

/// File-per-task backend.
pub mod file;
/// In-process backend.
pub mod memory;
/// The store trait and snapshot encoding.
pub mod store;

pub use file::FileStateStore;
pub use memory::InMemoryStateStore;
pub use store::{task_key, SharedStore, StateStore};
