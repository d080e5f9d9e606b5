//! # diaflow-state - Execution State Model & Persistence Port
//!
//! Foundation crate for DiaFlow holding the per-execution state model and
//! the [`StateStore`] persistence trait. The core engine crate depends on
//! this crate; storage backends implement [`StateStore`] against it without
//! pulling in the compiler or scheduler.
//!
//! ## What lives here
//!
//! - [`ExecutionState`] - mutable per-run record: node statuses, outputs,
//!   iteration counters, aggregate token totals
//! - [`NodeState`] / [`NodeExecutionStatus`] / [`SkipReason`] - per-node
//!   lifecycle with structured skip reasons
//! - [`TokenUsage`] - additive token accounting
//! - [`StateStore`] - async persistence port with an idempotent
//!   `create_execution` and a best-effort `persist` durability barrier
//! - [`InMemoryStateStore`] - reference backend for development and tests
//!
//! ## Ownership model
//!
//! One [`ExecutionState`] per execution id. The engine is the single
//! writer; every other party reads snapshots or goes through the store.

pub mod error;
pub mod state;
pub mod store;

pub use error::{Result, StateError};
pub use state::{
    ExecutionState, ExecutionStatus, NodeExecutionStatus, NodeState, SkipReason, TokenUsage,
};
pub use store::{InMemoryStateStore, StateStore};
