//! Execution engine: scheduler, handlers, dispatch loop
//!
//! - [`scheduler`] - ready-set walk, join policies, iteration caps,
//!   branch gates
//! - [`inputs`] - per-edge input resolution and transforms
//! - [`context`] - the [`ExecutionContext`] and [`NodeOutput`] contracts
//! - [`handlers`] - [`NodeHandler`] trait, registry and built-ins
//! - [`breaker`] - per-node-type circuit breaker
//! - [`runner`] - the [`ExecutionEngine`] tick loop

pub mod breaker;
pub mod context;
pub mod handlers;
pub mod inputs;
pub mod runner;
pub mod scheduler;

pub use breaker::{BreakerConfig, CircuitBreaker};
pub use context::{ExecutionContext, NodeOutput};
pub use handlers::{HandlerRegistry, NodeHandler};
pub use inputs::InputMap;
pub use runner::{EngineOptions, ErrorPolicy, ExecutionEngine};
pub use scheduler::{ExecutionView, Scheduler, TickDecisions};
