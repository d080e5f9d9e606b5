//! # diaflow-core - Diagram Compiler & Execution Engine
//!
//! DiaFlow executes user-authored **diagrams**: directed graphs whose
//! nodes are units of work (LLM calls, code execution, HTTP requests,
//! conditionals, file I/O, user prompts) and whose edges carry typed
//! data and control flow. This crate holds the three core subsystems:
//!
//! - **Compiler** - a six-phase pipeline that validates a declarative
//!   diagram, resolves handle references into edges, analyzes the graph
//!   and emits an immutable [`ExecutableDiagram`]
//! - **Engine** - a scheduler that walks the compiled graph honoring
//!   join policies, iteration caps and condition branch gates, driving
//!   node handlers as cooperative async tasks
//! - **Observer fabric** - a pub/sub bus that persists execution state
//!   and fans lifecycle events out to bounded per-subscription queues
//!
//! ## Architecture
//!
//! ```text
//!  DomainDiagram ──▶ DiagramCompiler ──▶ ExecutableDiagram
//!   (declarative)       6 phases            (immutable)
//!                          │                     │
//!                   RuleRegistry ◀───────── ExecutionEngine ──▶ ObserverBus
//!                (legality, transforms)     ready-set walk       │      │
//!                                                │          StateStore  │
//!                                          NodeHandlers      Observer   │
//!                                        (via ServiceRegistry)     Streaming
//!                                                                  queues
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use diaflow_core::{DiagramCompiler, ExecutionEngine, ServiceRegistry};
//! use std::sync::Arc;
//!
//! let compiler = DiagramCompiler::new();
//! let diagram = Arc::new(compiler.compile(&domain)?);
//!
//! let engine = ExecutionEngine::new(diagram, Arc::new(services));
//! let state = engine.run("exec-1").await?;
//! assert!(state.status == diaflow_state::ExecutionStatus::Completed);
//! ```
//!
//! ## Module Organization
//!
//! ### Model
//! - [`domain`] - declarative diagram model (compiler input)
//! - [`handles`] - handle algebra: parse/build/defaults
//! - [`nodes`] - typed node sum and the per-type factory
//! - [`diagram`] - the compiled, immutable artifact
//!
//! ### Compilation
//! - [`compile`] - the six-phase pipeline and the decompiler
//! - [`rules`] - pluggable connection/transform rule registry
//!
//! ### Execution
//! - [`engine`] - scheduler, dispatch loop, built-in handlers
//! - [`memory`] - per-person conversation memory
//! - [`retry`] - backoff policies for transient failures
//! - [`eval`] - built-in condition expression evaluator
//!
//! ### Integration surface
//! - [`services`] - typed service registry and standard keys
//! - [`ports`] - async ports implemented by collaborators
//! - [`events`] - lifecycle events, observers, streaming queues
//! - [`formats`] - Native/Light/Readable serialization
//! - [`storage`] - filesystem-backed diagram storage
//! - [`error`] - error taxonomy

pub mod compile;
pub mod diagram;
pub mod domain;
pub mod engine;
pub mod error;
pub mod eval;
pub mod events;
pub mod formats;
pub mod handles;
pub mod memory;
pub mod nodes;
pub mod ports;
pub mod retry;
pub mod rules;
pub mod services;
pub mod storage;

// Re-export main types
pub use compile::{CompilationPhase, CompilationResult, DiagramCompiler};
pub use diagram::{ExecutableDiagram, ExecutableEdge};
pub use domain::{DomainArrow, DomainDiagram, DomainNode, DomainPerson, NodeType};
pub use engine::{
    EngineOptions, ErrorPolicy, ExecutionContext, ExecutionEngine, HandlerRegistry, NodeHandler,
    NodeOutput,
};
pub use error::{DiagramError, ErrorKind, Result};
pub use events::{
    ExecutionEvent, ExecutionObserver, ObserverBus, StateStoreObserver, StreamingObserver,
};
pub use handles::{build_handle_id, default_handles, parse_handle_id, HandleDirection, HandleLabel};
pub use memory::{ConversationMemory, Message, MessageRole};
pub use nodes::{ContextCleaningRule, ExecutableNode, JoinPolicy, NodeFactory};
pub use retry::{RetryPolicy, RetryState};
pub use rules::{default_registry, RuleCategory, RuleKey, RulePriority, RuleRegistry};
pub use services::{ServiceKey, ServiceRegistry};

// The state model lives in diaflow-state; re-export the common types.
pub use diaflow_state::{
    ExecutionState, ExecutionStatus, InMemoryStateStore, NodeExecutionStatus, SkipReason,
    StateStore, TokenUsage,
};
