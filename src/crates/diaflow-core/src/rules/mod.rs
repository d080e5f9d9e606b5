//! Pluggable connection-legality and data-transform rules
//!
//! The rule registry governs which node-type connections are legal and how
//! data is transformed between node types. It is consulted by the compiler
//! (edge legality, transform population) and by the engine (input
//! transforms).
//!
//! - [`registry`] - [`RuleRegistry`]: registration semantics, priorities,
//!   immutability, freeze, temporary overrides and the audit trail
//! - [`builtin`] - the default rule set (`start_no_input`,
//!   `endpoint_no_output`, `output_capable`, `personjob_tool_extraction`)

pub mod builtin;
pub mod registry;

pub use builtin::register_default_rules;
pub use registry::{
    default_registry, AuditAction, AuditRecord, ConnectionRule, Environment, RegisterOptions,
    RuleCategory, RuleImpl, RuleKey, RulePriority, RuleRegistry, TemporaryOverride, TransformRule,
};
