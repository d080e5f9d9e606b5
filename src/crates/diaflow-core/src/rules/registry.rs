//! Thread-safe rule registry with priorities, freeze and audit trail
//!
//! # Registration semantics
//!
//! - Registering under an existing name fails unless the caller passes
//!   `override_existing` or the environment policy allows overrides
//!   (development/testing default to allowed, production to forbidden).
//! - Rules registered `immutable` can never be rebound, and unregistering
//!   them requires `force`.
//! - A frozen registry refuses to rebind *existing* names; brand-new
//!   registrations stay allowed. Freezing twice is a no-op; unfreezing in
//!   production requires `force`.
//! - Every mutation (including failed ones) lands in a bounded audit trail
//!   with best-effort caller attribution.
//!
//! # Evaluation semantics
//!
//! - Connection rules run in descending priority order; the first denial
//!   stops evaluation (fail-closed).
//! - Transform rules run in ascending priority order and their maps are
//!   merged, so higher-priority fields override lower ones.
//!
//! # Concurrency
//!
//! The registry is read-mostly. All access goes through a single
//! `parking_lot::RwLock`; public methods lock exactly once and never call
//! back into other public methods while holding the guard.
//!
//! # Examples
//!
//! ```rust
//! use diaflow_core::rules::{RuleRegistry, RuleKey, RuleCategory, RulePriority,
//!                           ConnectionRule, Environment, RegisterOptions};
//! use diaflow_core::domain::NodeType;
//! use std::sync::Arc;
//!
//! struct DenyAll;
//! impl ConnectionRule for DenyAll {
//!     fn can_connect(&self, _: NodeType, _: NodeType) -> bool { false }
//! }
//!
//! let registry = RuleRegistry::new(Environment::Testing);
//! let key = RuleKey::new("deny_all", RuleCategory::Connection)
//!     .with_priority(RulePriority::Critical);
//! registry
//!     .register_connection_rule(key, Arc::new(DenyAll), RegisterOptions::default())
//!     .unwrap();
//!
//! assert!(!registry.can_connect(NodeType::Start, NodeType::CodeJob));
//! ```

use crate::domain::NodeType;
use crate::error::{DiagramError, Result};
use crate::nodes::ExecutableNode;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::panic::Location;
use std::sync::{Arc, OnceLock};

/// Categories of execution rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleCategory {
    /// Node connection legality rules
    Connection,
    /// Data transformation rules
    Transform,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Transform => "transform",
        }
    }
}

/// Priority levels for rule evaluation. Higher values run first for
/// connection checks and override last for transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RulePriority {
    Fallback = 100,
    Low = 250,
    Normal = 500,
    High = 750,
    Critical = 1000,
}

impl Default for RulePriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Runtime environment driving override policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Testing,
    Production,
}

impl Environment {
    /// Resolve the environment from `DIAFLOW_ENV`, defaulting to
    /// development.
    pub fn from_env() -> Self {
        match std::env::var("DIAFLOW_ENV").as_deref() {
            Ok("production") | Ok("prod") => Self::Production,
            Ok("testing") | Ok("test") => Self::Testing,
            _ => Self::Development,
        }
    }

    /// Default override policy for this environment.
    pub fn allows_override(&self) -> bool {
        !matches!(self, Self::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Testing => "testing",
            Self::Production => "production",
        }
    }
}

/// Metadata key identifying a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleKey {
    /// Unique name within the category
    pub name: String,
    /// Rule category
    pub category: RuleCategory,
    /// Evaluation priority
    pub priority: RulePriority,
    /// Human-readable description
    pub description: String,
    /// Immutable rules can never be rebound
    pub immutable: bool,
    /// Names of rules this rule depends on (informational)
    pub dependencies: Vec<String>,
}

impl RuleKey {
    /// Create a key with normal priority and no flags.
    pub fn new(name: impl Into<String>, category: RuleCategory) -> Self {
        Self {
            name: name.into(),
            category,
            priority: RulePriority::Normal,
            description: String::new(),
            immutable: false,
            dependencies: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: RulePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    /// Qualified `category:name` form used in the audit trail.
    pub fn qualified(&self) -> String {
        format!("{}:{}", self.category.as_str(), self.name)
    }
}

/// Connection legality rule: may this source type feed that target type?
pub trait ConnectionRule: Send + Sync {
    /// Whether a connection between the two node types is allowed.
    fn can_connect(&self, source_type: NodeType, target_type: NodeType) -> bool;

    /// Human-readable reason when the connection is denied.
    fn reason(&self, source_type: NodeType, target_type: NodeType) -> Option<String> {
        if self.can_connect(source_type, target_type) {
            None
        } else {
            Some(format!(
                "Connection from {source_type} to {target_type} is not allowed"
            ))
        }
    }
}

/// Data transform rule: extra edge transform entries for a node pair.
pub trait TransformRule: Send + Sync {
    /// Whether this rule applies to the given node pair.
    fn applies_to(&self, source: &ExecutableNode, target: &ExecutableNode) -> bool;

    /// Transform entries to merge into the edge's transform map.
    fn transform(
        &self,
        source: &ExecutableNode,
        target: &ExecutableNode,
    ) -> serde_json::Map<String, serde_json::Value>;
}

/// A rule implementation paired with its category, used by
/// [`RuleRegistry::temporary_override`].
#[derive(Clone)]
pub enum RuleImpl {
    Connection(Arc<dyn ConnectionRule>),
    Transform(Arc<dyn TransformRule>),
}

/// Action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Register,
    Override,
    Unregister,
    Freeze,
    Unfreeze,
    TempOverride,
    TempRestore,
    RegisterFailed,
    UnregisterFailed,
    UnfreezeFailed,
}

/// One entry of the bounded audit trail.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub rule_key: String,
    pub category: RuleCategory,
    pub action: AuditAction,
    pub caller: String,
    pub environment: Environment,
    pub success: bool,
    pub error: Option<String>,
    pub override_reason: Option<String>,
}

/// Options for rule registration.
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Allow rebinding an existing name regardless of environment policy
    pub override_existing: bool,
    /// Reason for the override, recorded in the audit trail
    pub reason: Option<String>,
}

impl RegisterOptions {
    /// Explicit override with a recorded reason.
    pub fn override_with_reason(reason: impl Into<String>) -> Self {
        Self {
            override_existing: true,
            reason: Some(reason.into()),
        }
    }
}

struct Inner {
    connection: HashMap<String, Arc<dyn ConnectionRule>>,
    transform: HashMap<String, Arc<dyn TransformRule>>,
    keys: HashMap<String, RuleKey>,
    immutable: HashSet<String>,
    frozen: bool,
    audit: Vec<AuditRecord>,
}

/// Thread-safe registry for connection and transform rules.
pub struct RuleRegistry {
    inner: RwLock<Inner>,
    environment: Environment,
    allow_override: bool,
    enable_audit: bool,
    audit_max_records: usize,
}

impl RuleRegistry {
    /// Create an empty registry with the environment's default override
    /// policy and auditing enabled.
    pub fn new(environment: Environment) -> Self {
        Self {
            inner: RwLock::new(Inner {
                connection: HashMap::new(),
                transform: HashMap::new(),
                keys: HashMap::new(),
                immutable: HashSet::new(),
                frozen: false,
                audit: Vec::new(),
            }),
            allow_override: environment.allows_override(),
            environment,
            enable_audit: true,
            audit_max_records: 1000,
        }
    }

    /// Override the environment-derived override policy.
    pub fn with_allow_override(mut self, allow: bool) -> Self {
        self.allow_override = allow;
        self
    }

    /// Disable the audit trail.
    pub fn without_audit(mut self) -> Self {
        self.enable_audit = false;
        self
    }

    /// Create a registry preloaded with the built-in rules.
    pub fn with_defaults(environment: Environment) -> Self {
        let registry = Self::new(environment);
        super::builtin::register_default_rules(&registry)
            .expect("built-in rules register into an empty registry");
        registry
    }

    /// The environment this registry was created for.
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Register a connection rule.
    #[track_caller]
    pub fn register_connection_rule(
        &self,
        key: RuleKey,
        rule: Arc<dyn ConnectionRule>,
        options: RegisterOptions,
    ) -> Result<()> {
        if key.category != RuleCategory::Connection {
            return Err(DiagramError::Registry(format!(
                "rule key category must be connection, got {}",
                key.category.as_str()
            )));
        }
        let caller = caller_info();
        let mut inner = self.inner.write();
        let exists = inner.connection.contains_key(&key.name);
        self.check_constraints(&mut inner, &key, exists, &options, &caller)?;

        inner.connection.insert(key.name.clone(), rule);
        self.commit_registration(&mut inner, key, exists, &options, &caller);
        Ok(())
    }

    /// Register a transform rule.
    #[track_caller]
    pub fn register_transform_rule(
        &self,
        key: RuleKey,
        rule: Arc<dyn TransformRule>,
        options: RegisterOptions,
    ) -> Result<()> {
        if key.category != RuleCategory::Transform {
            return Err(DiagramError::Registry(format!(
                "rule key category must be transform, got {}",
                key.category.as_str()
            )));
        }
        let caller = caller_info();
        let mut inner = self.inner.write();
        let exists = inner.transform.contains_key(&key.name);
        self.check_constraints(&mut inner, &key, exists, &options, &caller)?;

        inner.transform.insert(key.name.clone(), rule);
        self.commit_registration(&mut inner, key, exists, &options, &caller);
        Ok(())
    }

    /// Unregister a rule. Immutable rules require `force`. Unregistering a
    /// rule that does not exist is a no-op.
    #[track_caller]
    pub fn unregister(&self, key: &RuleKey, force: bool) -> Result<()> {
        let caller = caller_info();
        let mut inner = self.inner.write();
        let qualified = key.qualified();

        let exists = match key.category {
            RuleCategory::Connection => inner.connection.contains_key(&key.name),
            RuleCategory::Transform => inner.transform.contains_key(&key.name),
        };
        if !exists {
            return Ok(());
        }

        if inner.immutable.contains(&qualified) && !force {
            self.record(
                &mut inner,
                &qualified,
                key.category,
                AuditAction::UnregisterFailed,
                &caller,
                false,
                Some("cannot unregister immutable rule without force".into()),
                None,
            );
            return Err(DiagramError::Registry(format!(
                "cannot unregister immutable rule '{qualified}' without force"
            )));
        }

        match key.category {
            RuleCategory::Connection => {
                inner.connection.remove(&key.name);
            }
            RuleCategory::Transform => {
                inner.transform.remove(&key.name);
            }
        }
        inner.keys.remove(&qualified);
        inner.immutable.remove(&qualified);
        self.record(
            &mut inner,
            &qualified,
            key.category,
            AuditAction::Unregister,
            &caller,
            true,
            None,
            None,
        );
        Ok(())
    }

    /// Check whether a connection between node types is allowed.
    ///
    /// Rules run in descending priority order (ties broken by name for
    /// determinism); the first denial stops evaluation.
    pub fn can_connect(&self, source_type: NodeType, target_type: NodeType) -> bool {
        let inner = self.inner.read();
        Self::can_connect_locked(&inner, source_type, target_type)
    }

    /// The highest-priority reason a connection is denied, or `None` when
    /// the connection is allowed.
    pub fn connection_reason(
        &self,
        source_type: NodeType,
        target_type: NodeType,
    ) -> Option<String> {
        let inner = self.inner.read();
        for (name, rule) in Self::sorted_connection_rules(&inner) {
            if !rule.can_connect(source_type, target_type) {
                return rule.reason(source_type, target_type).or_else(|| {
                    Some(format!(
                        "connection denied by rule '{name}'"
                    ))
                });
            }
        }
        None
    }

    /// Valid sources and targets for a node type, probed against every
    /// other type.
    pub fn connection_constraints(
        &self,
        node_type: NodeType,
    ) -> (Vec<NodeType>, Vec<NodeType>) {
        let inner = self.inner.read();
        let can_receive_from = NodeType::all()
            .iter()
            .copied()
            .filter(|t| Self::can_connect_locked(&inner, *t, node_type))
            .collect();
        let can_send_to = NodeType::all()
            .iter()
            .copied()
            .filter(|t| Self::can_connect_locked(&inner, node_type, *t))
            .collect();
        (can_receive_from, can_send_to)
    }

    /// Merged transform map for a node pair.
    ///
    /// Applicable rules are evaluated in ascending priority order and
    /// merged; higher-priority fields override lower-priority ones.
    pub fn data_transform(
        &self,
        source: &ExecutableNode,
        target: &ExecutableNode,
    ) -> serde_json::Map<String, serde_json::Value> {
        let inner = self.inner.read();
        let mut applicable: Vec<(RulePriority, &String, &Arc<dyn TransformRule>)> = inner
            .transform
            .iter()
            .filter(|(_, rule)| rule.applies_to(source, target))
            .map(|(name, rule)| (Self::priority_of(&inner, name, RuleCategory::Transform), name, rule))
            .collect();
        applicable.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        let mut merged = serde_json::Map::new();
        for (_, _, rule) in applicable {
            for (k, v) in rule.transform(source, target) {
                merged.insert(k, v);
            }
        }
        merged
    }

    /// Merge edge-specific and type-based transforms; edge-specific
    /// entries win.
    pub fn merge_transforms(
        edge_transform: serde_json::Map<String, serde_json::Value>,
        type_based: serde_json::Map<String, serde_json::Value>,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut merged = type_based;
        for (k, v) in edge_transform {
            merged.insert(k, v);
        }
        merged
    }

    /// Freeze the registry. Freezing an already-frozen registry is a
    /// no-op (not audited twice).
    #[track_caller]
    pub fn freeze(&self) {
        let caller = caller_info();
        let mut inner = self.inner.write();
        if inner.frozen {
            return;
        }
        inner.frozen = true;
        self.record(
            &mut inner,
            "*",
            RuleCategory::Connection,
            AuditAction::Freeze,
            &caller,
            true,
            None,
            None,
        );
    }

    /// Unfreeze the registry. In production this requires `force`.
    #[track_caller]
    pub fn unfreeze(&self, force: bool) -> Result<()> {
        let caller = caller_info();
        let mut inner = self.inner.write();
        if self.environment == Environment::Production && !force {
            self.record(
                &mut inner,
                "*",
                RuleCategory::Connection,
                AuditAction::UnfreezeFailed,
                &caller,
                false,
                Some("cannot unfreeze in production without force".into()),
                None,
            );
            return Err(DiagramError::Registry(
                "cannot unfreeze in production without force".into(),
            ));
        }
        inner.frozen = false;
        self.record(
            &mut inner,
            "*",
            RuleCategory::Connection,
            AuditAction::Unfreeze,
            &caller,
            true,
            None,
            None,
        );
        Ok(())
    }

    /// Whether the registry is frozen.
    pub fn is_frozen(&self) -> bool {
        self.inner.read().frozen
    }

    /// Qualified names of all registered rules, optionally filtered by
    /// category.
    pub fn list_rules(&self, category: Option<RuleCategory>) -> Vec<String> {
        let inner = self.inner.read();
        let mut names: Vec<String> = inner
            .keys
            .values()
            .filter(|k| category.map(|c| k.category == c).unwrap_or(true))
            .map(RuleKey::qualified)
            .collect();
        names.sort();
        names
    }

    /// Stored key metadata for a rule, if registered.
    pub fn rule_info(&self, category: RuleCategory, name: &str) -> Option<RuleKey> {
        let qualified = format!("{}:{name}", category.as_str());
        self.inner.read().keys.get(&qualified).cloned()
    }

    /// The audit trail, optionally filtered by qualified rule key.
    pub fn audit_trail(&self, rule_key: Option<&str>) -> Vec<AuditRecord> {
        let inner = self.inner.read();
        inner
            .audit
            .iter()
            .filter(|r| rule_key.map(|k| r.rule_key == k).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Apply temporary rule overrides, restored (including re-deleting
    /// rules that did not exist) when the returned scope drops.
    ///
    /// Test-only: rejected in production.
    #[track_caller]
    pub fn temporary_override(
        &self,
        overrides: Vec<(RuleKey, RuleImpl)>,
    ) -> Result<TemporaryOverride<'_>> {
        if self.environment == Environment::Production {
            return Err(DiagramError::Registry(
                "temporary overrides not allowed in production".into(),
            ));
        }
        let caller = caller_info();
        let mut originals = Vec::new();
        {
            let mut inner = self.inner.write();
            for (key, rule) in overrides {
                let original = match (&key.category, &rule) {
                    (RuleCategory::Connection, RuleImpl::Connection(r)) => {
                        let original = inner.connection.insert(key.name.clone(), r.clone());
                        original.map(RuleImpl::Connection)
                    }
                    (RuleCategory::Transform, RuleImpl::Transform(r)) => {
                        let original = inner.transform.insert(key.name.clone(), r.clone());
                        original.map(RuleImpl::Transform)
                    }
                    _ => {
                        return Err(DiagramError::Registry(format!(
                            "rule implementation does not match category for '{}'",
                            key.qualified()
                        )))
                    }
                };
                self.record(
                    &mut inner,
                    &key.qualified(),
                    key.category,
                    AuditAction::TempOverride,
                    &caller,
                    true,
                    None,
                    Some("temporary test override".into()),
                );
                originals.push((key, original));
            }
        }
        Ok(TemporaryOverride {
            registry: self,
            originals,
            caller,
        })
    }

    /// Remove every rule and audit record and restore the built-in set.
    /// Testing aid for the process-wide [`default_registry`].
    pub fn reset_for_testing(&self) {
        {
            let mut inner = self.inner.write();
            inner.connection.clear();
            inner.transform.clear();
            inner.keys.clear();
            inner.immutable.clear();
            inner.frozen = false;
            inner.audit.clear();
        }
        super::builtin::register_default_rules(self)
            .expect("built-in rules register into an empty registry");
    }

    fn can_connect_locked(inner: &Inner, source_type: NodeType, target_type: NodeType) -> bool {
        for (_, rule) in Self::sorted_connection_rules(inner) {
            if !rule.can_connect(source_type, target_type) {
                return false;
            }
        }
        true
    }

    fn sorted_connection_rules(inner: &Inner) -> Vec<(&String, &Arc<dyn ConnectionRule>)> {
        let mut rules: Vec<_> = inner.connection.iter().collect();
        rules.sort_by(|a, b| {
            let pa = Self::priority_of(inner, a.0, RuleCategory::Connection);
            let pb = Self::priority_of(inner, b.0, RuleCategory::Connection);
            pb.cmp(&pa).then_with(|| a.0.cmp(b.0))
        });
        rules
    }

    fn priority_of(inner: &Inner, name: &str, category: RuleCategory) -> RulePriority {
        inner
            .keys
            .get(&format!("{}:{name}", category.as_str()))
            .map(|k| k.priority)
            .unwrap_or_default()
    }

    fn check_constraints(
        &self,
        inner: &mut Inner,
        key: &RuleKey,
        exists: bool,
        options: &RegisterOptions,
        caller: &str,
    ) -> Result<()> {
        let qualified = key.qualified();

        if inner.frozen && exists {
            self.record(
                inner,
                &qualified,
                key.category,
                AuditAction::RegisterFailed,
                caller,
                false,
                Some("registry is frozen".into()),
                options.reason.clone(),
            );
            return Err(DiagramError::Registry(format!(
                "registry is frozen; refusing to rebind '{qualified}'"
            )));
        }

        if inner.immutable.contains(&qualified) {
            self.record(
                inner,
                &qualified,
                key.category,
                AuditAction::RegisterFailed,
                caller,
                false,
                Some("cannot override immutable rule".into()),
                options.reason.clone(),
            );
            return Err(DiagramError::Registry(format!(
                "cannot override immutable rule '{qualified}'"
            )));
        }

        if exists && !(options.override_existing || self.allow_override) {
            self.record(
                inner,
                &qualified,
                key.category,
                AuditAction::RegisterFailed,
                caller,
                false,
                Some("override not allowed without explicit permission".into()),
                options.reason.clone(),
            );
            return Err(DiagramError::Registry(format!(
                "refusing to overwrite rule '{qualified}' without override (env={}, allow_override={})",
                self.environment.as_str(),
                self.allow_override
            )));
        }

        Ok(())
    }

    fn commit_registration(
        &self,
        inner: &mut Inner,
        key: RuleKey,
        existed: bool,
        options: &RegisterOptions,
        caller: &str,
    ) {
        let qualified = key.qualified();
        if key.immutable {
            inner.immutable.insert(qualified.clone());
        }
        let category = key.category;
        inner.keys.insert(qualified.clone(), key);
        self.record(
            inner,
            &qualified,
            category,
            if existed {
                AuditAction::Override
            } else {
                AuditAction::Register
            },
            caller,
            true,
            None,
            options.reason.clone(),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        inner: &mut Inner,
        rule_key: &str,
        category: RuleCategory,
        action: AuditAction,
        caller: &str,
        success: bool,
        error: Option<String>,
        override_reason: Option<String>,
    ) {
        if !self.enable_audit {
            return;
        }
        if !success {
            tracing::warn!(rule = rule_key, ?action, error = ?error, "rule registry mutation rejected");
        }
        // Retain the most recent 80% once the trail overflows.
        if inner.audit.len() > self.audit_max_records {
            let keep = (self.audit_max_records * 8) / 10;
            let drop_count = inner.audit.len() - keep;
            inner.audit.drain(..drop_count);
        }
        inner.audit.push(AuditRecord {
            timestamp: Utc::now(),
            rule_key: rule_key.to_string(),
            category,
            action,
            caller: caller.to_string(),
            environment: self.environment,
            success,
            error,
            override_reason,
        });
    }
}

/// Scope guard returned by [`RuleRegistry::temporary_override`].
///
/// Restores the original rules on drop, re-deleting rules that did not
/// exist before the override.
pub struct TemporaryOverride<'a> {
    registry: &'a RuleRegistry,
    originals: Vec<(RuleKey, Option<RuleImpl>)>,
    caller: String,
}

impl Drop for TemporaryOverride<'_> {
    fn drop(&mut self) {
        let mut inner = self.registry.inner.write();
        for (key, original) in self.originals.drain(..) {
            match original {
                Some(RuleImpl::Connection(rule)) => {
                    inner.connection.insert(key.name.clone(), rule);
                }
                Some(RuleImpl::Transform(rule)) => {
                    inner.transform.insert(key.name.clone(), rule);
                }
                None => match key.category {
                    RuleCategory::Connection => {
                        inner.connection.remove(&key.name);
                    }
                    RuleCategory::Transform => {
                        inner.transform.remove(&key.name);
                    }
                },
            }
            self.registry.record(
                &mut inner,
                &key.qualified(),
                key.category,
                AuditAction::TempRestore,
                &self.caller,
                true,
                None,
                Some("restore after temporary override".into()),
            );
        }
    }
}

/// Process-wide default registry, preloaded with the built-in rules and
/// configured from `DIAFLOW_ENV`. Use
/// [`RuleRegistry::reset_for_testing`] between tests that mutate it.
pub fn default_registry() -> &'static RuleRegistry {
    static DEFAULT: OnceLock<RuleRegistry> = OnceLock::new();
    DEFAULT.get_or_init(|| RuleRegistry::with_defaults(Environment::from_env()))
}

#[track_caller]
fn caller_info() -> String {
    let location = Location::caller();
    format!("{}:{}", location.file(), location.line())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{CodeJobNode, ExecutableNode};
    use crate::domain::Vec2;

    struct AllowAll;
    impl ConnectionRule for AllowAll {
        fn can_connect(&self, _: NodeType, _: NodeType) -> bool {
            true
        }
    }

    struct DenyStartTargets;
    impl ConnectionRule for DenyStartTargets {
        fn can_connect(&self, _: NodeType, target: NodeType) -> bool {
            target != NodeType::Start
        }
    }

    struct ConstTransform(&'static str, serde_json::Value);
    impl TransformRule for ConstTransform {
        fn applies_to(&self, _: &ExecutableNode, _: &ExecutableNode) -> bool {
            true
        }
        fn transform(
            &self,
            _: &ExecutableNode,
            _: &ExecutableNode,
        ) -> serde_json::Map<String, serde_json::Value> {
            let mut map = serde_json::Map::new();
            map.insert(self.0.to_string(), self.1.clone());
            map
        }
    }

    fn code_node(id: &str) -> ExecutableNode {
        ExecutableNode::CodeJob(CodeJobNode {
            id: id.into(),
            label: id.into(),
            position: Vec2::default(),
            language: "python".into(),
            code: "1".into(),
            timeout_secs: None,
        })
    }

    fn connection_key(name: &str) -> RuleKey {
        RuleKey::new(name, RuleCategory::Connection)
    }

    #[test]
    fn test_empty_registry_allows_everything() {
        let registry = RuleRegistry::new(Environment::Testing);
        assert!(registry.can_connect(NodeType::Endpoint, NodeType::Start));
    }

    #[test]
    fn test_fail_closed_first_denial_wins() {
        let registry = RuleRegistry::new(Environment::Testing);
        registry
            .register_connection_rule(
                connection_key("deny_start").with_priority(RulePriority::High),
                Arc::new(DenyStartTargets),
                RegisterOptions::default(),
            )
            .unwrap();
        registry
            .register_connection_rule(
                connection_key("allow_all"),
                Arc::new(AllowAll),
                RegisterOptions::default(),
            )
            .unwrap();

        assert!(!registry.can_connect(NodeType::CodeJob, NodeType::Start));
        assert!(registry.can_connect(NodeType::CodeJob, NodeType::CodeJob));
        assert!(registry
            .connection_reason(NodeType::CodeJob, NodeType::Start)
            .is_some());
    }

    #[test]
    fn test_immutable_rule_cannot_be_overridden() {
        let registry = RuleRegistry::new(Environment::Testing);
        registry
            .register_connection_rule(
                connection_key("locked").immutable(),
                Arc::new(AllowAll),
                RegisterOptions::default(),
            )
            .unwrap();

        let err = registry
            .register_connection_rule(
                connection_key("locked"),
                Arc::new(DenyStartTargets),
                RegisterOptions::override_with_reason("attempt"),
            )
            .unwrap_err();
        assert!(matches!(err, DiagramError::Registry(_)));

        let trail = registry.audit_trail(Some("connection:locked"));
        let last = trail.last().unwrap();
        assert_eq!(last.action, AuditAction::RegisterFailed);
        assert!(!last.success);
    }

    #[test]
    fn test_frozen_blocks_rebind_but_allows_new() {
        let registry = RuleRegistry::new(Environment::Testing);
        registry
            .register_connection_rule(
                connection_key("existing"),
                Arc::new(AllowAll),
                RegisterOptions::default(),
            )
            .unwrap();

        registry.freeze();
        registry.freeze(); // no-op
        assert!(registry.is_frozen());

        let err = registry
            .register_connection_rule(
                connection_key("existing"),
                Arc::new(DenyStartTargets),
                RegisterOptions::override_with_reason("hotfix"),
            )
            .unwrap_err();
        assert!(matches!(err, DiagramError::Registry(_)));

        // Brand-new names still register while frozen.
        registry
            .register_connection_rule(
                connection_key("brand_new"),
                Arc::new(AllowAll),
                RegisterOptions::default(),
            )
            .unwrap();
    }

    #[test]
    fn test_unfreeze_requires_force_in_production() {
        let registry = RuleRegistry::new(Environment::Production);
        registry.freeze();
        assert!(registry.unfreeze(false).is_err());
        assert!(registry.unfreeze(true).is_ok());
        assert!(!registry.is_frozen());
    }

    #[test]
    fn test_production_denies_silent_override() {
        let registry = RuleRegistry::new(Environment::Production);
        registry
            .register_connection_rule(
                connection_key("r"),
                Arc::new(AllowAll),
                RegisterOptions::default(),
            )
            .unwrap();

        assert!(registry
            .register_connection_rule(
                connection_key("r"),
                Arc::new(AllowAll),
                RegisterOptions::default(),
            )
            .is_err());

        // Explicit override flag still works.
        registry
            .register_connection_rule(
                connection_key("r"),
                Arc::new(AllowAll),
                RegisterOptions::override_with_reason("hotfix X"),
            )
            .unwrap();

        let last = registry.audit_trail(Some("connection:r")).pop().unwrap();
        assert_eq!(last.action, AuditAction::Override);
        assert_eq!(last.override_reason.as_deref(), Some("hotfix X"));
        assert!(last.success);
    }

    #[test]
    fn test_transform_merge_priority() {
        let registry = RuleRegistry::new(Environment::Testing);
        registry
            .register_transform_rule(
                RuleKey::new("low", RuleCategory::Transform).with_priority(RulePriority::Low),
                Arc::new(ConstTransform("k", serde_json::json!("low"))),
                RegisterOptions::default(),
            )
            .unwrap();
        registry
            .register_transform_rule(
                RuleKey::new("high", RuleCategory::Transform).with_priority(RulePriority::High),
                Arc::new(ConstTransform("k", serde_json::json!("high"))),
                RegisterOptions::default(),
            )
            .unwrap();

        let transforms = registry.data_transform(&code_node("a"), &code_node("b"));
        assert_eq!(transforms.get("k"), Some(&serde_json::json!("high")));
    }

    #[test]
    fn test_merge_transforms_edge_wins() {
        let mut edge = serde_json::Map::new();
        edge.insert("k".into(), serde_json::json!("edge"));
        let mut typed = serde_json::Map::new();
        typed.insert("k".into(), serde_json::json!("type"));
        typed.insert("other".into(), serde_json::json!(1));

        let merged = RuleRegistry::merge_transforms(edge, typed);
        assert_eq!(merged.get("k"), Some(&serde_json::json!("edge")));
        assert_eq!(merged.get("other"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_temporary_override_restores_on_drop() {
        let registry = RuleRegistry::new(Environment::Testing);
        registry
            .register_connection_rule(
                connection_key("base"),
                Arc::new(AllowAll),
                RegisterOptions::default(),
            )
            .unwrap();

        {
            let _scope = registry
                .temporary_override(vec![
                    (
                        connection_key("base"),
                        RuleImpl::Connection(Arc::new(DenyStartTargets)),
                    ),
                    (
                        connection_key("extra"),
                        RuleImpl::Connection(Arc::new(DenyStartTargets)),
                    ),
                ])
                .unwrap();
            assert!(!registry.can_connect(NodeType::CodeJob, NodeType::Start));
            assert_eq!(registry.list_rules(Some(RuleCategory::Connection)).len(), 1);
        }

        // base restored, extra re-deleted
        assert!(registry.can_connect(NodeType::CodeJob, NodeType::Start));
        let trail = registry.audit_trail(None);
        assert!(trail
            .iter()
            .any(|r| r.action == AuditAction::TempRestore && r.rule_key == "connection:extra"));
    }

    #[test]
    fn test_temporary_override_rejected_in_production() {
        let registry = RuleRegistry::new(Environment::Production);
        assert!(registry.temporary_override(vec![]).is_err());
    }

    #[test]
    fn test_audit_trail_bounded() {
        let registry = RuleRegistry::new(Environment::Testing);
        for i in 0..1200 {
            registry
                .register_connection_rule(
                    connection_key(&format!("r{i}")),
                    Arc::new(AllowAll),
                    RegisterOptions::default(),
                )
                .unwrap();
        }
        let trail = registry.audit_trail(None);
        assert!(trail.len() <= 1001);
        // Most recent record is retained.
        assert_eq!(trail.last().unwrap().rule_key, "connection:r1199");
    }

    #[test]
    fn test_caller_attribution_present() {
        let registry = RuleRegistry::new(Environment::Testing);
        registry
            .register_connection_rule(
                connection_key("r"),
                Arc::new(AllowAll),
                RegisterOptions::default(),
            )
            .unwrap();
        let record = registry.audit_trail(None).pop().unwrap();
        assert!(record.caller.contains("registry.rs"));
    }
}
