//! Typed dependency lookup for node handlers
//!
//! Handlers resolve their collaborators (LLM client, file port, state
//! store, ...) through a [`ServiceRegistry`] keyed by typed
//! [`ServiceKey`]s. The key carries the service type at compile time, so
//! `require(LLM_SERVICE)` hands back an `Arc<dyn LlmService>` without any
//! caller-side downcasting.
//!
//! There is no DI container: registries are built explicitly at startup
//! (and in test fixtures), then shared immutably behind an `Arc`.
//!
//! A legacy string-keyed view exists for migration and SHOULD be
//! disabled in production via
//! [`disable_legacy_mode`](ServiceRegistry::disable_legacy_mode).
//!
//! # Examples
//!
//! ```rust,ignore
//! let mut services = ServiceRegistry::new();
//! services.register(LLM_SERVICE, llm.clone());
//! services.register(STATE_STORE, store.clone());
//!
//! let llm = services.require(LLM_SERVICE)?; // Arc<dyn LlmService>
//! ```

use crate::error::{DiagramError, Result};
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::ports::{
    ApiKeyService, ConditionEvaluator, DiagramStorage, FileService, LlmService, MessageRouter,
    NotionService,
};
use diaflow_state::StateStore;

/// Type-safe key for service lookup.
///
/// The phantom type records what the key resolves to; keys are
/// const-constructible so the standard set below lives in statics.
pub struct ServiceKey<T> {
    name: &'static str,
    description: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ServiceKey<T> {
    /// Create a key. `name` must be unique across the registry.
    pub const fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn description(&self) -> &'static str {
        self.description
    }
}

impl<T> std::fmt::Debug for ServiceKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ServiceKey[{}]", self.name)
    }
}

// Standard service keys.
pub const LLM_SERVICE: ServiceKey<Arc<dyn LlmService>> =
    ServiceKey::new("llm_service", "LLM completion service");
pub const FILE_SERVICE: ServiceKey<Arc<dyn FileService>> =
    ServiceKey::new("file_service", "File operations service");
pub const API_KEY_SERVICE: ServiceKey<Arc<dyn ApiKeyService>> =
    ServiceKey::new("api_key_service", "API key management");
pub const STATE_STORE: ServiceKey<Arc<dyn StateStore>> =
    ServiceKey::new("state_store", "Execution state persistence");
pub const CONVERSATION_MANAGER: ServiceKey<Arc<crate::memory::ConversationMemory>> =
    ServiceKey::new("conversation_manager", "Conversation state");
pub const MESSAGE_ROUTER: ServiceKey<Arc<dyn MessageRouter>> =
    ServiceKey::new("message_router", "Message routing service");
pub const NOTION_SERVICE: ServiceKey<Arc<dyn NotionService>> =
    ServiceKey::new("notion_service", "Notion API service");
pub const CONDITION_EVALUATION_SERVICE: ServiceKey<Arc<dyn ConditionEvaluator>> =
    ServiceKey::new("condition_evaluation_service", "Condition expression evaluator");
pub const DIAGRAM_STORAGE: ServiceKey<Arc<dyn DiagramStorage>> =
    ServiceKey::new("diagram_storage", "Diagram load/save service");

/// Typed key → service map.
///
/// Built once, then shared immutably. Services registered here MUST be
/// safe to call concurrently or document their own constraints.
pub struct ServiceRegistry {
    services: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
    legacy_mode: bool,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
            legacy_mode: true,
        }
    }

    /// Register a service under a typed key, replacing any previous
    /// binding.
    pub fn register<T: Clone + Send + Sync + 'static>(&mut self, key: ServiceKey<T>, service: T) {
        self.services.insert(key.name, Box::new(service));
    }

    /// Get a service, if registered.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: ServiceKey<T>) -> Option<T> {
        self.services
            .get(key.name)
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
    }

    /// Get a required service, failing with
    /// [`DiagramError::MissingService`] when absent.
    pub fn require<T: Clone + Send + Sync + 'static>(&self, key: ServiceKey<T>) -> Result<T> {
        let name = key.name;
        self.get(key)
            .ok_or_else(|| DiagramError::MissingService(name.to_string()))
    }

    /// Whether a service is registered under the key.
    pub fn has<T>(&self, key: ServiceKey<T>) -> bool {
        self.services.contains_key(key.name)
    }

    /// Names of all registered services, sorted.
    pub fn snapshot(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.services.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Whether a service is registered under a raw string name
    /// (legacy view).
    pub fn has_name(&self, name: &str) -> Result<bool> {
        if !self.legacy_mode {
            return Err(DiagramError::Configuration(
                "legacy string-keyed service access is disabled".into(),
            ));
        }
        Ok(self.services.contains_key(name))
    }

    /// Disable the legacy string-keyed view. Recommended in production.
    pub fn disable_legacy_mode(&mut self) {
        self.legacy_mode = false;
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ConversationMemory;

    #[test]
    fn test_register_and_require() {
        let mut registry = ServiceRegistry::new();
        let memory = Arc::new(ConversationMemory::new());
        registry.register(CONVERSATION_MANAGER, memory.clone());

        assert!(registry.has(CONVERSATION_MANAGER));
        let resolved = registry.require(CONVERSATION_MANAGER).unwrap();
        assert!(Arc::ptr_eq(&memory, &resolved));
    }

    #[test]
    fn test_require_missing_fails_with_key_name() {
        let registry = ServiceRegistry::new();
        let err = registry.require(CONVERSATION_MANAGER).unwrap_err();
        assert!(format!("{err}").contains("conversation_manager"));
    }

    #[test]
    fn test_snapshot_sorted() {
        let mut registry = ServiceRegistry::new();
        registry.register(CONVERSATION_MANAGER, Arc::new(ConversationMemory::new()));
        assert_eq!(registry.snapshot(), vec!["conversation_manager"]);
    }

    #[test]
    fn test_legacy_mode_can_be_disabled() {
        let mut registry = ServiceRegistry::new();
        registry.register(CONVERSATION_MANAGER, Arc::new(ConversationMemory::new()));
        assert!(registry.has_name("conversation_manager").unwrap());

        registry.disable_legacy_mode();
        assert!(registry.has_name("conversation_manager").is_err());
    }
}
