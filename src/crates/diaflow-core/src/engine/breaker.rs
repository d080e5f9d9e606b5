//! Per-node-type circuit breaker.
//!
//! When the failure rate for a node type exceeds the configured
//! threshold within the sampling window, dispatches of that type are
//! skipped with `circuit_open` until the cool-down elapses.

use crate::domain::NodeType;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Minimum observed failures before the breaker can open
    pub min_failures: usize,
    /// Failure-rate threshold in [0, 1] over the window
    pub failure_rate: f64,
    /// Sampling window
    pub window: Duration,
    /// How long the circuit stays open once tripped
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            min_failures: 5,
            failure_rate: 0.5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

struct TypeState {
    outcomes: Vec<(Instant, bool)>, // (when, success)
    open_until: Option<Instant>,
}

/// Tracks handler outcomes per node type.
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<HashMap<NodeType, TypeState>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Whether dispatches of this type are currently blocked.
    pub fn is_open(&self, node_type: NodeType) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.get_mut(&node_type) else {
            return false;
        };
        match entry.open_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                // Cool-down elapsed: half-open, allow traffic again.
                entry.open_until = None;
                entry.outcomes.clear();
                false
            }
            None => false,
        }
    }

    pub fn record_success(&self, node_type: NodeType) {
        self.record(node_type, true);
    }

    pub fn record_failure(&self, node_type: NodeType) {
        self.record(node_type, false);
    }

    fn record(&self, node_type: NodeType, success: bool) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let entry = state.entry(node_type).or_insert_with(|| TypeState {
            outcomes: Vec::new(),
            open_until: None,
        });
        entry.outcomes.push((now, success));
        entry
            .outcomes
            .retain(|(when, _)| now.duration_since(*when) <= self.config.window);

        let failures = entry.outcomes.iter().filter(|(_, ok)| !ok).count();
        let total = entry.outcomes.len();
        if failures >= self.config.min_failures
            && (failures as f64) / (total as f64) >= self.config.failure_rate
        {
            tracing::warn!(%node_type, failures, total, "circuit opened");
            entry.open_until = Some(now + self.config.cooldown);
        }
    }
}
