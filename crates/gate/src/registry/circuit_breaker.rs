//! Per-source circuit breaker.
//!
//! The circuit has three states:
//!
//! - **Closed**: Normal operation, calls go through.
//! - **Open**: The source keeps failing, calls are rejected.
//! - **HalfOpen**: Recovery timeout elapsed, calls test whether the source is back.
//!
//! Circuits are in-memory and reset on restart.

use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    /// Consecutive failures.
    failure_count: u32,
    /// Consecutive successes while HalfOpen.
    half_open_successes: u32,
    last_failure: Option<Instant>,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            last_failure: None,
        }
    }
}

/// Circuit breaker tracking every source independently.
#[derive(Debug)]
pub struct CircuitBreaker {
    circuits: DashMap<String, Circuit>,
    configs: DashMap<String, CircuitBreakerConfig>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Breaker whose unconfigured sources use `config`.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: DashMap::new(),
            configs: DashMap::new(),
            default_config: config,
        }
    }

    /// Set the thresholds of one source.
    pub fn configure(&self, source: &str, config: CircuitBreakerConfig) {
        self.configs.insert(source.to_string(), config);
    }

    fn config_for(&self, source: &str) -> CircuitBreakerConfig {
        self.configs
            .get(source)
            .map(|c| c.value().clone())
            .unwrap_or_else(|| self.default_config.clone())
    }

    /// Whether a call to `source` may proceed.
    ///
    /// Moves an Open circuit to HalfOpen once the recovery timeout has elapsed.
    pub fn is_allowed(&self, source: &str) -> bool {
        let config = self.config_for(source);
        let mut circuit = self
            .circuits
            .entry(source.to_string())
            .or_insert_with(Circuit::new);

        let state = circuit.state;
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = circuit
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= config.recovery_timeout);
                if recovered {
                    info!(
                        "Circuit breaker: transitioning '{}' from Open to HalfOpen",
                        source
                    );
                    circuit.state = CircuitState::HalfOpen;
                    circuit.half_open_successes = 0;
                }
                recovered
            }
        }
    }

    /// Closed: resets the failure count. HalfOpen: may close the circuit.
    /// Open: closes the circuit.
    pub fn record_success(&self, source: &str) {
        let config = self.config_for(source);
        let mut circuit = self
            .circuits
            .entry(source.to_string())
            .or_insert_with(Circuit::new);

        let state = circuit.state;
        match state {
            CircuitState::Closed => {
                circuit.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                circuit.half_open_successes += 1;
                debug!(
                    "Circuit breaker: success for '{}' in HalfOpen ({}/{})",
                    source, circuit.half_open_successes, config.half_open_success_threshold
                );

                if circuit.half_open_successes >= config.half_open_success_threshold {
                    info!(
                        "Circuit breaker: closing circuit for '{}' after {} successes",
                        source, circuit.half_open_successes
                    );
                    *circuit = Circuit::new();
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late.
                info!(
                    "Circuit breaker: closing circuit for '{}' after a late success",
                    source
                );
                *circuit = Circuit::new();
            }
        }
    }

    /// Counts a failure. Opens the circuit at the threshold, or immediately
    /// when HalfOpen.
    pub fn record_failure(&self, source: &str) {
        let config = self.config_for(source);
        let mut circuit = self
            .circuits
            .entry(source.to_string())
            .or_insert_with(Circuit::new);

        circuit.failure_count += 1;
        circuit.last_failure = Some(Instant::now());

        let state = circuit.state;
        match state {
            CircuitState::Closed => {
                if circuit.failure_count >= config.failure_threshold {
                    info!(
                        "Circuit breaker: opening circuit for '{}' after {} failures",
                        source, circuit.failure_count
                    );
                    circuit.state = CircuitState::Open;
                } else {
                    debug!(
                        "Circuit breaker: failure for '{}' ({}/{})",
                        source, circuit.failure_count, config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: reopening circuit for '{}' after failure in HalfOpen",
                    source
                );
                circuit.state = CircuitState::Open;
                circuit.half_open_successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self, source: &str) -> CircuitState {
        self.circuits
            .get(source)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn failure_count(&self, source: &str) -> u32 {
        self.circuits
            .get(source)
            .map(|c| c.failure_count)
            .unwrap_or(0)
    }

    /// Close the circuit of one source.
    pub fn reset(&self, source: &str) {
        if self.circuits.remove(source).is_some() {
            info!("Circuit breaker: manually resetting circuit for '{}'", source);
        }
    }

    pub fn reset_all(&self) {
        self.circuits.clear();
        info!("Circuit breaker: all circuits reset");
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
