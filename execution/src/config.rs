use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Steps charged for each kind of operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepCosts {
    /// Charged once per top-level transaction.
    pub default: u64,
    pub contract_call: u64,
    pub contract_create: u64,
    pub get: u64,
    pub set: u64,
    pub delete: u64,
    /// Charged per byte of call arguments, deployed code and stored values.
    pub input: u64,
    pub event_log: u64,
    /// Charged per instance field access.
    pub api_call: u64,
}

impl Default for StepCosts {
    fn default() -> Self {
        Self {
            default: 1_000,
            contract_call: 500,
            contract_create: 10_000,
            get: 25,
            set: 100,
            delete: 50,
            input: 1,
            event_log: 100,
            api_call: 5,
        }
    }
}

impl StepCosts {
    /// Costs of zero everywhere.
    pub fn free() -> Self {
        Self {
            default: 0,
            contract_call: 0,
            contract_create: 0,
            get: 0,
            set: 0,
            delete: 0,
            input: 0,
            event_log: 0,
            api_call: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Build contract images that keep debug facilities (captured logs).
    #[serde(default)]
    pub preserve_debuggability: bool,
    #[serde(default)]
    pub step_costs: StepCosts,
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
    #[serde(default = "default_max_event_logs")]
    pub max_event_logs: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: usize },
}

fn default_max_call_depth() -> usize {
    64
}

fn default_max_event_logs() -> usize {
    1_024
}

fn default_cache_capacity() -> usize {
    4_096
}

fn ensure_nonzero(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preserve_debuggability: false,
            step_costs: StepCosts::default(),
            max_call_depth: default_max_call_depth(),
            max_event_logs: default_max_event_logs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Config {
    pub fn from_yaml(contents: &str) -> anyhow::Result<Self> {
        let config: Self =
            serde_yaml::from_str(contents).context("Could not parse config file")?;
        config.validate().context("Invalid config")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_nonzero("max_call_depth", self.max_call_depth)?;
        ensure_nonzero("max_event_logs", self.max_event_logs)?;
        ensure_nonzero("cache_capacity", self.cache_capacity)?;
        Ok(())
    }

    pub fn with_debuggability(mut self, preserve: bool) -> Self {
        self.preserve_debuggability = preserve;
        self
    }

    pub fn with_step_costs(mut self, step_costs: StepCosts) -> Self {
        self.step_costs = step_costs;
        self
    }
}
