//! Scheduler and resource-limit configuration structures.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{AppResult, SchedulerError};

/// Scheduling discipline selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmKind {
    /// Fixed-tick FIFO cursor, ignores priority.
    RoundRobin,
    /// Event-driven dispatch; tasks run until they yield.
    Cooperative,
    /// Max-heap on priority with priority-scaled time slices.
    Priority,
}

impl AlgorithmKind {
    /// Every available algorithm.
    pub const ALL: [Self; 3] = [Self::RoundRobin, Self::Cooperative, Self::Priority];

    /// Configuration name of the algorithm.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::Cooperative => "cooperative",
            Self::Priority => "priority",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SchedulerError::UnknownAlgorithm(s.to_string()))
    }
}

/// Immutable per-task and system-wide resource limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum aggregate memory in bytes.
    pub max_memory: u64,
    /// Maximum accumulated CPU time per task, in milliseconds.
    pub max_cpu_time_ms: u64,
    /// Maximum concurrent tasks.
    pub max_tasks: usize,
    /// Nominal time slice in milliseconds. Must equal
    /// [`SchedulerConfig::time_slice_ms`].
    pub time_slice_ms: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory: 64 * 1024 * 1024,
            max_cpu_time_ms: 30_000,
            max_tasks: 100,
            time_slice_ms: 100,
        }
    }
}

impl ResourceLimits {
    /// Per-task CPU budget.
    #[must_use]
    pub const fn max_cpu_time(&self) -> Duration {
        Duration::from_millis(self.max_cpu_time_ms)
    }

    /// Nominal time slice.
    #[must_use]
    pub const fn time_slice(&self) -> Duration {
        Duration::from_millis(self.time_slice_ms)
    }

    /// Validate limit values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_memory == 0 {
            return Err("max_memory must be greater than 0".into());
        }
        if self.max_cpu_time_ms == 0 {
            return Err("max_cpu_time_ms must be greater than 0".into());
        }
        if self.max_tasks == 0 {
            return Err("max_tasks must be greater than 0".into());
        }
        if self.time_slice_ms == 0 {
            return Err("invalid time slice duration: time_slice_ms must be greater than 0".into());
        }
        Ok(())
    }
}

const fn default_reconcile_interval_ms() -> u64 {
    1_000
}

/// Root scheduler configuration, supplied once at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Scheduling discipline.
    pub algorithm: AlgorithmKind,
    /// Dispatch time slice in milliseconds.
    pub time_slice_ms: u64,
    /// Resource limits.
    pub resource_limits: ResourceLimits,
    /// Whether per-task metrics are collected.
    pub metrics_enabled: bool,
    /// Task-manager reconciliation period in milliseconds.
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmKind::RoundRobin,
            time_slice_ms: 100,
            resource_limits: ResourceLimits::default(),
            metrics_enabled: true,
            reconcile_interval_ms: default_reconcile_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Dispatch time slice.
    #[must_use]
    pub const fn time_slice(&self) -> Duration {
        Duration::from_millis(self.time_slice_ms)
    }

    /// Reconciliation period.
    #[must_use]
    pub const fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    /// Validate the configuration and its embedded limits.
    pub fn validate(&self) -> Result<(), String> {
        if self.time_slice_ms == 0 {
            return Err("invalid time slice duration: time_slice_ms must be greater than 0".into());
        }
        if self.reconcile_interval_ms == 0 {
            return Err("reconcile_interval_ms must be greater than 0".into());
        }
        self.resource_limits
            .validate()
            .map_err(|e| format!("resource_limits invalid: {e}"))?;
        // Dispatch reads the top-level slice; the limits copy must agree with it
        if self.resource_limits.time_slice_ms != self.time_slice_ms {
            return Err(format!(
                "time slice mismatch: time_slice_ms is {} but resource_limits.time_slice_ms is {}",
                self.time_slice_ms, self.resource_limits.time_slice_ms
            ));
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build a configuration from defaults overridden by `SANDBOX_SCHEDULER_*`
    /// environment variables. A `.env` file in the working directory is loaded
    /// first if present.
    ///
    /// # Errors
    ///
    /// Fails when a variable does not parse or the result does not validate.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();

        if let Some(algorithm) = env_override::<AlgorithmKind>("SANDBOX_SCHEDULER_ALGORITHM")? {
            cfg.algorithm = algorithm;
        }
        if let Some(slice) = env_override::<u64>("SANDBOX_SCHEDULER_TIME_SLICE_MS")? {
            cfg.time_slice_ms = slice;
            cfg.resource_limits.time_slice_ms = slice;
        }
        if let Some(memory) = env_override::<u64>("SANDBOX_SCHEDULER_MAX_MEMORY")? {
            cfg.resource_limits.max_memory = memory;
        }
        if let Some(cpu) = env_override::<u64>("SANDBOX_SCHEDULER_MAX_CPU_TIME_MS")? {
            cfg.resource_limits.max_cpu_time_ms = cpu;
        }
        if let Some(tasks) = env_override::<usize>("SANDBOX_SCHEDULER_MAX_TASKS")? {
            cfg.resource_limits.max_tasks = tasks;
        }
        if let Some(enabled) = env_override::<bool>("SANDBOX_SCHEDULER_METRICS_ENABLED")? {
            cfg.metrics_enabled = enabled;
        }
        if let Some(interval) = env_override::<u64>("SANDBOX_SCHEDULER_RECONCILE_INTERVAL_MS")? {
            cfg.reconcile_interval_ms = interval;
        }

        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}

fn env_override<T>(key: &str) -> AppResult<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(None),
    }
}
