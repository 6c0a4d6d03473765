//! Runtime configuration surface (§6 "Configuration surface").
//!
//! Loaded hierarchically by [`crate::infrastructure::config::ConfigLoader`];
//! every field here has a `default_xxx` function so `serde(default = ...)`
//! lets any layer override only the keys it cares about.

use serde::{Deserialize, Serialize};

fn default_scheduling_strategy() -> String {
    "adaptive".to_string()
}
fn default_max_concurrent_tasks_per_agent() -> u32 {
    3
}
fn default_task_timeout_seconds() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    3
}
fn default_queue_size_threshold() -> usize {
    50
}
fn default_scale_up_threshold() -> f64 {
    0.8
}
fn default_scale_down_threshold() -> f64 {
    0.2
}
fn default_max_agents_per_type() -> u32 {
    10
}
fn default_min_agents_per_type() -> u32 {
    1
}
fn default_health_check_interval_seconds() -> u64 {
    15
}
fn default_scaling_check_interval_seconds() -> u64 {
    30
}
fn default_resource_lock_timeout_seconds() -> i64 {
    300
}
fn default_stuck_task_grace_seconds() -> i64 {
    600
}
fn default_true() -> bool {
    true
}

/// Orchestrator / agent manager tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    #[serde(default = "default_scheduling_strategy")]
    pub scheduling_strategy: String,
    #[serde(default = "default_max_concurrent_tasks_per_agent")]
    pub max_concurrent_tasks_per_agent: u32,
    #[serde(default = "default_task_timeout_seconds")]
    pub task_timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_queue_size_threshold")]
    pub queue_size_threshold: usize,
    #[serde(default = "default_scale_up_threshold")]
    pub scale_up_threshold: f64,
    #[serde(default = "default_scale_down_threshold")]
    pub scale_down_threshold: f64,
    #[serde(default = "default_max_agents_per_type")]
    pub max_agents_per_type: u32,
    #[serde(default = "default_min_agents_per_type")]
    pub min_agents_per_type: u32,
    #[serde(default = "default_health_check_interval_seconds")]
    pub health_check_interval_seconds: u64,
    #[serde(default = "default_scaling_check_interval_seconds")]
    pub scaling_check_interval_seconds: u64,
    #[serde(default = "default_resource_lock_timeout_seconds")]
    pub resource_lock_timeout_seconds: i64,
    #[serde(default = "default_stuck_task_grace_seconds")]
    pub stuck_task_grace_seconds: i64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            scheduling_strategy: default_scheduling_strategy(),
            max_concurrent_tasks_per_agent: default_max_concurrent_tasks_per_agent(),
            task_timeout_seconds: default_task_timeout_seconds(),
            max_retries: default_max_retries(),
            queue_size_threshold: default_queue_size_threshold(),
            scale_up_threshold: default_scale_up_threshold(),
            scale_down_threshold: default_scale_down_threshold(),
            max_agents_per_type: default_max_agents_per_type(),
            min_agents_per_type: default_min_agents_per_type(),
            health_check_interval_seconds: default_health_check_interval_seconds(),
            scaling_check_interval_seconds: default_scaling_check_interval_seconds(),
            resource_lock_timeout_seconds: default_resource_lock_timeout_seconds(),
            stuck_task_grace_seconds: default_stuck_task_grace_seconds(),
        }
    }
}

fn default_max_concurrent_optimizations() -> usize {
    3
}
fn default_validation_timeout_seconds() -> u64 {
    60
}
fn default_backup_retention_days() -> i64 {
    7
}
fn default_require_approval_threshold() -> String {
    "high".to_string()
}
fn default_optimization_history_size() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    #[serde(default = "default_true")]
    pub auto_apply_low_risk: bool,
    #[serde(default = "default_require_approval_threshold")]
    pub require_approval_threshold: String,
    #[serde(default = "default_max_concurrent_optimizations")]
    pub max_concurrent_optimizations: usize,
    #[serde(default = "default_true")]
    pub rollback_on_failure: bool,
    #[serde(default = "default_validation_timeout_seconds")]
    pub validation_timeout_seconds: u64,
    #[serde(default = "default_backup_retention_days")]
    pub backup_retention_days: i64,
    #[serde(default = "default_optimization_history_size")]
    pub history_size: usize,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            auto_apply_low_risk: default_true(),
            require_approval_threshold: default_require_approval_threshold(),
            max_concurrent_optimizations: default_max_concurrent_optimizations(),
            rollback_on_failure: default_true(),
            validation_timeout_seconds: default_validation_timeout_seconds(),
            backup_retention_days: default_backup_retention_days(),
            history_size: default_optimization_history_size(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout_seconds() -> i64 {
    30
}
fn default_success_threshold() -> u32 {
    2
}
fn default_circuit_call_timeout_ms() -> u64 {
    10_000
}
fn default_window_seconds() -> i64 {
    60
}
fn default_minimum_requests() -> usize {
    10
}
fn default_failure_rate_threshold() -> f64 {
    0.5
}
fn default_slow_call_threshold_ms() -> u64 {
    5_000
}
fn default_slow_call_rate_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_seconds")]
    pub recovery_timeout_seconds: i64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_circuit_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Sliding-window length in seconds for the windowed failure-rate and
    /// slow-call-rate trip conditions (not a call count).
    #[serde(default = "default_window_seconds")]
    pub window_seconds: i64,
    #[serde(default = "default_minimum_requests")]
    pub minimum_requests: usize,
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,
    #[serde(default = "default_slow_call_threshold_ms")]
    pub slow_call_threshold_ms: u64,
    #[serde(default = "default_slow_call_rate_threshold")]
    pub slow_call_rate_threshold: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout_seconds(),
            success_threshold: default_success_threshold(),
            call_timeout_ms: default_circuit_call_timeout_ms(),
            window_seconds: default_window_seconds(),
            minimum_requests: default_minimum_requests(),
            failure_rate_threshold: default_failure_rate_threshold(),
            slow_call_threshold_ms: default_slow_call_threshold_ms(),
            slow_call_rate_threshold: default_slow_call_rate_threshold(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_backoff_strategy() -> String {
    "exponential_jitter".to_string()
}
fn default_jitter_max_ms() -> u64 {
    250
}
fn default_retry_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_strategy")]
    pub backoff_strategy: String,
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
    #[serde(default = "default_retry_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_strategy: default_backoff_strategy(),
            jitter_max_ms: default_jitter_max_ms(),
            timeout_ms: default_retry_timeout_ms(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://swarmkeeper.db".to_string()
}
fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `"pretty"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub log_dir: Option<std::path::PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}

fn default_bus_address() -> String {
    "memory://local".to_string()
}

/// Root configuration object, the single value `figment` merges into.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub optimization: OptimizationConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_bus_address")]
    pub bus_address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.scheduling.scheduling_strategy, "adaptive");
        assert_eq!(cfg.optimization.max_concurrent_optimizations, 3);
        assert_eq!(cfg.circuit_breaker.failure_threshold, 5);
        assert_eq!(cfg.retry.max_attempts, 3);
    }
}
