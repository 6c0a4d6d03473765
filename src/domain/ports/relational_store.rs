//! Port for the relational store (§6 "Relational store").
//!
//! Schema beyond what the kernel reads/writes is an external-collaborator
//! concern (§1 Scope); this port contracts only the CRUD and time-range
//! queries the kernel itself performs — task audit trail and optimization
//! execution history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::optimization::OptimizationExecution;
use crate::domain::models::task::TaskExecution;
use crate::error::CoordinatorResult;

/// A point-in-time system metric sample (queue depths, throughput, etc.),
/// persisted for time-range queries by an external dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetric {
    pub id: Uuid,
    pub name: String,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// A recorded baseline (e.g. pre-optimization average execution time)
/// that an [`OptimizationImpact`] is measured against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceBaseline {
    pub id: Uuid,
    pub metric_name: String,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// The measured delta an applied optimization produced against its
/// baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationImpact {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub metric_name: String,
    pub before: f64,
    pub after: f64,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn init_schema(&self, drop_existing: bool) -> CoordinatorResult<()>;

    async fn upsert_task_execution(&self, execution: &TaskExecution) -> CoordinatorResult<()>;
    async fn get_task_execution(&self, id: Uuid) -> CoordinatorResult<Option<TaskExecution>>;

    async fn upsert_optimization_execution(&self, execution: &OptimizationExecution) -> CoordinatorResult<()>;
    async fn get_optimization_execution(&self, id: Uuid) -> CoordinatorResult<Option<OptimizationExecution>>;

    async fn record_metric(&self, metric: &SystemMetric) -> CoordinatorResult<()>;
    async fn metrics_in_range(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoordinatorResult<Vec<SystemMetric>>;

    async fn record_baseline(&self, baseline: &PerformanceBaseline) -> CoordinatorResult<()>;
    async fn record_impact(&self, impact: &OptimizationImpact) -> CoordinatorResult<()>;
}
