//! [`RelationalStore`] adapter backed by SQLite (§6 "Relational store").
//!
//! Execution aggregates are persisted as JSON blobs keyed by id: the
//! kernel only ever round-trips them whole (audit trail + resume), never
//! queries into their structure, so a normalized schema buys nothing.
//! Metrics/baselines/impacts get real columns since they're queried by
//! name and time range.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::models::optimization::OptimizationExecution;
use crate::domain::models::task::TaskExecution;
use crate::domain::ports::relational_store::{OptimizationImpact, PerformanceBaseline, RelationalStore, SystemMetric};
use crate::error::{CoordinatorError, CoordinatorResult};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> CoordinatorResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| CoordinatorError::Configuration(format!("invalid database url: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .idle_timeout(Duration::from_secs(30))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| CoordinatorError::TransientIo { collaborator: "sqlite".to_string(), source: e.into() })?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait::async_trait]
impl RelationalStore for SqliteStore {
    async fn init_schema(&self, drop_existing: bool) -> CoordinatorResult<()> {
        if drop_existing {
            sqlx::query("DROP TABLE IF EXISTS task_executions").execute(&self.pool).await.ok();
            sqlx::query("DROP TABLE IF EXISTS optimization_executions").execute(&self.pool).await.ok();
            sqlx::query("DROP TABLE IF EXISTS system_metrics").execute(&self.pool).await.ok();
            sqlx::query("DROP TABLE IF EXISTS performance_baselines").execute(&self.pool).await.ok();
            sqlx::query("DROP TABLE IF EXISTS optimization_impacts").execute(&self.pool).await.ok();
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS task_executions (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS optimization_executions (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS system_metrics (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                value REAL NOT NULL,
                recorded_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_system_metrics_name_time ON system_metrics(name, recorded_at)")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS performance_baselines (
                id TEXT PRIMARY KEY,
                metric_name TEXT NOT NULL,
                value REAL NOT NULL,
                recorded_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS optimization_impacts (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL,
                metric_name TEXT NOT NULL,
                before_value REAL NOT NULL,
                after_value REAL NOT NULL,
                recorded_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn upsert_task_execution(&self, execution: &TaskExecution) -> CoordinatorResult<()> {
        let body = serde_json::to_string(execution)
            .map_err(|e| CoordinatorError::Validation(format!("failed to serialize task execution: {e}")))?;
        sqlx::query("INSERT INTO task_executions (id, body, updated_at) VALUES (?, ?, ?) ON CONFLICT(id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at")
            .bind(execution.definition.id.to_string())
            .bind(body)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_task_execution(&self, id: Uuid) -> CoordinatorResult<Option<TaskExecution>> {
        let row = sqlx::query("SELECT body FROM task_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| {
            let body: String = r.get("body");
            serde_json::from_str(&body).map_err(|e| CoordinatorError::Validation(format!("corrupt task execution row: {e}")))
        })
        .transpose()
    }

    async fn upsert_optimization_execution(&self, execution: &OptimizationExecution) -> CoordinatorResult<()> {
        let body = serde_json::to_string(execution)
            .map_err(|e| CoordinatorError::Validation(format!("failed to serialize optimization execution: {e}")))?;
        sqlx::query("INSERT INTO optimization_executions (id, body, updated_at) VALUES (?, ?, ?) ON CONFLICT(id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at")
            .bind(execution.id.to_string())
            .bind(body)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_optimization_execution(&self, id: Uuid) -> CoordinatorResult<Option<OptimizationExecution>> {
        let row = sqlx::query("SELECT body FROM optimization_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| {
            let body: String = r.get("body");
            serde_json::from_str(&body).map_err(|e| CoordinatorError::Validation(format!("corrupt optimization execution row: {e}")))
        })
        .transpose()
    }

    async fn record_metric(&self, metric: &SystemMetric) -> CoordinatorResult<()> {
        sqlx::query("INSERT INTO system_metrics (id, name, value, recorded_at) VALUES (?, ?, ?, ?)")
            .bind(metric.id.to_string())
            .bind(&metric.name)
            .bind(metric.value)
            .bind(metric.recorded_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn metrics_in_range(&self, name: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> CoordinatorResult<Vec<SystemMetric>> {
        let rows = sqlx::query("SELECT id, name, value, recorded_at FROM system_metrics WHERE name = ? AND recorded_at >= ? AND recorded_at <= ? ORDER BY recorded_at ASC")
            .bind(name)
            .bind(from.to_rfc3339())
            .bind(to.to_rfc3339())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter()
            .map(|r| {
                let id: String = r.get("id");
                let recorded_at: String = r.get("recorded_at");
                Ok(SystemMetric {
                    id: Uuid::parse_str(&id).map_err(|e| CoordinatorError::Validation(e.to_string()))?,
                    name: r.get("name"),
                    value: r.get("value"),
                    recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                        .map_err(|e| CoordinatorError::Validation(e.to_string()))?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }

    async fn record_baseline(&self, baseline: &PerformanceBaseline) -> CoordinatorResult<()> {
        sqlx::query("INSERT INTO performance_baselines (id, metric_name, value, recorded_at) VALUES (?, ?, ?, ?)")
            .bind(baseline.id.to_string())
            .bind(&baseline.metric_name)
            .bind(baseline.value)
            .bind(baseline.recorded_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn record_impact(&self, impact: &OptimizationImpact) -> CoordinatorResult<()> {
        sqlx::query(
            "INSERT INTO optimization_impacts (id, execution_id, metric_name, before_value, after_value, recorded_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(impact.id.to_string())
        .bind(impact.execution_id.to_string())
        .bind(&impact.metric_name)
        .bind(impact.before)
        .bind(impact.after)
        .bind(impact.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

fn db_err(err: sqlx::Error) -> CoordinatorError {
    CoordinatorError::TransientIo { collaborator: "sqlite".to_string(), source: err.into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::{AgentTypeFilter, TaskDefinition};

    async fn store() -> SqliteStore {
        let store = SqliteStore::connect("sqlite::memory:", 1).await.unwrap();
        store.init_schema(false).await.unwrap();
        store
    }

    #[tokio::test]
    async fn upsert_then_get_task_execution_round_trips() {
        let store = store().await;
        let execution = TaskExecution::submit(TaskDefinition::new("scrape", AgentTypeFilter::Any));
        let id = execution.definition.id;

        store.upsert_task_execution(&execution).await.unwrap();
        let fetched = store.get_task_execution(id).await.unwrap().unwrap();
        assert_eq!(fetched.definition.id, id);
        assert_eq!(fetched.status, execution.status);
    }

    #[tokio::test]
    async fn get_unknown_task_execution_returns_none() {
        let store = store().await;
        assert!(store.get_task_execution(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn metrics_in_range_filters_by_window() {
        let store = store().await;
        let now = Utc::now();
        store
            .record_metric(&SystemMetric { id: Uuid::new_v4(), name: "queue_depth".to_string(), value: 3.0, recorded_at: now })
            .await
            .unwrap();
        store
            .record_metric(&SystemMetric {
                id: Uuid::new_v4(),
                name: "queue_depth".to_string(),
                value: 9.0,
                recorded_at: now - chrono::Duration::hours(2),
            })
            .await
            .unwrap();

        let in_range = store.metrics_in_range("queue_depth", now - chrono::Duration::minutes(5), now + chrono::Duration::minutes(5)).await.unwrap();
        assert_eq!(in_range.len(), 1);
        assert!((in_range[0].value - 3.0).abs() < f64::EPSILON);
    }
}
