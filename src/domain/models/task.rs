//! Task domain model.
//!
//! A [`TaskDefinition`] is the immutable work order submitted by a caller.
//! A [`TaskExecution`] is the mutable runtime record tracking one
//! definition through the scheduling state machine (pending -> queued ->
//! assigned -> running -> completed/failed/timeout/cancelled).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Task priority. Queues are strictly ordered across priorities and FIFO
/// within a priority for one consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// All priorities, ordered critical-first — the order the scheduling
    /// loop and the bus's dequeue scan both use.
    pub const DESCENDING: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

/// Lifecycle state of a [`TaskExecution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Target agent type for a task, or "any" compatible agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentTypeFilter {
    /// Matches agents whose spec type equals this string exactly.
    Exact(String),
    /// Matches any healthy, available agent regardless of type.
    Any,
}

impl AgentTypeFilter {
    pub fn matches(&self, agent_type: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(t) => t == agent_type,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Any => "any",
            Self::Exact(t) => t.as_str(),
        }
    }
}

/// Immutable work order submitted to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: Uuid,
    pub task_type: String,
    pub target_agent_type: AgentTypeFilter,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub timeout_seconds: u64,
    pub allowed_retries: u32,
    pub created_at: DateTime<Utc>,
    pub dependencies: Vec<Uuid>,
    pub pre_assigned_agent: Option<Uuid>,
}

impl TaskDefinition {
    pub fn new(task_type: impl Into<String>, target_agent_type: AgentTypeFilter) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            target_agent_type,
            priority: Priority::Medium,
            payload: serde_json::Value::Null,
            timeout_seconds: 300,
            allowed_retries: 0,
            created_at: Utc::now(),
            dependencies: Vec::new(),
            pre_assigned_agent: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.allowed_retries = retries;
        self
    }
}

/// A single attempt's outcome, appended to an execution's rolling
/// performance history (bounded per-agent deque, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub success: bool,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Runtime record tracking a [`TaskDefinition`] through the scheduling
/// state machine. Owned exclusively by the Task Orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub definition: TaskDefinition,
    pub status: TaskStatus,
    pub assigned_agent: Option<Uuid>,
    pub queued_at: Option<DateTime<Utc>>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl TaskExecution {
    /// Create a freshly-submitted execution, already transitioned to
    /// `queued` (§4.4 "Submission").
    pub fn submit(definition: TaskDefinition) -> Self {
        Self {
            definition,
            status: TaskStatus::Queued,
            assigned_agent: None,
            queued_at: Some(Utc::now()),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            error_message: None,
            result: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.definition.id
    }

    pub fn priority(&self) -> Priority {
        self.definition.priority
    }

    /// Mark assigned to `agent_id`, recording the assignment timestamp.
    /// Invariant I-1 relies on callers incrementing the agent's
    /// `current_tasks` counter alongside this call.
    pub fn assign(&mut self, agent_id: Uuid) {
        self.status = TaskStatus::Assigned;
        self.assigned_agent = Some(agent_id);
        self.assigned_at = Some(Utc::now());
    }

    /// Agent acknowledged the assignment and began execution.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Return an `assigned` execution to `queued` (stuck-task sweep, or a
    /// failed bus publish during assignment).
    pub fn requeue(&mut self) {
        self.status = TaskStatus::Queued;
        self.assigned_agent = None;
        self.assigned_at = None;
        self.started_at = None;
    }

    /// Retry budget remaining, per invariant `retry_count <= allowed_retries`.
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.definition.allowed_retries
    }

    /// Re-enqueue after a failed or timed-out attempt, bumping
    /// `retry_count`. Caller must check [`Self::has_retry_budget`] first.
    pub fn retry(&mut self) {
        self.retry_count += 1;
        self.status = TaskStatus::Queued;
        self.assigned_agent = None;
        self.assigned_at = None;
        self.started_at = None;
        self.queued_at = Some(Utc::now());
    }

    pub fn complete(&mut self, result: serde_json::Value) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.into());
    }

    pub fn time_out(&mut self) {
        self.status = TaskStatus::Timeout;
        self.completed_at = Some(Utc::now());
        self.error_message = Some("execution exceeded its timeout".to_string());
    }

    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(reason.into());
    }

    /// Execution time in milliseconds, if the task ever started.
    pub fn execution_time_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let ended = self.completed_at.unwrap_or_else(Utc::now);
        Some((ended - started).num_milliseconds().max(0) as u64)
    }

    /// Whether a `running` execution has passed `started_at + timeout`.
    pub fn has_timed_out(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.started_at) {
            (TaskStatus::Running, Some(started)) => {
                now - started > chrono::Duration::seconds(self.definition.timeout_seconds as i64)
            }
            _ => false,
        }
    }

    /// Whether an `assigned` execution has sat unacknowledged past the
    /// assignment grace period (§4.4 "Stuck-task sweep").
    pub fn is_stuck_assigned(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        match (self.status, self.assigned_at) {
            (TaskStatus::Assigned, Some(assigned_at)) => now - assigned_at > grace,
            _ => false,
        }
    }
}

/// A bounded FIFO ring — used for per-agent performance history (§4.4,
/// 100 entries) and for other append-and-trim bounded logs in the kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundedHistory<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_critical_first() {
        assert_eq!(
            Priority::DESCENDING,
            [Priority::Critical, Priority::High, Priority::Medium, Priority::Low]
        );
    }

    #[test]
    fn retry_budget_boundary() {
        let def = TaskDefinition::new("scrape", AgentTypeFilter::Any).with_retries(0);
        let mut exec = TaskExecution::submit(def);
        assert!(!exec.has_retry_budget());
        exec.assign(Uuid::new_v4());
        exec.start();
        exec.fail("boom");
        assert_eq!(exec.status, TaskStatus::Failed);
    }

    #[test]
    fn retry_count_never_exceeds_allowed() {
        let def = TaskDefinition::new("scrape", AgentTypeFilter::Any).with_retries(2);
        let mut exec = TaskExecution::submit(def);
        for _ in 0..2 {
            assert!(exec.has_retry_budget());
            exec.retry();
        }
        assert!(!exec.has_retry_budget());
        assert_eq!(exec.retry_count, 2);
        assert!(exec.retry_count <= exec.definition.allowed_retries);
    }

    #[test]
    fn cancel_of_terminal_task_is_a_noop_for_caller_to_detect() {
        let def = TaskDefinition::new("scrape", AgentTypeFilter::Any);
        let mut exec = TaskExecution::submit(def);
        exec.assign(Uuid::new_v4());
        exec.start();
        exec.complete(serde_json::json!({"ok": true}));
        assert!(exec.status.is_terminal());
    }

    #[test]
    fn bounded_history_drops_oldest() {
        let mut h = BoundedHistory::new(3);
        h.push(1);
        h.push(2);
        h.push(3);
        h.push(4);
        let items: Vec<_> = h.iter().copied().collect();
        assert_eq!(items, vec![2, 3, 4]);
    }

    #[test]
    fn agent_type_filter_matches() {
        assert!(AgentTypeFilter::Any.matches("scraping"));
        assert!(AgentTypeFilter::Exact("scraping".into()).matches("scraping"));
        assert!(!AgentTypeFilter::Exact("scraping".into()).matches("keyword"));
    }
}
