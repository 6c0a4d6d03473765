//! Message bus (§4.2): pub/sub channels, priority task queues, a bounded
//! result queue, and the task-status hash, layered over a [`MessageStore`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::domain::models::message::{Message, MessageType, TaskStatusRecord};
use crate::domain::models::task::{AgentTypeFilter, Priority, TaskDefinition};
use crate::domain::ports::message_store::MessageStore;
use crate::error::CoordinatorResult;

const BROADCAST_CHANNEL: &str = "broadcast";
const DEFAULT_RESULT_QUEUE_MAX_LEN: usize = 10_000;
const DEFAULT_TASK_STATUS_RETENTION_HOURS: i64 = 24;

pub type MessageHandler = Arc<dyn Fn(Message) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

fn queue_key(prefix: &str, priority: Priority) -> String {
    format!("{prefix}:tasks:{}", priority.as_str())
}

fn agent_channel(prefix: &str, agent_id: Uuid) -> String {
    format!("{prefix}:agents:{agent_id}")
}

fn broadcast_channel(prefix: &str) -> String {
    format!("{prefix}:{BROADCAST_CHANNEL}")
}

fn results_key(prefix: &str) -> String {
    format!("{prefix}:results")
}

fn task_status_key(prefix: &str) -> String {
    format!("{prefix}:task_status")
}

/// The outcome an agent reports for one task, appended to the bounded
/// result queue (§4.2 `submit_task_result`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub agent_id: Uuid,
    pub payload: serde_json::Value,
    pub success: bool,
    pub recorded_at: chrono::DateTime<Utc>,
}

pub struct MessageBus {
    store: Arc<dyn MessageStore>,
    prefix: String,
    handler_concurrency: Arc<Semaphore>,
    result_queue_max_len: usize,
    task_status_retention: chrono::Duration,
}

impl MessageBus {
    pub fn new(store: Arc<dyn MessageStore>, prefix: impl Into<String>, max_concurrent_handlers: usize) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            handler_concurrency: Arc::new(Semaphore::new(max_concurrent_handlers.max(1))),
            result_queue_max_len: DEFAULT_RESULT_QUEUE_MAX_LEN,
            task_status_retention: chrono::Duration::hours(DEFAULT_TASK_STATUS_RETENTION_HOURS),
        }
    }

    /// Best-effort ordered delivery per channel. Returns `false` only on
    /// unrecoverable store errors (§4.2 `publish`).
    pub async fn publish(&self, msg: &Message) -> bool {
        let channel = match msg.recipient {
            Some(agent_id) => agent_channel(&self.prefix, agent_id),
            None => broadcast_channel(&self.prefix),
        };
        let bytes = match msg.to_wire() {
            Ok(b) => b,
            Err(err) => {
                error!(error = %err, "failed to serialize message");
                return false;
            }
        };
        match self.store.publish(&channel, bytes).await {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, channel, "publish failed");
                false
            }
        }
    }

    /// Registers `handler` against `channel`. A single listener task
    /// demuxes incoming messages; each delivery runs as its own task
    /// bounded by the shared concurrency semaphore so one slow handler
    /// never blocks others (§4.2 `subscribe`).
    pub fn subscribe(&self, channel: &str, handler: MessageHandler) -> tokio::task::JoinHandle<()> {
        let mut receiver = self.store.subscribe_channel(channel);
        let concurrency = self.handler_concurrency.clone();
        let channel = channel.to_string();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(bytes) => {
                        let msg = match Message::from_wire(&bytes) {
                            Ok(m) => m,
                            Err(err) => {
                                warn!(error = %err, channel, "dropping undeserializable message");
                                continue;
                            }
                        };
                        let permit = concurrency.clone().acquire_owned().await;
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            handler(msg).await;
                        });
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(channel, skipped = n, "subscriber lagged, messages dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn broadcast_channel_name(&self) -> String {
        broadcast_channel(&self.prefix)
    }

    pub fn agent_channel_name(&self, agent_id: Uuid) -> String {
        agent_channel(&self.prefix, agent_id)
    }

    /// Appends to the queue for `task.priority`, atomically with writing
    /// the task-status record (§4.2 `enqueue_task`).
    pub async fn enqueue_task(&self, task: &TaskDefinition) -> CoordinatorResult<bool> {
        let bytes = serde_json::to_vec(task).map_err(|e| crate::error::CoordinatorError::Validation(e.to_string()))?;
        self.store.lpush(&queue_key(&self.prefix, task.priority), bytes).await?;

        let record = TaskStatusRecord {
            status: "queued".to_string(),
            created_at: Some(task.created_at),
            assigned_at: None,
            completed_at: None,
            priority: task.priority,
            task_type: task.task_type.clone(),
            agent_id: None,
            success: None,
        };
        let record_bytes = serde_json::to_vec(&record).map_err(|e| crate::error::CoordinatorError::Validation(e.to_string()))?;
        self.store
            .hset(&task_status_key(&self.prefix), &task.id.to_string(), record_bytes)
            .await?;
        Ok(true)
    }

    /// Scans queues critical -> high -> medium -> low; pops the first
    /// entry whose target agent type is compatible, returning
    /// incompatible entries to the head of their own queue (§4.2
    /// `dequeue_task`). Non-blocking: returns `None` immediately when
    /// nothing compatible is available.
    pub async fn dequeue_task(&self, _agent_id: Uuid, agent_type: &str) -> CoordinatorResult<Option<TaskDefinition>> {
        for priority in Priority::DESCENDING {
            let key = queue_key(&self.prefix, priority);
            let len = self.store.llen(&key).await?;
            let mut scanned = 0usize;
            while scanned < len {
                let Some(bytes) = self.store.rpop(&key).await? else {
                    break;
                };
                scanned += 1;
                let task: TaskDefinition = match serde_json::from_slice(&bytes) {
                    Ok(t) => t,
                    Err(err) => {
                        warn!(error = %err, "dropping undeserializable queued task");
                        continue;
                    }
                };
                if task.target_agent_type.matches(agent_type)
                    || matches!(task.target_agent_type, AgentTypeFilter::Any)
                {
                    return Ok(Some(task));
                }
                // Incompatible: return to the head so other consumers
                // still see it ahead of anything enqueued after it.
                self.store.lpush(&key, bytes).await?;
            }
        }
        Ok(None)
    }

    /// Appends to the bounded result queue and updates task-status
    /// atomically (§4.2 `submit_task_result`).
    pub async fn submit_task_result(&self, result: &TaskResult) -> CoordinatorResult<()> {
        let bytes = serde_json::to_vec(result).map_err(|e| crate::error::CoordinatorError::Validation(e.to_string()))?;
        self.store.rpush(&results_key(&self.prefix), bytes).await?;
        self.store
            .ltrim(&results_key(&self.prefix), -(self.result_queue_max_len as isize), -1)
            .await?;

        if let Some(existing) = self.store.hget(&task_status_key(&self.prefix), &result.task_id.to_string()).await? {
            if let Ok(mut record) = serde_json::from_slice::<TaskStatusRecord>(&existing) {
                record.status = if result.success { "completed" } else { "failed" }.to_string();
                record.completed_at = Some(result.recorded_at);
                record.agent_id = Some(result.agent_id);
                record.success = Some(result.success);
                let updated = serde_json::to_vec(&record).map_err(|e| crate::error::CoordinatorError::Validation(e.to_string()))?;
                self.store
                    .hset(&task_status_key(&self.prefix), &result.task_id.to_string(), updated)
                    .await?;
            }
        }

        self.publish(&Message::new(MessageType::TaskResult, result.agent_id, serde_json::to_value(result).unwrap_or_default()))
            .await;
        Ok(())
    }

    /// Truncates the result queue to its max length and removes
    /// task-status entries older than the retention window (§4.2
    /// `cleanup_expired_tasks`).
    pub async fn cleanup_expired_tasks(&self) -> CoordinatorResult<usize> {
        self.store
            .ltrim(&results_key(&self.prefix), -(self.result_queue_max_len as isize), -1)
            .await?;

        let now = Utc::now();
        let mut removed = 0usize;
        for (field, bytes) in self.store.hgetall(&task_status_key(&self.prefix)).await? {
            if let Ok(record) = serde_json::from_slice::<TaskStatusRecord>(&bytes) {
                let reference = record.completed_at.or(record.created_at);
                if let Some(ts) = reference {
                    if now - ts > self.task_status_retention {
                        self.store.hdel(&task_status_key(&self.prefix), &field).await?;
                        removed += 1;
                    }
                }
            }
        }
        debug!(removed, "cleaned up expired task-status entries");
        Ok(removed)
    }

    pub async fn queue_depth(&self, priority: Priority) -> CoordinatorResult<usize> {
        self.store.llen(&queue_key(&self.prefix, priority)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::bus::in_memory_store::InMemoryStore;

    fn bus() -> MessageBus {
        MessageBus::new(Arc::new(InMemoryStore::new()), "swarm", 16)
    }

    #[tokio::test]
    async fn priority_ordering_single_consumer() {
        let bus = bus();
        let t_low = TaskDefinition::new("x", AgentTypeFilter::Any).with_priority(Priority::Low);
        let t_critical = TaskDefinition::new("x", AgentTypeFilter::Any).with_priority(Priority::Critical);
        let t_medium = TaskDefinition::new("x", AgentTypeFilter::Any).with_priority(Priority::Medium);
        let t_high = TaskDefinition::new("x", AgentTypeFilter::Any).with_priority(Priority::High);

        for t in [&t_low, &t_critical, &t_medium, &t_high] {
            bus.enqueue_task(t).await.unwrap();
        }

        let order: Vec<Priority> = {
            let mut out = Vec::new();
            for _ in 0..4 {
                out.push(bus.dequeue_task(Uuid::new_v4(), "any").await.unwrap().unwrap().priority);
            }
            out
        };
        assert_eq!(order, vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low]);
    }

    #[tokio::test]
    async fn fifo_within_priority_for_multiple_compatible_tasks() {
        let bus = bus();
        let first = TaskDefinition::new("x", AgentTypeFilter::Exact("scraping".into())).with_priority(Priority::High);
        let second = TaskDefinition::new("x", AgentTypeFilter::Exact("scraping".into())).with_priority(Priority::High);
        let third = TaskDefinition::new("x", AgentTypeFilter::Exact("scraping".into())).with_priority(Priority::High);
        bus.enqueue_task(&first).await.unwrap();
        bus.enqueue_task(&second).await.unwrap();
        bus.enqueue_task(&third).await.unwrap();

        let order: Vec<Uuid> = {
            let mut out = Vec::new();
            for _ in 0..3 {
                out.push(bus.dequeue_task(Uuid::new_v4(), "scraping").await.unwrap().unwrap().id);
            }
            out
        };
        assert_eq!(order, vec![first.id, second.id, third.id]);
    }

    #[tokio::test]
    async fn dequeue_skips_incompatible_and_restores_it() {
        let bus = bus();
        let wrong = TaskDefinition::new("x", AgentTypeFilter::Exact("keyword".into())).with_priority(Priority::High);
        let right = TaskDefinition::new("y", AgentTypeFilter::Exact("scraping".into())).with_priority(Priority::High);
        bus.enqueue_task(&wrong).await.unwrap();
        bus.enqueue_task(&right).await.unwrap();

        let got = bus.dequeue_task(Uuid::new_v4(), "scraping").await.unwrap().unwrap();
        assert_eq!(got.id, right.id);

        let remaining = bus.dequeue_task(Uuid::new_v4(), "keyword").await.unwrap().unwrap();
        assert_eq!(remaining.id, wrong.id);
    }

    #[tokio::test]
    async fn dequeue_on_empty_queues_returns_none_immediately() {
        let bus = bus();
        assert!(bus.dequeue_task(Uuid::new_v4(), "any").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn submit_result_updates_task_status() {
        let bus = bus();
        let task = TaskDefinition::new("x", AgentTypeFilter::Any);
        bus.enqueue_task(&task).await.unwrap();
        bus.dequeue_task(Uuid::new_v4(), "any").await.unwrap();

        let agent = Uuid::new_v4();
        bus.submit_task_result(&TaskResult {
            task_id: task.id,
            agent_id: agent,
            payload: serde_json::json!({"ok": true}),
            success: true,
            recorded_at: Utc::now(),
        })
        .await
        .unwrap();

        let status_bytes = bus
            .store
            .hget(&task_status_key("swarm"), &task.id.to_string())
            .await
            .unwrap()
            .unwrap();
        let record: TaskStatusRecord = serde_json::from_slice(&status_bytes).unwrap();
        assert_eq!(record.status, "completed");
        assert_eq!(record.agent_id, Some(agent));
    }
}
