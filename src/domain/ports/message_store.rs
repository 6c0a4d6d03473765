//! Port for the key/value + pub/sub store the message bus is layered over
//! (§6 "Key-value + pub/sub store").

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::CoordinatorResult;

/// Primitive operations the bus needs from a backing store. Implementors
/// MAY use connection pooling and batching; behavior must stay observably
/// identical regardless.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn publish(&self, channel: &str, bytes: Vec<u8>) -> CoordinatorResult<()>;

    /// A broadcast receiver for `channel`, created if it does not yet
    /// exist. Every message published to `channel` after this call
    /// (whether or not any receiver is listening yet) is observed by
    /// this receiver in publish order.
    fn subscribe_channel(&self, channel: &str) -> broadcast::Receiver<Vec<u8>>;

    /// Push onto the right (tail) of a list.
    async fn rpush(&self, key: &str, value: Vec<u8>) -> CoordinatorResult<()>;

    /// Push onto the left (head) of a list — used to return an
    /// incompatible dequeued item to the front of its queue (§4.2).
    async fn lpush(&self, key: &str, value: Vec<u8>) -> CoordinatorResult<()>;

    /// Pop from the right (tail) of a list, non-blocking.
    async fn rpop(&self, key: &str) -> CoordinatorResult<Option<Vec<u8>>>;

    /// Pop from the left (head) of a list, non-blocking.
    async fn lpop(&self, key: &str) -> CoordinatorResult<Option<Vec<u8>>>;

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> CoordinatorResult<Vec<Vec<u8>>>;

    async fn llen(&self, key: &str) -> CoordinatorResult<usize>;

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> CoordinatorResult<()>;

    async fn hset(&self, key: &str, field: &str, value: Vec<u8>) -> CoordinatorResult<()>;

    async fn hget(&self, key: &str, field: &str) -> CoordinatorResult<Option<Vec<u8>>>;

    async fn hgetall(&self, key: &str) -> CoordinatorResult<Vec<(String, Vec<u8>)>>;

    async fn hdel(&self, key: &str, field: &str) -> CoordinatorResult<()>;
}
