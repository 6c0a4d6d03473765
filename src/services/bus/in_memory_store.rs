//! In-process `MessageStore` adapter used as the default bus backend and
//! throughout tests — an opaque key/value + pub/sub store with no
//! external process dependency.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::ports::message_store::MessageStore;
use crate::error::CoordinatorResult;

const CHANNEL_CAPACITY: usize = 1_024;

struct Inner {
    lists: HashMap<String, VecDeque<Vec<u8>>>,
    hashes: HashMap<String, HashMap<String, Vec<u8>>>,
    channels: HashMap<String, broadcast::Sender<Vec<u8>>>,
}

/// An in-memory stand-in for a Redis-like store. Single process only —
/// fine for the default local deployment and for tests exercising the
/// bus's own contracts rather than store durability.
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                lists: HashMap::new(),
                hashes: HashMap::new(),
                channels: HashMap::new(),
            }),
        }
    }

}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    fn subscribe_channel(&self, channel: &str) -> broadcast::Receiver<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    async fn publish(&self, channel: &str, bytes: Vec<u8>) -> CoordinatorResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let sender = inner
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        // No active subscribers is not an error — at-least-once delivery
        // only promises delivery to listeners registered at publish time.
        let _ = sender.send(bytes);
        Ok(())
    }

    async fn rpush(&self, key: &str, value: Vec<u8>) -> CoordinatorResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.lists.entry(key.to_string()).or_default().push_back(value);
        Ok(())
    }

    async fn lpush(&self, key: &str, value: Vec<u8>) -> CoordinatorResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.lists.entry(key.to_string()).or_default().push_front(value);
        Ok(())
    }

    async fn rpop(&self, key: &str) -> CoordinatorResult<Option<Vec<u8>>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.lists.get_mut(key).and_then(VecDeque::pop_back))
    }

    async fn lpop(&self, key: &str) -> CoordinatorResult<Option<Vec<u8>>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.lists.get_mut(key).and_then(VecDeque::pop_front))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> CoordinatorResult<Vec<Vec<u8>>> {
        let inner = self.inner.lock().unwrap();
        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        let norm = |i: isize| -> isize { if i < 0 { (len + i).max(0) } else { i.min(len) } };
        let (s, e) = (norm(start), norm(stop + 1));
        if s >= e {
            return Ok(Vec::new());
        }
        Ok(list.iter().skip(s as usize).take((e - s) as usize).cloned().collect())
    }

    async fn llen(&self, key: &str) -> CoordinatorResult<usize> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> CoordinatorResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(list) = inner.lists.get_mut(key) {
            let len = list.len() as isize;
            let norm = |i: isize| -> isize { if i < 0 { (len + i).max(0) } else { i.min(len) } };
            let (s, e) = (norm(start), norm(stop + 1));
            let kept: VecDeque<Vec<u8>> = if s >= e {
                VecDeque::new()
            } else {
                list.iter().skip(s as usize).take((e - s) as usize).cloned().collect()
            };
            *list = kept;
        }
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: Vec<u8>) -> CoordinatorResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> CoordinatorResult<Option<Vec<u8>>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hgetall(&self, key: &str) -> CoordinatorResult<Vec<(String, Vec<u8>)>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> CoordinatorResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(h) = inner.hashes.get_mut(key) {
            h.remove(field);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_push_pop_is_fifo_from_opposite_ends() {
        let store = InMemoryStore::new();
        store.rpush("q", b"a".to_vec()).await.unwrap();
        store.rpush("q", b"b".to_vec()).await.unwrap();
        assert_eq!(store.rpop("q").await.unwrap(), Some(b"b".to_vec()));
        assert_eq!(store.lpop("q").await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.rpop("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lpush_returns_item_to_head() {
        let store = InMemoryStore::new();
        store.rpush("q", b"a".to_vec()).await.unwrap();
        store.rpush("q", b"b".to_vec()).await.unwrap();
        store.lpush("q", b"returned".to_vec()).await.unwrap();
        assert_eq!(store.lpop("q").await.unwrap(), Some(b"returned".to_vec()));
    }
}
