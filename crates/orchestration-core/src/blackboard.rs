//! The blackboard: a shared, keyed byte store executors and the control
//! plane use to exchange out-of-band data (e.g. a server executor publishing
//! its endpoint for clients to discover). Entries may carry a TTL; expired
//! entries are treated as absent and lazily reaped on access.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

#[async_trait]
pub trait Blackboard: Send + Sync {
    async fn set(&self, key: String, value: Vec<u8>, ttl: Option<Duration>);
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn exists(&self, key: &str) -> bool;
    async fn delete(&self, key: &str) -> bool;
}

/// In-memory implementation backed by a `DashMap`, following the same
/// concurrent-keyed-store idiom used for the retriever/session stores
/// elsewhere in this workspace.
#[derive(Default)]
pub struct InMemoryBlackboard {
    entries: DashMap<String, Entry>,
}

impl InMemoryBlackboard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Blackboard for InMemoryBlackboard {
    async fn set(&self, key: String, value: Vec<u8>, ttl: Option<Duration>) {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries.insert(key, Entry { value, expires_at });
    }

    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.value.clone()),
            Some(_) => {
                drop(self.entries.get(key));
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let board = InMemoryBlackboard::new();
        board.set("k".into(), b"v".to_vec(), None).await;
        assert_eq!(board.get("k").await, Some(b"v".to_vec()));
        assert!(board.exists("k").await);
    }

    #[tokio::test]
    async fn ttl_expires_entry() {
        let board = InMemoryBlackboard::new();
        board.set("k".into(), b"v".to_vec(), Some(Duration::from_millis(10))).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(board.get("k").await, None);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let board = InMemoryBlackboard::new();
        board.set("k".into(), b"v".to_vec(), None).await;
        assert!(board.delete("k").await);
        assert!(!board.exists("k").await);
    }
}
