use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use trading_core_types::CoreError;

use crate::pipeline::{PipelineBuilder, PipelineOp};
use crate::KvStore;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-memory `KvStore` for tests that don't need a live Redis server. Honors
/// TTLs on read (lazy expiry) rather than running a background reaper.
#[derive(Default)]
pub struct InMemoryKvStore {
    strings: DashMap<String, Entry>,
    hashes: DashMap<String, std::collections::HashMap<String, f64>>,
    lists: DashMap<String, VecDeque<String>>,
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, name: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }

    fn apply(&self, op: PipelineOp) {
        match op {
            PipelineOp::HIncrBy { key, field, delta } => {
                self.bump_hash(&key, &field, delta as f64);
            }
            PipelineOp::HIncrByFloat { key, field, delta } => {
                self.bump_hash(&key, &field, delta);
            }
            PipelineOp::Expire { key, ttl_secs } => {
                if let Some(mut entry) = self.strings.get_mut(&key) {
                    entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
                }
            }
            PipelineOp::SetEx { key, value, ttl_secs } => {
                self.strings.insert(
                    key,
                    Entry {
                        value,
                        expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
                    },
                );
            }
            PipelineOp::Delete { key } => {
                self.strings.remove(&key);
            }
        }
    }

    fn bump_hash(&self, key: &str, field: &str, delta: f64) {
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        *hash.entry(field.to_string()).or_insert(0.0) += delta;
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        match self.strings.get(key) {
            Some(entry) if entry.expires_at.is_none_or(|t| t > Instant::now()) => {
                Ok(Some(entry.value.clone()))
            }
            Some(_) => {
                self.strings.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CoreError> {
        self.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        self.strings.remove(key);
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CoreError> {
        let prefix = pattern.trim_end_matches('*');
        Ok(self
            .strings
            .iter()
            .map(|r| r.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, CoreError> {
        self.bump_hash(key, field, delta as f64);
        let hash = self.hashes.get(key).unwrap();
        Ok(hash.get(field).copied().unwrap_or(0.0) as i64)
    }

    async fn hincrby_float(&self, key: &str, field: &str, delta: f64) -> Result<f64, CoreError> {
        self.bump_hash(key, field, delta);
        let hash = self.hashes.get(key).unwrap();
        Ok(hash.get(field).copied().unwrap_or(0.0))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CoreError> {
        Ok(self
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).copied())
            .map(|v| v.to_string()))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), CoreError> {
        if let Some(mut entry) = self.strings.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn list_push_capped(&self, key: &str, value: &str, cap: usize) -> Result<(), CoreError> {
        let mut list = self.lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        list.truncate(cap);
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), CoreError> {
        let _ = self.channel(channel).send(message.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, CoreError> {
        let mut rx = self.channel(channel).subscribe();
        let (tx, out_rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Ok(msg) = rx.recv().await {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        });
        Ok(out_rx)
    }

    async fn execute_pipeline(&self, builder: PipelineBuilder) -> Result<(), CoreError> {
        for op in builder.into_ops() {
            self.apply(op);
        }
        Ok(())
    }
}
