use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use trading_core_types::CoreError;

use crate::pipeline::{PipelineBuilder, PipelineOp};
use crate::KvStore;

/// Production `KvStore` backed by a single shared `redis::aio::ConnectionManager`,
/// the pattern the wider trading-bot corpus uses for a long-lived Redis handle
/// that reconnects transparently.
#[derive(Clone)]
pub struct RedisKvStore {
    conn: ConnectionManager,
    client: redis::Client,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let client = redis::Client::open(url).map_err(|e| CoreError::KvError(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CoreError::KvError(e.to_string()))?;
        Ok(Self { conn, client })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| CoreError::KvError(e.to_string()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .map_err(|e| CoreError::KvError(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| CoreError::KvError(e.to_string()))
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CoreError> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut iter: redis::AsyncIter<String> = conn
            .scan_match(pattern)
            .await
            .map_err(|e| CoreError::KvError(e.to_string()))?;
        while let Some(key) = futures::StreamExt::next(&mut iter).await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, CoreError> {
        let mut conn = self.conn.clone();
        conn.hincr(key, field, delta)
            .await
            .map_err(|e| CoreError::KvError(e.to_string()))
    }

    async fn hincrby_float(&self, key: &str, field: &str, delta: f64) -> Result<f64, CoreError> {
        let mut conn = self.conn.clone();
        conn.hincr(key, field, delta)
            .await
            .map_err(|e| CoreError::KvError(e.to_string()))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CoreError> {
        let mut conn = self.conn.clone();
        conn.hget(key, field)
            .await
            .map_err(|e| CoreError::KvError(e.to_string()))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, ttl_secs as i64)
            .await
            .map_err(|e| CoreError::KvError(e.to_string()))
    }

    async fn list_push_capped(&self, key: &str, value: &str, cap: usize) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .lpush(key, value)
            .ltrim(key, 0, cap as isize - 1)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CoreError::KvError(e.to_string()))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, message)
            .await
            .map_err(|e| CoreError::KvError(e.to_string()))
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, CoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| CoreError::KvError(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| CoreError::KvError(e.to_string()))?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = futures::StreamExt::next(&mut stream).await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn execute_pipeline(&self, builder: PipelineBuilder) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in builder.into_ops() {
            match op {
                PipelineOp::HIncrBy { key, field, delta } => {
                    pipe.hincr(key, field, delta);
                }
                PipelineOp::HIncrByFloat { key, field, delta } => {
                    pipe.hincr(key, field, delta);
                }
                PipelineOp::Expire { key, ttl_secs } => {
                    pipe.expire(key, ttl_secs as i64);
                }
                PipelineOp::SetEx { key, value, ttl_secs } => {
                    pipe.set_ex(key, value, ttl_secs);
                }
                PipelineOp::Delete { key } => {
                    pipe.del(key);
                }
            }
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| CoreError::KvError(e.to_string()))
    }
}
