//! Recent-window cache: the last N messages of each conversation, ordered by position.
//!
//! The cache is best-effort. Callers fall back to the Durable Store on a miss
//! or a short read, so eviction and failures never affect correctness.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parley_database::Message;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::warn;

use crate::types::{ChatError, ChatResult};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecentWindowCache: Send + Sync {
    /// Insert or replace the entry at the message's position, then trim to
    /// capacity. A deleted message is stored as a tombstone so an older copy
    /// cannot come back through `backfill`.
    async fn insert(&self, message: &Message) -> ChatResult<()>;

    /// Like `insert`, but leaves an existing entry at that position alone.
    /// Used to refill the window from store reads that may already be stale.
    async fn backfill(&self, message: &Message) -> ChatResult<()>;

    /// The `limit` most recent entries in ascending position order, with
    /// tombstones left out. A short read sends the caller to the store.
    async fn read(&self, conversation_id: &str, limit: usize) -> ChatResult<Vec<Message>>;

    fn capacity(&self) -> usize;
}

/// In-process window for single-instance deployments.
pub struct MemoryWindowCache {
    capacity: usize,
    windows: RwLock<HashMap<String, BTreeMap<i64, Message>>>,
}

impl MemoryWindowCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            windows: RwLock::new(HashMap::new()),
        }
    }
}

impl MemoryWindowCache {
    async fn store(&self, message: &Message, replace: bool) {
        let mut windows = self.windows.write().await;
        let window = windows.entry(message.conversation_id.clone()).or_default();
        if replace {
            window.insert(message.position, message.clone());
        } else {
            window
                .entry(message.position)
                .or_insert_with(|| message.clone());
        }
        while window.len() > self.capacity {
            window.pop_first();
        }
    }
}

#[async_trait]
impl RecentWindowCache for MemoryWindowCache {
    async fn insert(&self, message: &Message) -> ChatResult<()> {
        self.store(message, true).await;
        Ok(())
    }

    async fn backfill(&self, message: &Message) -> ChatResult<()> {
        self.store(message, false).await;
        Ok(())
    }

    async fn read(&self, conversation_id: &str, limit: usize) -> ChatResult<Vec<Message>> {
        let windows = self.windows.read().await;
        let Some(window) = windows.get(conversation_id) else {
            return Ok(Vec::new());
        };

        let mut recent: Vec<Message> = window
            .values()
            .rev()
            .take(limit)
            .filter(|message| !message.is_deleted)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

// Adds ARGV[2] at score ARGV[1] unless that score is taken, then trims to
// the newest ARGV[3] entries. Members are payloads, so ZADD NX cannot see a
// different version of the same position.
const BACKFILL_SCRIPT: &str = r#"
if redis.call('ZCOUNT', KEYS[1], ARGV[1], ARGV[1]) > 0 then
  return 0
end
redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
redis.call('ZREMRANGEBYRANK', KEYS[1], 0, -(tonumber(ARGV[3]) + 1))
return 1
"#;

/// Window shared by every instance: a sorted set `chat:{id}:messages`
/// scored by position, members are JSON-encoded messages.
#[derive(Clone)]
pub struct RedisWindowCache {
    conn: ConnectionManager,
    capacity: usize,
}

impl RedisWindowCache {
    pub fn new(conn: ConnectionManager, capacity: usize) -> Self {
        Self {
            conn,
            capacity: capacity.max(1),
        }
    }

    pub fn window_key(conversation_id: &str) -> String {
        format!("chat:{conversation_id}:messages")
    }

    fn encode(message: &Message) -> ChatResult<String> {
        serde_json::to_string(message)
            .map_err(|e| ChatError::transient(format!("failed to encode cached message: {e}")))
    }

    fn keep(&self) -> isize {
        isize::try_from(self.capacity).unwrap_or(isize::MAX)
    }
}

#[async_trait]
impl RecentWindowCache for RedisWindowCache {
    async fn insert(&self, message: &Message) -> ChatResult<()> {
        let payload = Self::encode(message)?;
        let key = Self::window_key(&message.conversation_id);
        let keep = self.keep();

        let mut conn = self.conn.clone();
        // drop any previous version at this position, add, keep the newest `capacity`
        redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg(message.position)
            .arg(message.position)
            .ignore()
            .cmd("ZADD")
            .arg(&key)
            .arg(message.position)
            .arg(payload)
            .ignore()
            .cmd("ZREMRANGEBYRANK")
            .arg(&key)
            .arg(0)
            .arg(-(keep + 1))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn backfill(&self, message: &Message) -> ChatResult<()> {
        let payload = Self::encode(message)?;
        let mut conn = self.conn.clone();
        let _: i64 = redis::Script::new(BACKFILL_SCRIPT)
            .key(Self::window_key(&message.conversation_id))
            .arg(message.position)
            .arg(payload)
            .arg(self.keep())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn read(&self, conversation_id: &str, limit: usize) -> ChatResult<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = -isize::try_from(limit).unwrap_or(isize::MAX);

        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .zrange(Self::window_key(conversation_id), start, -1)
            .await?;

        let mut messages = Vec::with_capacity(members.len());
        for member in members {
            match serde_json::from_str::<Message>(&member) {
                Ok(message) if message.is_deleted => {}
                Ok(message) => messages.push(message),
                Err(error) => {
                    warn!(conversation_id = %conversation_id, %error, "skipping undecodable cache entry")
                }
            }
        }
        Ok(messages)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
