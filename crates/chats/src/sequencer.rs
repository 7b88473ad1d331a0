//! Position assignment for messages within a conversation.

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::store::ConversationStore;
use crate::types::ChatResult;

/// Hands out strictly increasing positions per conversation. Gaps are
/// allowed, duplicates are not.
#[async_trait]
pub trait Sequencer: Send + Sync {
    async fn next_position(&self, conversation_id: &str) -> ChatResult<i64>;

    /// Called after the store rejected a position as already taken, with the
    /// highest position the store currently holds.
    async fn observe_conflict(&self, _conversation_id: &str, _persisted_max: i64) -> ChatResult<()> {
        Ok(())
    }

    /// Whether writes to one conversation must be serialized around
    /// `next_position` and the append.
    fn requires_serialized_writes(&self) -> bool;

    fn name(&self) -> &'static str;
}

/// Derives the next position from the highest persisted one. Relies on the
/// caller serializing writes per conversation and on the store's unique
/// `(conversation_id, position)` constraint to catch races between instances.
#[derive(Clone)]
pub struct StoreSequencer {
    store: Arc<dyn ConversationStore>,
}

impl StoreSequencer {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Sequencer for StoreSequencer {
    async fn next_position(&self, conversation_id: &str) -> ChatResult<i64> {
        let position = self.store.max_position(conversation_id).await? + 1;
        debug!(conversation_id = %conversation_id, position, "derived position from store");
        Ok(position)
    }

    fn requires_serialized_writes(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "store"
    }
}

// Raises the counter to at least ARGV[1]; never lowers it.
const RAISE_COUNTER_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local floor = tonumber(ARGV[1])
if current < floor then
  redis.call('SET', KEYS[1], floor)
  return floor
end
return current
"#;

/// Atomic `INCR conversation:{id}:position` counter shared by every instance.
#[derive(Clone)]
pub struct RedisSequencer {
    conn: ConnectionManager,
}

impl RedisSequencer {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub fn counter_key(conversation_id: &str) -> String {
        format!("conversation:{conversation_id}:position")
    }
}

#[async_trait]
impl Sequencer for RedisSequencer {
    async fn next_position(&self, conversation_id: &str) -> ChatResult<i64> {
        let mut conn = self.conn.clone();
        let position: i64 = conn.incr(Self::counter_key(conversation_id), 1).await?;
        Ok(position)
    }

    /// A counter that lags the store (flushed Redis, switched strategy) is
    /// raised so the next `INCR` lands past every persisted position.
    async fn observe_conflict(&self, conversation_id: &str, persisted_max: i64) -> ChatResult<()> {
        let mut conn = self.conn.clone();
        let counter: i64 = redis::Script::new(RAISE_COUNTER_SCRIPT)
            .key(Self::counter_key(conversation_id))
            .arg(persisted_max)
            .invoke_async(&mut conn)
            .await?;
        info!(
            conversation_id = %conversation_id,
            persisted_max,
            counter,
            "position counter resynchronised with store"
        );
        Ok(())
    }

    fn requires_serialized_writes(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
