//! Event bus relaying broadcast events to every instance, the publisher included.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::types::{BroadcastEvent, ChatError, ChatResult, BUS_CHANNELS};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(200);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(3);

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish to every subscribed instance. A bus with no subscribers is not an error.
    async fn publish(&self, event: &BroadcastEvent) -> ChatResult<()>;

    /// A fresh receiver for events published after this call.
    fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent>;

    fn name(&self) -> &'static str;
}

/// In-process bus. Instances sharing one `MemoryEventBus` behave like a fleet
/// sharing a broker.
#[derive(Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl MemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: &BroadcastEvent) -> ChatResult<()> {
        if self.sender.send(event.clone()).is_err() {
            debug!(channel = event.channel(), "no bus subscribers");
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.sender.subscribe()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Redis pub/sub bus. Publishes JSON payloads on the event's channel; a
/// background listener feeds everything received into a local broadcast
/// channel and reconnects with backoff when the subscription drops.
pub struct RedisEventBus {
    publisher: ConnectionManager,
    local: broadcast::Sender<BroadcastEvent>,
    listener: JoinHandle<()>,
}

impl RedisEventBus {
    /// Returns once the listener holds its subscription; events published
    /// after that reach every later `subscribe` receiver.
    pub async fn connect(client: redis::Client, capacity: usize) -> ChatResult<Self> {
        let publisher = ConnectionManager::new(client.clone()).await?;
        let (local, _) = broadcast::channel(capacity.max(1));
        let (subscribed_tx, mut subscribed) = watch::channel(false);
        let listener = tokio::spawn(run_listener(client, local.clone(), subscribed_tx));

        let ready = tokio::time::timeout(SUBSCRIBE_TIMEOUT, async {
            subscribed.wait_for(|subscribed| *subscribed).await.map(|_| ())
        })
        .await;
        if !matches!(ready, Ok(Ok(()))) {
            listener.abort();
            return Err(ChatError::transient(
                "redis bus subscription was not established",
            ));
        }

        info!(channels = ?BUS_CHANNELS, "redis event bus connected");
        Ok(Self {
            publisher,
            local,
            listener,
        })
    }
}

impl Drop for RedisEventBus {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: &BroadcastEvent) -> ChatResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| ChatError::transient(format!("failed to encode bus event: {e}")))?;
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(event.channel(), payload).await?;
        debug!(channel = event.channel(), receivers, "published bus event");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.local.subscribe()
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

async fn run_listener(
    client: redis::Client,
    local: broadcast::Sender<BroadcastEvent>,
    subscribed: watch::Sender<bool>,
) {
    let mut delay = INITIAL_RECONNECT_DELAY;
    loop {
        let result = listen_once(&client, &local, &subscribed, &mut delay).await;
        subscribed.send_replace(false);
        match result {
            Ok(()) => warn!("redis subscription stream ended, reconnecting"),
            Err(error) => warn!(%error, ?delay, "redis subscription failed, reconnecting"),
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(MAX_RECONNECT_DELAY);
    }
}

async fn listen_once(
    client: &redis::Client,
    local: &broadcast::Sender<BroadcastEvent>,
    subscribed: &watch::Sender<bool>,
    delay: &mut Duration,
) -> redis::RedisResult<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    for channel in BUS_CHANNELS {
        pubsub.subscribe(channel).await?;
    }
    *delay = INITIAL_RECONNECT_DELAY;
    subscribed.send_replace(true);
    info!("subscribed to redis bus channels");

    let mut messages = pubsub.into_on_message();
    while let Some(message) = messages.next().await {
        let channel = message.get_channel_name().to_string();
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%channel, %error, "unreadable bus payload");
                continue;
            }
        };

        match serde_json::from_str::<BroadcastEvent>(&payload) {
            Ok(event) => {
                // no local receivers yet is fine
                let _ = local.send(event);
            }
            Err(error) => warn!(%channel, %error, "ignoring malformed bus event"),
        }
    }
    Ok(())
}
