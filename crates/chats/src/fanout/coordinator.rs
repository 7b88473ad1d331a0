//! The fan-out coordinator: the write path that turns a send request into a
//! persisted, positioned message and a bus event, and the broadcast path that
//! turns bus events into pushes to this instance's connections.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parley_config::FanoutConfig;
use parley_database::{
    Conversation, ConversationKind, Membership, Message, MessageKind, NewConversation, NewMessage,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::locks::ConversationLocks;
use super::metrics::{FanoutMetrics, MetricsSnapshot};
use super::reorder::{ReorderBuffer, Release};
use crate::bus::EventBus;
use crate::cache::RecentWindowCache;
use crate::identity::{IdentityLookup, UserProfile};
use crate::registry::ConnectionRegistry;
use crate::sequencer::Sequencer;
use crate::store::ConversationStore;
use crate::types::{BroadcastEvent, ChatError, ChatResult, MessageView, ServerEvent};

/// Messages returned to a connection that joins a room.
pub const JOIN_HISTORY_LIMIT: i64 = 50;

const MAX_SEQUENCE_ATTEMPTS: u32 = 3;
const LANE_IDLE_TTL: Duration = Duration::from_secs(300);
const MIN_TICK: Duration = Duration::from_millis(10);

/// Stages of a single send. A write can be rejected at any stage before
/// `Persisted`; after that every failure is best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    Received,
    Authorized,
    Sequenced,
    Persisted,
    Cached,
    Published,
    Acknowledged,
}

impl WriteStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStage::Received => "received",
            WriteStage::Authorized => "authorized",
            WriteStage::Sequenced => "sequenced",
            WriteStage::Persisted => "persisted",
            WriteStage::Cached => "cached",
            WriteStage::Published => "published",
            WriteStage::Acknowledged => "acknowledged",
        }
    }
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct FanoutSettings {
    pub instance_id: String,
    pub reorder_window: Duration,
    pub history_page_limit: i64,
}

impl FanoutSettings {
    pub fn from_config(config: &FanoutConfig, instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            reorder_window: Duration::from_millis(config.reorder_window_ms),
            history_page_limit: config.history_page_limit.max(1),
        }
    }
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self::from_config(&FanoutConfig::default(), "local")
    }
}

/// Collaborators the coordinator is wired with.
pub struct FanoutComponents {
    pub store: Arc<dyn ConversationStore>,
    pub sequencer: Arc<dyn Sequencer>,
    pub cache: Arc<dyn RecentWindowCache>,
    pub bus: Arc<dyn EventBus>,
    pub identity: Arc<dyn IdentityLookup>,
}

#[derive(Debug, Clone)]
pub struct CreateConversation {
    pub name: String,
    pub description: Option<String>,
    /// `public`, `private` or `group` (default).
    pub kind: Option<String>,
    pub participant_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SendMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    /// `text` (default), `image`, `file` or `system`.
    pub kind: Option<String>,
}

/// Reply to a connection joining a room.
#[derive(Debug, Clone)]
pub struct RoomJoin {
    pub conversation: Conversation,
    pub messages: Vec<MessageView>,
}

#[derive(Clone)]
pub struct FanoutCoordinator {
    store: Arc<dyn ConversationStore>,
    sequencer: Arc<dyn Sequencer>,
    cache: Arc<dyn RecentWindowCache>,
    bus: Arc<dyn EventBus>,
    identity: Arc<dyn IdentityLookup>,
    registry: ConnectionRegistry,
    locks: Arc<ConversationLocks>,
    metrics: Arc<FanoutMetrics>,
    settings: Arc<FanoutSettings>,
}

impl FanoutCoordinator {
    pub fn new(
        components: FanoutComponents,
        registry: ConnectionRegistry,
        settings: FanoutSettings,
    ) -> Self {
        Self {
            store: components.store,
            sequencer: components.sequencer,
            cache: components.cache,
            bus: components.bus,
            identity: components.identity,
            registry,
            locks: Arc::new(ConversationLocks::new()),
            metrics: Arc::new(FanoutMetrics::new()),
            settings: Arc::new(settings),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn settings(&self) -> &FanoutSettings {
        &self.settings
    }

    pub fn instance_id(&self) -> &str {
        &self.settings.instance_id
    }

    pub fn bus_name(&self) -> &'static str {
        self.bus.name()
    }

    pub fn sequencer_name(&self) -> &'static str {
        self.sequencer.name()
    }

    /// Create a conversation after every participant id resolved to a user.
    pub async fn create_conversation(&self, request: CreateConversation) -> ChatResult<Conversation> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ChatError::validation("conversation name must not be empty"));
        }
        let kind = match request.kind.as_deref().map(str::trim) {
            None | Some("") => ConversationKind::default(),
            Some(kind) => kind.parse::<ConversationKind>()?,
        };

        let mut participant_ids: Vec<String> = Vec::with_capacity(request.participant_ids.len());
        for user_id in &request.participant_ids {
            let user_id = user_id.trim();
            if user_id.is_empty() {
                return Err(ChatError::validation("participant ids must not be empty"));
            }
            if !participant_ids.iter().any(|id| id == user_id) {
                participant_ids.push(user_id.to_string());
            }
        }
        if participant_ids.is_empty() {
            return Err(ChatError::validation(
                "a conversation needs at least one participant",
            ));
        }

        for user_id in &participant_ids {
            if self.identity.find_user(user_id).await?.is_none() {
                return Err(ChatError::validation(format!(
                    "User with ID {user_id} not found"
                )));
            }
        }

        let conversation = self
            .store
            .create_conversation(&NewConversation {
                name: name.to_string(),
                description: request
                    .description
                    .filter(|description| !description.trim().is_empty()),
                kind,
                participant_ids,
            })
            .await?;

        info!(
            conversation_id = %conversation.id,
            participants = conversation.participant_ids.len(),
            "conversation created"
        );
        self.publish(BroadcastEvent::ConversationCreated {
            conversation: conversation.clone(),
        })
        .await;

        Ok(conversation)
    }

    pub async fn list_conversations(&self, user_id: &str) -> ChatResult<Vec<Conversation>> {
        self.store.list_for_user(user_id).await
    }

    pub async fn get_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> ChatResult<Conversation> {
        self.authorize(conversation_id, user_id).await
    }

    /// Add `user_id` to the participant set. Joining twice changes nothing.
    pub async fn join_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> ChatResult<Conversation> {
        let membership = self.add_member(conversation_id, user_id).await?;
        if membership.added {
            self.publish(BroadcastEvent::ParticipantJoined {
                conversation: membership.conversation.clone(),
                user_id: user_id.to_string(),
            })
            .await;
        }
        Ok(membership.conversation)
    }

    /// Join over a live connection: membership, room subscription, and the
    /// most recent history for the joining client.
    pub async fn join_room(
        &self,
        connection_id: &str,
        conversation_id: &str,
        user_id: &str,
    ) -> ChatResult<RoomJoin> {
        self.check_connection_owner(connection_id, user_id).await?;

        let membership = self.add_member(conversation_id, user_id).await?;
        self.registry
            .join(connection_id, conversation_id, user_id)
            .await?;

        let recent = self.recent_window(conversation_id, JOIN_HISTORY_LIMIT).await?;
        let messages = self.enrich(recent).await;

        self.publish(BroadcastEvent::ParticipantJoined {
            conversation: membership.conversation.clone(),
            user_id: user_id.to_string(),
        })
        .await;

        Ok(RoomJoin {
            conversation: membership.conversation,
            messages,
        })
    }

    /// Drop the room subscription. Membership is untouched.
    pub async fn leave_room(
        &self,
        connection_id: &str,
        conversation_id: &str,
        user_id: &str,
    ) -> ChatResult<()> {
        self.check_connection_owner(connection_id, user_id).await?;

        if self.registry.leave(connection_id, conversation_id).await {
            self.publish(BroadcastEvent::ParticipantLeft {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
            })
            .await;
        }
        Ok(())
    }

    /// Forget a closed connection. Returns the rooms it was subscribed to.
    pub async fn disconnect(&self, connection_id: &str) -> Vec<String> {
        self.registry.unregister(connection_id).await
    }

    /// The write path: authorize, sequence, persist, cache, publish, acknowledge.
    pub async fn send_message(&self, request: SendMessage) -> ChatResult<Message> {
        let SendMessage {
            conversation_id,
            sender_id,
            content,
            kind,
        } = request;
        debug!(
            stage = %WriteStage::Received,
            conversation_id = %conversation_id,
            sender_id = %sender_id,
            "write stage reached"
        );

        let kind = parse_message_kind(kind.as_deref())
            .and_then(|kind| validate_content(&content).map(|()| kind))
            .map_err(|error| reject(WriteStage::Received, &conversation_id, error))?;

        let conversation = self
            .authorize(&conversation_id, &sender_id)
            .await
            .map_err(|error| reject(WriteStage::Received, &conversation_id, error))?;
        debug!(stage = %WriteStage::Authorized, conversation_id = %conversation_id, "write stage reached");

        // Runs detached so a caller that goes away cannot abandon a sequenced write.
        let job = PersistJob {
            store: self.store.clone(),
            sequencer: self.sequencer.clone(),
            locks: self.locks.clone(),
            metrics: self.metrics.clone(),
            request: NewMessage {
                conversation_id: conversation_id.clone(),
                sender_id,
                content,
                kind,
                position: 0,
            },
        };
        let message = match tokio::spawn(job.run()).await {
            Ok(result) => result?,
            Err(error) => {
                return Err(reject(
                    WriteStage::Authorized,
                    &conversation_id,
                    ChatError::from(error),
                ))
            }
        };

        self.cache_insert(&message).await;
        debug!(stage = %WriteStage::Cached, message_id = %message.id, "write stage reached");

        let sender = self.sender_profile(&message.sender_id).await;
        let published = self
            .publish(BroadcastEvent::MessageCreated {
                message: MessageView {
                    message: message.clone(),
                    sender,
                },
                participant_ids: conversation.participant_ids,
            })
            .await;
        if published {
            debug!(stage = %WriteStage::Published, message_id = %message.id, "write stage reached");
        }

        debug!(
            stage = %WriteStage::Acknowledged,
            message_id = %message.id,
            position = message.position,
            "write stage reached"
        );
        Ok(message)
    }

    /// One page of visible history in position order.
    pub async fn list_messages(
        &self,
        conversation_id: &str,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> ChatResult<Vec<Message>> {
        let limit = self.page_limit(limit)?;
        if offset < 0 {
            return Err(ChatError::validation("offset must not be negative"));
        }

        self.authorize(conversation_id, user_id).await?;
        self.store.list_messages(conversation_id, limit, offset).await
    }

    /// The most recent messages in ascending position order, cache first.
    pub async fn recent_messages(
        &self,
        conversation_id: &str,
        user_id: &str,
        limit: i64,
    ) -> ChatResult<Vec<Message>> {
        let limit = self.page_limit(limit)?;
        self.authorize(conversation_id, user_id).await?;
        self.recent_window(conversation_id, limit).await
    }

    /// Sender-only edit.
    pub async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        user_id: &str,
        content: &str,
    ) -> ChatResult<Message> {
        validate_content(content)?;
        let conversation = self.authorize(conversation_id, user_id).await?;
        self.check_sender(conversation_id, message_id, user_id).await?;

        let updated = self
            .store
            .update_message(conversation_id, message_id, content)
            .await?;
        self.cache_insert(&updated).await;

        self.publish(BroadcastEvent::MessageUpdated {
            message: updated.clone(),
            participant_ids: conversation.participant_ids,
        })
        .await;
        Ok(updated)
    }

    /// Sender-only soft delete. The position stays reserved.
    pub async fn delete_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        user_id: &str,
    ) -> ChatResult<Message> {
        let conversation = self.authorize(conversation_id, user_id).await?;
        self.check_sender(conversation_id, message_id, user_id).await?;

        let deleted = self.store.delete_message(conversation_id, message_id).await?;
        self.cache_insert(&deleted).await;

        self.publish(BroadcastEvent::MessageDeleted {
            conversation_id: conversation_id.to_string(),
            message_id: deleted.id.clone(),
            position: deleted.position,
            participant_ids: conversation.participant_ids,
        })
        .await;
        Ok(deleted)
    }

    /// Start consuming the bus. The subscription is taken before this returns,
    /// so every event published afterwards reaches the loop.
    pub fn spawn_broadcast_loop(&self) -> JoinHandle<()> {
        let receiver = self.bus.subscribe();
        let coordinator = self.clone();
        info!(
            instance_id = %self.settings.instance_id,
            bus = self.bus.name(),
            reorder_window_ms = self.settings.reorder_window.as_millis() as u64,
            "starting broadcast loop"
        );
        tokio::spawn(async move { coordinator.run_broadcast_loop(receiver).await })
    }

    async fn run_broadcast_loop(self, mut receiver: broadcast::Receiver<BroadcastEvent>) {
        let window = self.settings.reorder_window;
        let mut buffer = ReorderBuffer::new(window, LANE_IDLE_TTL);
        let mut ticker = tokio::time::interval((window / 2).max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = receiver.recv() => match received {
                    Ok(event) => {
                        FanoutMetrics::incr(&self.metrics.events_received);
                        let lane = event.conversation_id().to_string();
                        if let Some(position) = event.ordering_position() {
                            let release = buffer.push(&lane, position, event, Instant::now());
                            self.deliver_release(release).await;
                        } else if let Some(position) = event.amended_position() {
                            let release = buffer.push_after(&lane, position, event);
                            self.deliver_release(release).await;
                        } else {
                            self.deliver(event).await;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        FanoutMetrics::add(&self.metrics.bus_lagged, skipped);
                        warn!(skipped, "broadcast loop fell behind the bus, events lost");
                    }
                    Err(RecvError::Closed) => {
                        info!("event bus closed, stopping broadcast loop");
                        let release = buffer.drain();
                        self.deliver_release(release).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let release = buffer.expire(Instant::now());
                    self.deliver_release(release).await;
                }
            }
        }
    }

    async fn deliver_release(&self, release: Release<BroadcastEvent>) {
        if release.dropped > 0 {
            debug!(dropped = release.dropped, "dropped duplicate or stale message events");
        }
        if release.skipped > 0 {
            warn!(skipped = release.skipped, "reorder window expired with missing positions");
        }
        FanoutMetrics::add(&self.metrics.reorder_drops, release.dropped);
        FanoutMetrics::add(&self.metrics.reorder_timeouts, release.skipped);

        for event in release.ready {
            self.deliver(event).await;
        }
    }

    async fn deliver(&self, event: BroadcastEvent) {
        let (room, participants) = routing(&event);
        let report = self
            .registry
            .fan_out(room.as_deref(), &participants, &ServerEvent::from(event))
            .await;

        FanoutMetrics::add(&self.metrics.events_delivered, report.delivered);
        FanoutMetrics::add(&self.metrics.deliveries_dropped, report.dropped);
    }

    async fn authorize(&self, conversation_id: &str, user_id: &str) -> ChatResult<Conversation> {
        // absent and not-a-member look the same to the caller
        self.store
            .find_for_member(conversation_id, user_id)
            .await?
            .ok_or_else(|| {
                ChatError::unauthorized(format!(
                    "user {user_id} is not a participant of conversation {conversation_id}"
                ))
            })
    }

    async fn add_member(&self, conversation_id: &str, user_id: &str) -> ChatResult<Membership> {
        if self.identity.find_user(user_id).await?.is_none() {
            return Err(ChatError::not_found(format!("user {user_id}")));
        }
        self.store.add_participant(conversation_id, user_id).await
    }

    async fn check_connection_owner(&self, connection_id: &str, user_id: &str) -> ChatResult<()> {
        match self.registry.user_of(connection_id).await {
            Some(owner) if owner == user_id => Ok(()),
            Some(_) => Err(ChatError::unauthorized(format!(
                "connection {connection_id} does not belong to user {user_id}"
            ))),
            None => Err(ChatError::not_found(format!("connection {connection_id}"))),
        }
    }

    async fn check_sender(
        &self,
        conversation_id: &str,
        message_id: &str,
        user_id: &str,
    ) -> ChatResult<Message> {
        let message = self
            .store
            .find_message(conversation_id, message_id)
            .await?
            .filter(|message| !message.is_deleted)
            .ok_or_else(|| ChatError::not_found(format!("message {message_id}")))?;

        if message.sender_id != user_id {
            return Err(ChatError::unauthorized(
                "only the sender can change a message",
            ));
        }
        Ok(message)
    }

    fn page_limit(&self, limit: i64) -> ChatResult<i64> {
        if limit < 1 {
            return Err(ChatError::validation("limit must be at least 1"));
        }
        Ok(limit.min(self.settings.history_page_limit))
    }

    async fn recent_window(&self, conversation_id: &str, limit: i64) -> ChatResult<Vec<Message>> {
        let wanted = usize::try_from(limit).unwrap_or(0);

        let cached = if wanted <= self.cache.capacity() {
            match self.cache.read(conversation_id, wanted).await {
                Ok(messages) => messages,
                Err(error) => {
                    self.cache_failed(conversation_id, &error);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        if cached.len() >= wanted {
            return Ok(cached);
        }

        let stored = self.store.recent_messages(conversation_id, limit).await?;
        if stored.len() > cached.len() {
            debug!(
                conversation_id = %conversation_id,
                cached = cached.len(),
                stored = stored.len(),
                "recent window served from store"
            );
            self.backfill(conversation_id, &stored).await;
        }
        Ok(stored)
    }

    async fn backfill(&self, conversation_id: &str, messages: &[Message]) {
        for message in messages.iter().rev().take(self.cache.capacity()) {
            if let Err(error) = self.cache.backfill(message).await {
                self.cache_failed(conversation_id, &error);
                break;
            }
        }
    }

    async fn cache_insert(&self, message: &Message) {
        if let Err(error) = self.cache.insert(message).await {
            self.cache_failed(&message.conversation_id, &error);
        }
    }

    fn cache_failed(&self, conversation_id: &str, error: &ChatError) {
        FanoutMetrics::incr(&self.metrics.cache_failures);
        warn!(conversation_id = %conversation_id, %error, "recent-window cache operation failed");
    }

    /// Returns whether the bus accepted the event. Failures are counted, never raised.
    async fn publish(&self, event: BroadcastEvent) -> bool {
        match self.bus.publish(&event).await {
            Ok(()) => {
                FanoutMetrics::incr(&self.metrics.events_published);
                true
            }
            Err(error) => {
                FanoutMetrics::incr(&self.metrics.publish_failures);
                warn!(
                    channel = event.channel(),
                    conversation_id = %event.conversation_id(),
                    %error,
                    "bus publish failed, event persisted but not broadcast"
                );
                false
            }
        }
    }

    async fn sender_profile(&self, sender_id: &str) -> Option<UserProfile> {
        match self.identity.find_user(sender_id).await {
            Ok(profile) => profile,
            Err(error) => {
                FanoutMetrics::incr(&self.metrics.enrichment_failures);
                warn!(sender_id = %sender_id, %error, "sender lookup failed");
                None
            }
        }
    }

    async fn enrich(&self, messages: Vec<Message>) -> Vec<MessageView> {
        let mut profiles: HashMap<String, Option<UserProfile>> = HashMap::new();
        for message in &messages {
            if !profiles.contains_key(&message.sender_id) {
                let profile = self.sender_profile(&message.sender_id).await;
                profiles.insert(message.sender_id.clone(), profile);
            }
        }

        messages
            .into_iter()
            .map(|message| {
                let sender = profiles.get(&message.sender_id).cloned().flatten();
                MessageView { message, sender }
            })
            .collect()
    }
}

/// Sequence-and-persist step of the write path, owned so it can run detached.
struct PersistJob {
    store: Arc<dyn ConversationStore>,
    sequencer: Arc<dyn Sequencer>,
    locks: Arc<ConversationLocks>,
    metrics: Arc<FanoutMetrics>,
    request: NewMessage,
}

impl PersistJob {
    async fn run(self) -> ChatResult<Message> {
        let conversation_id = self.request.conversation_id.clone();

        for attempt in 1..=MAX_SEQUENCE_ATTEMPTS {
            let _guard = if self.sequencer.requires_serialized_writes() {
                Some(self.locks.acquire(&conversation_id).await)
            } else {
                None
            };

            let position = self
                .sequencer
                .next_position(&conversation_id)
                .await
                .map_err(|error| reject(WriteStage::Authorized, &conversation_id, error))?;
            debug!(
                stage = %WriteStage::Sequenced,
                conversation_id = %conversation_id,
                position,
                attempt,
                "write stage reached"
            );

            let request = NewMessage {
                position,
                ..self.request.clone()
            };
            match self.store.append_message(&request).await {
                Ok(message) => {
                    FanoutMetrics::incr(&self.metrics.messages_persisted);
                    debug!(
                        stage = %WriteStage::Persisted,
                        conversation_id = %conversation_id,
                        message_id = %message.id,
                        position,
                        "write stage reached"
                    );
                    return Ok(message);
                }
                Err(ChatError::Conflict { .. }) => {
                    FanoutMetrics::incr(&self.metrics.sequence_conflicts);
                    warn!(
                        conversation_id = %conversation_id,
                        position,
                        attempt,
                        "position already taken"
                    );
                    let persisted_max = self
                        .store
                        .max_position(&conversation_id)
                        .await
                        .map_err(|error| reject(WriteStage::Sequenced, &conversation_id, error))?;
                    if let Err(error) = self
                        .sequencer
                        .observe_conflict(&conversation_id, persisted_max)
                        .await
                    {
                        warn!(conversation_id = %conversation_id, %error, "sequencer resync failed");
                    }
                }
                Err(error) => return Err(reject(WriteStage::Sequenced, &conversation_id, error)),
            }
        }

        Err(reject(
            WriteStage::Sequenced,
            &conversation_id,
            ChatError::transient(format!(
                "position conflict persisted after {MAX_SEQUENCE_ATTEMPTS} attempts"
            )),
        ))
    }
}

fn reject(stage: WriteStage, conversation_id: &str, error: ChatError) -> ChatError {
    warn!(
        stage = %stage,
        conversation_id = %conversation_id,
        code = error.code(),
        %error,
        "message rejected"
    );
    error
}

fn parse_message_kind(kind: Option<&str>) -> ChatResult<MessageKind> {
    match kind.map(str::trim) {
        None | Some("") => Ok(MessageKind::default()),
        Some(kind) => Ok(kind.parse::<MessageKind>()?),
    }
}

fn validate_content(content: &str) -> ChatResult<()> {
    if content.trim().is_empty() {
        return Err(ChatError::validation("message content must not be empty"));
    }
    Ok(())
}

/// Room to push to and participants to reach directly.
fn routing(event: &BroadcastEvent) -> (Option<String>, Vec<String>) {
    match event {
        BroadcastEvent::MessageCreated {
            message,
            participant_ids,
        } => (
            Some(message.message.conversation_id.clone()),
            participant_ids.clone(),
        ),
        BroadcastEvent::MessageUpdated {
            message,
            participant_ids,
        } => (Some(message.conversation_id.clone()), participant_ids.clone()),
        BroadcastEvent::MessageDeleted {
            conversation_id,
            participant_ids,
            ..
        } => (Some(conversation_id.clone()), participant_ids.clone()),
        BroadcastEvent::ConversationCreated { conversation } => {
            (None, conversation.participant_ids.clone())
        }
        BroadcastEvent::ParticipantJoined { conversation, .. } => (
            Some(conversation.id.clone()),
            conversation.participant_ids.clone(),
        ),
        BroadcastEvent::ParticipantLeft {
            conversation_id, ..
        } => (Some(conversation_id.clone()), Vec::new()),
    }
}
