//! Durable Store seam consumed by the fan-out core.

use async_trait::async_trait;
use parley_database::{
    Conversation, ConversationRepository, Membership, Message, MessageRepository,
    NewConversation, NewMessage,
};
use sqlx::SqlitePool;

use crate::types::ChatResult;

/// Persistence operations the fan-out core needs. Appends are atomic and
/// `(conversation_id, position)` is unique; a collision surfaces as
/// [`ChatError::Conflict`](crate::ChatError::Conflict).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, request: &NewConversation) -> ChatResult<Conversation>;

    /// `None` when the conversation is absent or `user_id` is not a participant.
    async fn find_for_member(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> ChatResult<Option<Conversation>>;

    async fn add_participant(&self, conversation_id: &str, user_id: &str)
        -> ChatResult<Membership>;

    async fn list_for_user(&self, user_id: &str) -> ChatResult<Vec<Conversation>>;

    async fn append_message(&self, request: &NewMessage) -> ChatResult<Message>;

    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: i64,
        offset: i64,
    ) -> ChatResult<Vec<Message>>;

    async fn recent_messages(&self, conversation_id: &str, limit: i64) -> ChatResult<Vec<Message>>;

    async fn max_position(&self, conversation_id: &str) -> ChatResult<i64>;

    async fn find_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> ChatResult<Option<Message>>;

    async fn update_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
    ) -> ChatResult<Message>;

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> ChatResult<Message>;
}

/// SQLite-backed store built on the database crate's repositories.
#[derive(Clone)]
pub struct SqliteConversationStore {
    conversations: ConversationRepository,
    messages: MessageRepository,
}

impl SqliteConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            conversations: ConversationRepository::new(pool.clone()),
            messages: MessageRepository::new(pool),
        }
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn create_conversation(&self, request: &NewConversation) -> ChatResult<Conversation> {
        Ok(self.conversations.create(request).await?)
    }

    async fn find_for_member(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> ChatResult<Option<Conversation>> {
        Ok(self
            .conversations
            .find_for_member(conversation_id, user_id)
            .await?)
    }

    async fn add_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> ChatResult<Membership> {
        Ok(self
            .conversations
            .add_participant(conversation_id, user_id)
            .await?)
    }

    async fn list_for_user(&self, user_id: &str) -> ChatResult<Vec<Conversation>> {
        Ok(self.conversations.list_for_user(user_id).await?)
    }

    async fn append_message(&self, request: &NewMessage) -> ChatResult<Message> {
        Ok(self.messages.insert(request).await?)
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: i64,
        offset: i64,
    ) -> ChatResult<Vec<Message>> {
        Ok(self
            .messages
            .list_by_conversation(conversation_id, limit, offset)
            .await?)
    }

    async fn recent_messages(&self, conversation_id: &str, limit: i64) -> ChatResult<Vec<Message>> {
        Ok(self.messages.recent(conversation_id, limit).await?)
    }

    async fn max_position(&self, conversation_id: &str) -> ChatResult<i64> {
        Ok(self.messages.max_position(conversation_id).await?)
    }

    async fn find_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> ChatResult<Option<Message>> {
        Ok(self.messages.find_by_id(conversation_id, message_id).await?)
    }

    async fn update_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
    ) -> ChatResult<Message> {
        Ok(self
            .messages
            .update_content(conversation_id, message_id, content)
            .await?)
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> ChatResult<Message> {
        Ok(self.messages.soft_delete(conversation_id, message_id).await?)
    }
}
