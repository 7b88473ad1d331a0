//! Repository for message data access operations.

use crate::entities::{Message, MessageKind, NewMessage};
use crate::types::{DatabaseError, DatabaseResult};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::info;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, kind, position, \
     is_edited, edited_at, is_deleted, deleted_at, created_at, updated_at";

/// Repository for message database operations
#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a message at its assigned position.
    ///
    /// The insert and the conversation's `updated_at` bump commit together. A
    /// position that is already taken fails with [`DatabaseError::Duplicate`].
    pub async fn insert(&self, request: &NewMessage) -> DatabaseResult<Message> {
        if request.position < 1 {
            return Err(DatabaseError::ValidationError(format!(
                "position must be positive, got {}",
                request.position
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, content, kind, position,
                                   is_edited, is_deleted, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?, ?)",
        )
        .bind(&id)
        .bind(&request.conversation_id)
        .bind(&request.sender_id)
        .bind(&request.content)
        .bind(request.kind.as_str())
        .bind(request.position)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&request.conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            message_id = %id,
            conversation_id = %request.conversation_id,
            position = request.position,
            "created new message"
        );

        Ok(Message {
            id,
            conversation_id: request.conversation_id.clone(),
            sender_id: request.sender_id.clone(),
            content: request.content.clone(),
            kind: request.kind,
            position: request.position,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Page through visible messages in position order.
    pub async fn list_by_conversation(
        &self,
        conversation_id: &str,
        limit: i64,
        offset: i64,
    ) -> DatabaseResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ? AND is_deleted = 0
             ORDER BY position ASC
             LIMIT ? OFFSET ?"
        ))
        .bind(conversation_id)
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    /// The `limit` most recent visible messages, returned in ascending position order.
    pub async fn recent(&self, conversation_id: &str, limit: i64) -> DatabaseResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM (
                 SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ? AND is_deleted = 0
                 ORDER BY position DESC
                 LIMIT ?
             ) ORDER BY position ASC"
        ))
        .bind(conversation_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    /// Highest position ever recorded for the conversation, deleted messages included.
    /// Zero when the conversation has no messages.
    pub async fn max_position(&self, conversation_id: &str) -> DatabaseResult<i64> {
        let position: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position), 0) FROM messages WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(position)
    }

    pub async fn find_by_id(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> DatabaseResult<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ? AND id = ?"
        ))
        .bind(conversation_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(message_from_row).transpose()
    }

    /// Replace the content of a visible message and mark it edited.
    pub async fn update_content(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
    ) -> DatabaseResult<Message> {
        let now = chrono::Utc::now().to_rfc3339();
        let updated = sqlx::query(
            "UPDATE messages
             SET content = ?, is_edited = 1, edited_at = ?, updated_at = ?
             WHERE conversation_id = ? AND id = ? AND is_deleted = 0",
        )
        .bind(content)
        .bind(&now)
        .bind(&now)
        .bind(conversation_id)
        .bind(message_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(DatabaseError::NotFound(format!("message {message_id}")));
        }

        info!(message_id = %message_id, conversation_id = %conversation_id, "message edited");
        self.find_by_id(conversation_id, message_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("message {message_id}")))
    }

    /// Soft delete. The row and its position stay reserved.
    pub async fn soft_delete(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> DatabaseResult<Message> {
        let now = chrono::Utc::now().to_rfc3339();
        let updated = sqlx::query(
            "UPDATE messages
             SET is_deleted = 1, deleted_at = ?, updated_at = ?
             WHERE conversation_id = ? AND id = ? AND is_deleted = 0",
        )
        .bind(&now)
        .bind(&now)
        .bind(conversation_id)
        .bind(message_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(DatabaseError::NotFound(format!("message {message_id}")));
        }

        info!(message_id = %message_id, conversation_id = %conversation_id, "message deleted");
        self.find_by_id(conversation_id, message_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("message {message_id}")))
    }

    /// Every message of a conversation in position order, deleted ones included.
    pub async fn dump(&self, conversation_id: &str) -> DatabaseResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ? ORDER BY position ASC"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }
}

fn message_from_row(row: &SqliteRow) -> DatabaseResult<Message> {
    let kind: String = row.try_get("kind")?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        content: row.try_get("content")?,
        kind: kind.parse::<MessageKind>()?,
        position: row.try_get("position")?,
        is_edited: row.try_get("is_edited")?,
        edited_at: row.try_get("edited_at")?,
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ConversationKind, NewConversation};
    use crate::repos::ConversationRepository;
    use crate::testing::create_test_pool;

    async fn seed_conversation(pool: &SqlitePool) -> String {
        ConversationRepository::new(pool.clone())
            .create(&NewConversation {
                name: "general".to_string(),
                description: None,
                kind: ConversationKind::Group,
                participant_ids: vec!["alice".to_string(), "bob".to_string()],
            })
            .await
            .unwrap()
            .id
    }

    fn new_message(conversation_id: &str, position: i64, content: &str) -> NewMessage {
        NewMessage {
            conversation_id: conversation_id.to_string(),
            sender_id: "alice".to_string(),
            content: content.to_string(),
            kind: MessageKind::Text,
            position,
        }
    }

    #[tokio::test]
    async fn test_insert_and_page_in_position_order() {
        let (pool, _temp_dir) = create_test_pool().await;
        let conversation_id = seed_conversation(&pool).await;
        let repo = MessageRepository::new(pool);

        // inserted out of order on purpose
        repo.insert(&new_message(&conversation_id, 2, "second")).await.unwrap();
        repo.insert(&new_message(&conversation_id, 1, "first")).await.unwrap();
        repo.insert(&new_message(&conversation_id, 3, "third")).await.unwrap();

        let page = repo.list_by_conversation(&conversation_id, 2, 0).await.unwrap();
        let contents: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);

        let rest = repo.list_by_conversation(&conversation_id, 10, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].position, 3);
    }

    #[tokio::test]
    async fn test_duplicate_position_is_rejected() {
        let (pool, _temp_dir) = create_test_pool().await;
        let conversation_id = seed_conversation(&pool).await;
        let repo = MessageRepository::new(pool);

        repo.insert(&new_message(&conversation_id, 1, "hello")).await.unwrap();
        let result = repo.insert(&new_message(&conversation_id, 1, "again")).await;
        assert!(matches!(result, Err(DatabaseError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_max_position_counts_deleted_messages() {
        let (pool, _temp_dir) = create_test_pool().await;
        let conversation_id = seed_conversation(&pool).await;
        let repo = MessageRepository::new(pool);

        assert_eq!(repo.max_position(&conversation_id).await.unwrap(), 0);
        repo.insert(&new_message(&conversation_id, 1, "a")).await.unwrap();
        let last = repo.insert(&new_message(&conversation_id, 2, "b")).await.unwrap();
        repo.soft_delete(&conversation_id, &last.id).await.unwrap();

        assert_eq!(repo.max_position(&conversation_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_soft_deleted_messages_are_hidden() {
        let (pool, _temp_dir) = create_test_pool().await;
        let conversation_id = seed_conversation(&pool).await;
        let repo = MessageRepository::new(pool);

        let first = repo.insert(&new_message(&conversation_id, 1, "a")).await.unwrap();
        repo.insert(&new_message(&conversation_id, 2, "b")).await.unwrap();

        let deleted = repo.soft_delete(&conversation_id, &first.id).await.unwrap();
        assert!(deleted.is_deleted);
        assert!(deleted.deleted_at.is_some());

        let visible = repo.list_by_conversation(&conversation_id, 10, 0).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].content, "b");

        let recent = repo.recent(&conversation_id, 10).await.unwrap();
        assert_eq!(recent.len(), 1);

        let again = repo.soft_delete(&conversation_id, &first.id).await;
        assert!(matches!(again, Err(DatabaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_recent_returns_tail_ascending() {
        let (pool, _temp_dir) = create_test_pool().await;
        let conversation_id = seed_conversation(&pool).await;
        let repo = MessageRepository::new(pool);

        for position in 1..=5 {
            repo.insert(&new_message(&conversation_id, position, &format!("m{position}")))
                .await
                .unwrap();
        }

        let recent = repo.recent(&conversation_id, 2).await.unwrap();
        let positions: Vec<_> = recent.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![4, 5]);
    }

    #[tokio::test]
    async fn test_update_content_marks_edited() {
        let (pool, _temp_dir) = create_test_pool().await;
        let conversation_id = seed_conversation(&pool).await;
        let repo = MessageRepository::new(pool);

        let message = repo.insert(&new_message(&conversation_id, 1, "helo")).await.unwrap();
        let edited = repo
            .update_content(&conversation_id, &message.id, "hello")
            .await
            .unwrap();

        assert_eq!(edited.content, "hello");
        assert!(edited.is_edited);
        assert_eq!(edited.position, 1);
    }
}
