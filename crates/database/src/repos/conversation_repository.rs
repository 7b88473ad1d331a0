//! Repository for conversation and participant data access.

use crate::entities::{Conversation, ConversationKind, NewConversation};
use crate::types::{DatabaseError, DatabaseResult};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, info};

/// Result of adding a participant; `added` is false when the user was already present.
#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    pub conversation: Conversation,
    pub added: bool,
}

/// Repository for conversation database operations
#[derive(Clone)]
pub struct ConversationRepository {
    pool: SqlitePool,
}

impl ConversationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a conversation together with its initial participant set.
    pub async fn create(&self, request: &NewConversation) -> DatabaseResult<Conversation> {
        if request.participant_ids.is_empty() {
            return Err(DatabaseError::ValidationError(
                "a conversation needs at least one participant".to_string(),
            ));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO conversations (id, name, description, kind, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.kind.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let mut participant_ids: Vec<String> = Vec::with_capacity(request.participant_ids.len());
        for user_id in &request.participant_ids {
            if participant_ids.contains(user_id) {
                continue;
            }
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, user_id, joined_at)
                 VALUES (?, ?, ?)",
            )
            .bind(&id)
            .bind(user_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            participant_ids.push(user_id.clone());
        }

        tx.commit().await?;

        info!(
            conversation_id = %id,
            kind = %request.kind,
            participants = participant_ids.len(),
            "created new conversation"
        );

        Ok(Conversation {
            id,
            name: request.name.clone(),
            description: request.description.clone(),
            kind: request.kind,
            participant_ids,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Find a conversation by id, including its participants.
    pub async fn find_by_id(&self, id: &str) -> DatabaseResult<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, name, description, kind, is_active, created_at, updated_at
             FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let participant_ids = self.participant_ids(id).await?;
                Ok(Some(conversation_from_row(&row, participant_ids)?))
            }
            None => Ok(None),
        }
    }

    /// Find a conversation only if `user_id` participates in it.
    pub async fn find_for_member(
        &self,
        id: &str,
        user_id: &str,
    ) -> DatabaseResult<Option<Conversation>> {
        let is_member: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM conversation_participants WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        if is_member.is_none() {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    /// Participant ids in join order.
    pub async fn participant_ids(&self, id: &str) -> DatabaseResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT user_id FROM conversation_participants
             WHERE conversation_id = ? ORDER BY rowid ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Add a participant. Adding an existing participant changes nothing.
    pub async fn add_participant(&self, id: &str, user_id: &str) -> DatabaseResult<Membership> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(DatabaseError::NotFound(format!("conversation {id}")));
        }

        let inserted = sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, user_id, joined_at)
             VALUES (?, ?, ?)
             ON CONFLICT (conversation_id, user_id) DO NOTHING",
        )
        .bind(id)
        .bind(user_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let added = inserted > 0;
        if added {
            sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
                .bind(&now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        if added {
            info!(conversation_id = %id, user_id = %user_id, "participant added");
        } else {
            debug!(conversation_id = %id, user_id = %user_id, "participant already present");
        }

        let conversation = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("conversation {id}")))?;

        Ok(Membership {
            conversation,
            added,
        })
    }

    /// Conversations the user participates in, most recently updated first.
    pub async fn list_for_user(&self, user_id: &str) -> DatabaseResult<Vec<Conversation>> {
        let rows = sqlx::query(
            "SELECT c.id, c.name, c.description, c.kind, c.is_active, c.created_at, c.updated_at
             FROM conversations c
             JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE p.user_id = ? AND c.is_active = 1
             ORDER BY c.updated_at DESC, c.id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let participant_ids = self.participant_ids(&id).await?;
            conversations.push(conversation_from_row(&row, participant_ids)?);
        }
        Ok(conversations)
    }

    /// All conversations, oldest first.
    pub async fn list_all(&self) -> DatabaseResult<Vec<Conversation>> {
        let rows = sqlx::query(
            "SELECT id, name, description, kind, is_active, created_at, updated_at
             FROM conversations ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let participant_ids = self.participant_ids(&id).await?;
            conversations.push(conversation_from_row(&row, participant_ids)?);
        }
        Ok(conversations)
    }
}

fn conversation_from_row(
    row: &SqliteRow,
    participant_ids: Vec<String>,
) -> DatabaseResult<Conversation> {
    let kind: String = row.try_get("kind")?;
    Ok(Conversation {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        kind: kind.parse::<ConversationKind>()?,
        participant_ids,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::create_test_pool;

    fn request(participants: &[&str]) -> NewConversation {
        NewConversation {
            name: "general".to_string(),
            description: Some("team room".to_string()),
            kind: ConversationKind::Group,
            participant_ids: participants.iter().map(|id| id.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_create_collapses_duplicate_participants() {
        let (pool, _temp_dir) = create_test_pool().await;
        let repo = ConversationRepository::new(pool);

        let conversation = repo.create(&request(&["alice", "bob", "alice"])).await.unwrap();
        assert_eq!(conversation.participant_ids, vec!["alice", "bob"]);

        let stored = repo.find_by_id(&conversation.id).await.unwrap().unwrap();
        assert_eq!(stored, conversation);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_participants() {
        let (pool, _temp_dir) = create_test_pool().await;
        let repo = ConversationRepository::new(pool);

        let result = repo.create(&request(&[])).await;
        assert!(matches!(result, Err(DatabaseError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_find_for_member_hides_conversation_from_outsiders() {
        let (pool, _temp_dir) = create_test_pool().await;
        let repo = ConversationRepository::new(pool);
        let conversation = repo.create(&request(&["alice"])).await.unwrap();

        assert!(repo
            .find_for_member(&conversation.id, "alice")
            .await
            .unwrap()
            .is_some());
        assert!(repo
            .find_for_member(&conversation.id, "mallory")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_add_participant_is_idempotent() {
        let (pool, _temp_dir) = create_test_pool().await;
        let repo = ConversationRepository::new(pool);
        let conversation = repo.create(&request(&["alice"])).await.unwrap();

        let first = repo.add_participant(&conversation.id, "bob").await.unwrap();
        assert!(first.added);
        assert_eq!(first.conversation.participant_ids, vec!["alice", "bob"]);

        let second = repo.add_participant(&conversation.id, "bob").await.unwrap();
        assert!(!second.added);
        assert_eq!(second.conversation.participant_ids, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_add_participant_to_missing_conversation() {
        let (pool, _temp_dir) = create_test_pool().await;
        let repo = ConversationRepository::new(pool);

        let result = repo.add_participant("missing", "bob").await;
        assert!(matches!(result, Err(DatabaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_for_user_only_returns_memberships() {
        let (pool, _temp_dir) = create_test_pool().await;
        let repo = ConversationRepository::new(pool);
        let shared = repo.create(&request(&["alice", "bob"])).await.unwrap();
        repo.create(&request(&["carol"])).await.unwrap();

        let listed = repo.list_for_user("bob").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, shared.id);
    }
}
