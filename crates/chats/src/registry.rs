//! Per-instance connection registry.
//!
//! Maps users to their live connections and conversations to the connections
//! subscribed to them ("rooms"). Nothing here is visible to other instances;
//! the event bus makes up for that.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::types::{ChatError, ChatResult, ServerEvent};

pub type ConnectionId = String;

struct ConnectionEntry {
    user_id: String,
    sender: mpsc::Sender<ServerEvent>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    users: HashMap<String, HashSet<ConnectionId>>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl RegistryInner {
    fn detach(index: &mut HashMap<String, HashSet<ConnectionId>>, key: &str, connection_id: &str) {
        if let Some(members) = index.get_mut(key) {
            members.remove(connection_id);
            if members.is_empty() {
                index.remove(key);
            }
        }
    }
}

/// Outcome of pushing one event to a set of connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: u64,
    /// Queue full or connection gone.
    pub dropped: u64,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection for `user_id` and return its id.
    pub async fn register(&self, user_id: &str, sender: mpsc::Sender<ServerEvent>) -> ConnectionId {
        let connection_id = cuid2::create_id();
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            connection_id.clone(),
            ConnectionEntry {
                user_id: user_id.to_string(),
                sender,
                rooms: HashSet::new(),
            },
        );
        inner
            .users
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id.clone());

        debug!(connection_id = %connection_id, user_id = %user_id, "connection registered");
        connection_id
    }

    /// Forget a connection and every room it was in. Returns the rooms it left.
    pub async fn unregister(&self, connection_id: &str) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.connections.remove(connection_id) else {
            return Vec::new();
        };

        RegistryInner::detach(&mut inner.users, &entry.user_id, connection_id);
        for room in &entry.rooms {
            RegistryInner::detach(&mut inner.rooms, room, connection_id);
        }

        debug!(
            connection_id = %connection_id,
            user_id = %entry.user_id,
            rooms = entry.rooms.len(),
            "connection unregistered"
        );
        entry.rooms.into_iter().collect()
    }

    /// The user a connection was registered for.
    pub async fn user_of(&self, connection_id: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(connection_id)
            .map(|entry| entry.user_id.clone())
    }

    /// Subscribe a connection to a conversation's room. The connection must
    /// belong to `user_id`.
    pub async fn join(
        &self,
        connection_id: &str,
        conversation_id: &str,
        user_id: &str,
    ) -> ChatResult<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| ChatError::not_found(format!("connection {connection_id}")))?;

        if entry.user_id != user_id {
            return Err(ChatError::unauthorized(format!(
                "connection {connection_id} does not belong to user {user_id}"
            )));
        }

        entry.rooms.insert(conversation_id.to_string());
        inner
            .rooms
            .entry(conversation_id.to_string())
            .or_default()
            .insert(connection_id.to_string());

        debug!(connection_id = %connection_id, conversation_id = %conversation_id, "joined room");
        Ok(())
    }

    /// Returns whether the connection was in the room.
    pub async fn leave(&self, connection_id: &str, conversation_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let was_member = inner
            .connections
            .get_mut(connection_id)
            .is_some_and(|entry| entry.rooms.remove(conversation_id));
        RegistryInner::detach(&mut inner.rooms, conversation_id, connection_id);
        was_member
    }

    pub async fn room_connections(&self, conversation_id: &str) -> Vec<ConnectionId> {
        let inner = self.inner.read().await;
        inner
            .rooms
            .get(conversation_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn user_connections(&self, user_id: &str) -> Vec<ConnectionId> {
        let inner = self.inner.read().await;
        inner
            .users
            .get(user_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Connections in the room plus every connection of the listed users, each once.
    fn collect_targets(
        inner: &RegistryInner,
        conversation_id: Option<&str>,
        user_ids: &[String],
    ) -> HashSet<ConnectionId> {
        let mut targets = HashSet::new();
        if let Some(room) = conversation_id.and_then(|id| inner.rooms.get(id)) {
            targets.extend(room.iter().cloned());
        }
        for user_id in user_ids {
            if let Some(connections) = inner.users.get(user_id) {
                targets.extend(connections.iter().cloned());
            }
        }
        targets
    }

    /// Push `event` to the room and to the listed users' connections without
    /// waiting on slow consumers.
    pub async fn fan_out(
        &self,
        conversation_id: Option<&str>,
        user_ids: &[String],
        event: &ServerEvent,
    ) -> DeliveryReport {
        let inner = self.inner.read().await;
        let mut report = DeliveryReport::default();

        for connection_id in Self::collect_targets(&inner, conversation_id, user_ids) {
            let Some(entry) = inner.connections.get(&connection_id) else {
                continue;
            };
            match entry.sender.try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection_id = %connection_id, "outbound queue full, dropping event");
                    report.dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(connection_id = %connection_id, "connection closed before delivery");
                    report.dropped += 1;
                }
            }
        }
        report
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<ServerEvent>, mpsc::Receiver<ServerEvent>) {
        mpsc::channel(4)
    }

    #[tokio::test]
    async fn test_join_requires_matching_user() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let connection = registry.register("alice", tx).await;

        let err = registry.join(&connection, "c1", "bob").await.unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
        assert!(registry.room_connections("c1").await.is_empty());

        registry.join(&connection, "c1", "alice").await.unwrap();
        assert_eq!(registry.room_connections("c1").await, vec![connection]);
    }

    #[tokio::test]
    async fn test_join_unknown_connection() {
        let registry = ConnectionRegistry::new();
        let err = registry.join("nope", "c1", "alice").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unregister_clears_rooms_and_users() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let connection = registry.register("alice", tx).await;
        registry.join(&connection, "c1", "alice").await.unwrap();
        registry.join(&connection, "c2", "alice").await.unwrap();

        let mut rooms = registry.unregister(&connection).await;
        rooms.sort();
        assert_eq!(rooms, vec!["c1", "c2"]);
        assert!(registry.room_connections("c1").await.is_empty());
        assert!(registry.user_connections("alice").await.is_empty());
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_fan_out_deduplicates_room_and_participants() {
        let registry = ConnectionRegistry::new();
        let (alice_tx, mut alice_rx) = channel();
        let (bob_tx, mut bob_rx) = channel();
        let alice = registry.register("alice", alice_tx).await;
        registry.register("bob", bob_tx).await;
        registry.join(&alice, "c1", "alice").await.unwrap();

        let participants = vec!["alice".to_string(), "bob".to_string()];
        let report = registry
            .fan_out(Some("c1"), &participants, &ServerEvent::Pong)
            .await;

        assert_eq!(report, DeliveryReport { delivered: 2, dropped: 0 });
        assert_eq!(alice_rx.recv().await, Some(ServerEvent::Pong));
        assert!(alice_rx.try_recv().is_err());
        assert_eq!(bob_rx.recv().await, Some(ServerEvent::Pong));
    }

    #[tokio::test]
    async fn test_fan_out_counts_full_and_closed_queues() {
        let registry = ConnectionRegistry::new();
        let (full_tx, _full_rx) = mpsc::channel(1);
        let (closed_tx, closed_rx) = channel();
        drop(closed_rx);

        let full = registry.register("alice", full_tx).await;
        let closed = registry.register("bob", closed_tx).await;
        registry.join(&full, "c1", "alice").await.unwrap();
        registry.join(&closed, "c1", "bob").await.unwrap();

        let first = registry.fan_out(Some("c1"), &[], &ServerEvent::Pong).await;
        assert_eq!(first, DeliveryReport { delivered: 1, dropped: 1 });

        let second = registry.fan_out(Some("c1"), &[], &ServerEvent::Pong).await;
        assert_eq!(second, DeliveryReport { delivered: 0, dropped: 2 });
    }

    #[tokio::test]
    async fn test_leave_only_affects_that_room() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let connection = registry.register("alice", tx).await;
        registry.join(&connection, "c1", "alice").await.unwrap();
        registry.join(&connection, "c2", "alice").await.unwrap();

        assert!(registry.leave(&connection, "c1").await);
        assert!(!registry.leave(&connection, "c1").await);
        assert!(registry.room_connections("c1").await.is_empty());
        assert_eq!(registry.room_connections("c2").await.len(), 1);
    }
}
