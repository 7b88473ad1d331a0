//! Event types for cross-instance fan-out and live connections.

use parley_database::{Conversation, Message};
use serde::{Deserialize, Serialize};

use crate::identity::UserProfile;

pub const MESSAGE_CHANNEL: &str = "chat:message";
pub const CONVERSATION_CHANNEL: &str = "chat:new_chat";
pub const PARTICIPANT_CHANNEL: &str = "chat:participant";

/// Every bus channel an instance subscribes to.
pub const BUS_CHANNELS: [&str; 3] = [MESSAGE_CHANNEL, CONVERSATION_CHANNEL, PARTICIPANT_CHANNEL];

/// A message together with its sender's profile, when one could be resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default)]
    pub sender: Option<UserProfile>,
}

impl MessageView {
    pub fn bare(message: Message) -> Self {
        Self {
            message,
            sender: None,
        }
    }
}

/// Payload relayed through the event bus to every instance, including the
/// one that produced it. Carries the routing data (participant ids) so a
/// receiving instance never has to query the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BroadcastEvent {
    MessageCreated {
        message: MessageView,
        participant_ids: Vec<String>,
    },
    MessageUpdated {
        message: Message,
        participant_ids: Vec<String>,
    },
    MessageDeleted {
        conversation_id: String,
        message_id: String,
        position: i64,
        participant_ids: Vec<String>,
    },
    ConversationCreated {
        conversation: Conversation,
    },
    ParticipantJoined {
        conversation: Conversation,
        user_id: String,
    },
    ParticipantLeft {
        conversation_id: String,
        user_id: String,
    },
}

impl BroadcastEvent {
    /// Bus channel the event is published on.
    pub fn channel(&self) -> &'static str {
        match self {
            BroadcastEvent::MessageCreated { .. }
            | BroadcastEvent::MessageUpdated { .. }
            | BroadcastEvent::MessageDeleted { .. } => MESSAGE_CHANNEL,
            BroadcastEvent::ConversationCreated { .. } => CONVERSATION_CHANNEL,
            BroadcastEvent::ParticipantJoined { .. } | BroadcastEvent::ParticipantLeft { .. } => {
                PARTICIPANT_CHANNEL
            }
        }
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            BroadcastEvent::MessageCreated { message, .. } => &message.message.conversation_id,
            BroadcastEvent::MessageUpdated { message, .. } => &message.conversation_id,
            BroadcastEvent::MessageDeleted {
                conversation_id, ..
            }
            | BroadcastEvent::ParticipantLeft {
                conversation_id, ..
            } => conversation_id,
            BroadcastEvent::ConversationCreated { conversation }
            | BroadcastEvent::ParticipantJoined { conversation, .. } => &conversation.id,
        }
    }

    /// Position of a newly created message; the only events that go through reordering.
    pub fn ordering_position(&self) -> Option<i64> {
        match self {
            BroadcastEvent::MessageCreated { message, .. } => Some(message.message.position),
            _ => None,
        }
    }

    /// Position of the message an edit or delete applies to. These are held
    /// back while the create for that position is still buffered.
    pub fn amended_position(&self) -> Option<i64> {
        match self {
            BroadcastEvent::MessageUpdated { message, .. } => Some(message.position),
            BroadcastEvent::MessageDeleted { position, .. } => Some(*position),
            _ => None,
        }
    }
}

/// Events pushed to a live connection. A `message_updated` or
/// `message_deleted` is held until a buffered `message_created` for the same
/// position has been delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Hello {
        connection_id: String,
        user_id: String,
        instance_id: String,
    },
    Pong,
    Error {
        code: String,
        message: String,
    },
    ChatJoined {
        conversation: Conversation,
        messages: Vec<MessageView>,
    },
    RoomLeft {
        conversation_id: String,
    },
    /// Acknowledgement to the sending connection.
    MessageSent {
        message: Message,
        client_ref: Option<String>,
    },
    MessageCreated {
        message: MessageView,
        participant_ids: Vec<String>,
    },
    MessageUpdated {
        message: Message,
    },
    MessageDeleted {
        conversation_id: String,
        message_id: String,
        position: i64,
    },
    ParticipantJoined {
        conversation: Conversation,
        user_id: String,
    },
    ParticipantLeft {
        conversation_id: String,
        user_id: String,
    },
    ConversationCreated {
        conversation: Conversation,
    },
}

impl ServerEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<BroadcastEvent> for ServerEvent {
    fn from(event: BroadcastEvent) -> Self {
        match event {
            BroadcastEvent::MessageCreated {
                message,
                participant_ids,
            } => ServerEvent::MessageCreated {
                message,
                participant_ids,
            },
            BroadcastEvent::MessageUpdated { message, .. } => ServerEvent::MessageUpdated { message },
            BroadcastEvent::MessageDeleted {
                conversation_id,
                message_id,
                position,
                ..
            } => ServerEvent::MessageDeleted {
                conversation_id,
                message_id,
                position,
            },
            BroadcastEvent::ConversationCreated { conversation } => {
                ServerEvent::ConversationCreated { conversation }
            }
            BroadcastEvent::ParticipantJoined {
                conversation,
                user_id,
            } => ServerEvent::ParticipantJoined {
                conversation,
                user_id,
            },
            BroadcastEvent::ParticipantLeft {
                conversation_id,
                user_id,
            } => ServerEvent::ParticipantLeft {
                conversation_id,
                user_id,
            },
        }
    }
}
