//! Domain entities for the database layer

pub mod conversation;
pub mod message;

pub use conversation::{Conversation, ConversationKind, NewConversation};
pub use message::{Message, MessageKind, NewMessage};
