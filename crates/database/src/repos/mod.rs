//! Database repository implementations

pub mod conversation_repository;
pub mod message_repository;

pub use conversation_repository::*;
pub use message_repository::*;
