//! Parley Database Crate
//!
//! SQLite persistence for conversations, participant sets, and
//! position-ordered messages: connection management, embedded migrations,
//! and the repositories the fan-out core stores through.

use parley_config::DatabaseConfig;
use sqlx::SqlitePool;

pub mod connection;
pub mod entities;
pub mod migrations;
pub mod repos;
pub mod types;

pub use connection::prepare_database;
pub use migrations::run_migrations;

pub use entities::{
    conversation::{Conversation, ConversationKind, NewConversation},
    message::{Message, MessageKind, NewMessage},
};
pub use repos::{ConversationRepository, Membership, MessageRepository};
pub use types::{errors::DatabaseError, DatabaseResult};

/// Initialize the database with migrations
pub async fn initialize_database(config: &DatabaseConfig) -> DatabaseResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| DatabaseError::ConnectionError(format!("{e:#}")))?;

    run_migrations(&pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("{e:#}")))?;

    Ok(pool)
}
