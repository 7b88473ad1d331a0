//! REST API endpoints for the gateway

pub mod conversation;
pub mod health;
pub mod message;

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::state::GatewayState;

/// Create all REST API routes
pub fn create_rest_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/health", get(health::health_check))
        .merge(conversation::create_conversation_routes())
        .merge(message::create_message_routes())
}

pub use conversation::*;
pub use health::*;
pub use message::*;
