//! # Parley Gateway Crate
//!
//! HTTP REST and WebSocket surface over the fan-out coordinator.
//!
//! ## Architecture
//!
//! - **REST**: conversation and message endpoints with OpenAPI documentation
//! - **WebSocket**: one session per live connection, registered with the coordinator
//! - **State**: the coordinator plus per-connection queue settings
//! - **Middleware**: CORS, tracing spans and request logging
//!
//! ## Usage
//!
//! ```rust,ignore
//! use parley_gateway::{create_router, GatewayState};
//!
//! let state = GatewayState::new(coordinator, config.fanout.outbound_buffer);
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:7070").await?;
//! axum::serve(listener, app).await?;
//! ```

pub mod error;
pub mod middleware;
pub mod rest;
pub mod state;
pub mod websocket;

pub use error::{ErrorResponse, GatewayError, GatewayResult};
pub use state::GatewayState;
pub use websocket::ClientEvent;

use std::sync::Arc;

use axum::{middleware as axum_middleware, Router};

/// Create the main application router with all routes
pub fn create_router(state: GatewayState) -> Router {
    let state = Arc::new(state);
    #[allow(unused_mut)]
    let mut router = Router::new()
        .merge(rest::create_rest_routes().with_state(state.clone()))
        .merge(websocket::create_websocket_routes().with_state(state))
        .layer(middleware::create_cors_middleware())
        .layer(middleware::create_trace_middleware())
        .layer(axum_middleware::from_fn(middleware::logging_middleware));

    // Add Swagger UI if in debug mode
    #[cfg(debug_assertions)]
    {
        use utoipa::OpenApi;
        use utoipa_swagger_ui::SwaggerUi;

        #[derive(OpenApi)]
        #[openapi(
            paths(
                rest::health::health_check,
                rest::conversation::create_conversation,
                rest::conversation::list_conversations,
                rest::conversation::get_conversation,
                rest::conversation::join_conversation,
                rest::message::send_message,
                rest::message::list_messages,
                rest::message::recent_messages,
                rest::message::update_message,
                rest::message::delete_message,
            ),
            components(
                schemas(
                    rest::health::HealthResponse,
                    rest::conversation::ConversationResponse,
                    rest::conversation::CreateConversationRequest,
                    rest::conversation::JoinConversationRequest,
                    rest::message::MessageResponse,
                    rest::message::SendMessageRequest,
                    rest::message::UpdateMessageRequest,
                    error::ErrorResponse,
                )
            ),
            tags(
                (name = "Health", description = "Liveness and fan-out counters"),
                (name = "Conversations", description = "Conversation membership"),
                (name = "Messages", description = "Ordered message history"),
            )
        )]
        struct ApiDoc;

        router = router
            .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));
    }

    router
}
