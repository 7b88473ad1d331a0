use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use parley_chats::MetricsSnapshot;
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::GatewayState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub instance_id: String,
    pub bus: String,
    pub sequencer: String,
    pub connections: usize,
    #[schema(value_type = Object)]
    pub metrics: MetricsSnapshot,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service health status and fan-out counters", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    let coordinator = state.coordinator();
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        instance_id: coordinator.instance_id().to_string(),
        bus: coordinator.bus_name().to_string(),
        sequencer: coordinator.sequencer_name().to_string(),
        connections: coordinator.registry().connection_count().await,
        metrics: coordinator.metrics(),
    })
}
