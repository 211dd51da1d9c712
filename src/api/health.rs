//! Liveness/readiness probes and the combined service stats endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::ingest::VehicleIngestor;
use crate::models::VehicleType;
use crate::store::{ScheduleStats, ScheduleStore, VehicleStore};

#[derive(Clone)]
pub struct HealthState {
    pub ingestor: Arc<VehicleIngestor>,
    pub vehicle_store: Arc<VehicleStore>,
    pub schedule_store: Arc<ScheduleStore>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub ready: bool,
    pub vehicle_count: usize,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VehicleStats {
    pub total: usize,
    pub by_type: HashMap<String, usize>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub vehicles: VehicleStats,
    pub gtfs: ScheduleStats,
    pub server_time: DateTime<Utc>,
}

/// Process liveness.
#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Process is alive")),
    tag = "health"
)]
pub async fn healthz() -> &'static str {
    "ok"
}

/// Readiness: 200 once the vehicle feed has been fetched successfully.
#[utoipa::path(
    get,
    path = "/readyz",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "First feed poll has not succeeded yet", body = ReadyResponse)
    ),
    tag = "health"
)]
pub async fn readyz(State(state): State<HealthState>) -> Response {
    let ready = state.ingestor.is_ready();
    let body = ReadyResponse {
        ready,
        vehicle_count: state.vehicle_store.count().await,
        server_time: Utc::now(),
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// Combined live-fleet and schedule statistics.
#[utoipa::path(
    get,
    path = "/stats",
    responses((status = 200, description = "Service statistics", body = StatsResponse)),
    tag = "health"
)]
pub async fn stats(State(state): State<HealthState>) -> Json<StatsResponse> {
    let by_type = state
        .vehicle_store
        .count_by_type()
        .await
        .into_iter()
        .map(|(t, count)| (t.as_str().to_string(), count))
        .collect::<HashMap<String, usize>>();

    let by_type = ensure_both_types(by_type);

    Json(StatsResponse {
        vehicles: VehicleStats {
            total: state.vehicle_store.count().await,
            by_type,
        },
        gtfs: state.schedule_store.get_stats().await,
        server_time: Utc::now(),
    })
}

/// Absent index buckets read as zero, so the payload shape is stable.
fn ensure_both_types(mut by_type: HashMap<String, usize>) -> HashMap<String, usize> {
    for t in [VehicleType::Bus, VehicleType::Tram] {
        by_type.entry(t.as_str().to_string()).or_insert(0);
    }
    by_type
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/stats", get(stats))
        .with_state(state)
}
