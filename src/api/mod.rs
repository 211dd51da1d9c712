pub mod error;
pub mod health;
pub mod routes;
pub mod stops;
pub mod sync;
pub mod vehicles;
pub mod ws;

pub use error::ErrorResponse;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::ingest::VehicleIngestor;
use crate::store::{ScheduleStore, VehicleStore};

pub fn router(
    vehicle_store: Arc<VehicleStore>,
    schedule_store: Arc<ScheduleStore>,
    hub: Arc<crate::hub::Hub>,
    vehicle_ingestor: Arc<VehicleIngestor>,
    timezone: chrono_tz::Tz,
) -> Router {
    let ws_state = ws::WsState {
        hub,
        store: vehicle_store.clone(),
    };
    let health_state = health::HealthState {
        ingestor: vehicle_ingestor,
        vehicle_store: vehicle_store.clone(),
        schedule_store: schedule_store.clone(),
    };
    let sync_state = sync::SyncState {
        schedule: schedule_store.clone(),
    };

    Router::new()
        .nest("/v1/vehicles", vehicles::router(vehicle_store))
        .nest("/v1/routes", routes::router(schedule_store.clone(), timezone))
        .nest("/v1/stops", stops::router(schedule_store.clone(), timezone))
        .nest("/v1/sync", sync::router(schedule_store))
        .route(
            "/v1/gtfs/stats",
            get(sync::get_schedule_stats).with_state(sync_state),
        )
        .route("/v1/ws", get(ws::ws_vehicles).with_state(ws_state))
        .merge(health::router(health_state))
}
