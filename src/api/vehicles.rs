use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::error::{bad_request, not_found, ApiError};
use crate::models::{BoundingBox, Vehicle, VehicleType};
use crate::store::{ListOptions, VehicleStore};

#[derive(Clone)]
pub struct VehiclesState {
    pub store: Arc<VehicleStore>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListVehiclesQuery {
    /// Vehicle type filter: 1 = bus, 2 = tram.
    #[serde(rename = "type")]
    pub vehicle_type: Option<String>,
    /// Line filter, e.g. "520".
    pub line: Option<String>,
    /// Bounding box filter: "minLat,minLon,maxLat,maxLon".
    pub bbox: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VehiclesResponse {
    pub vehicles: Vec<Vehicle>,
    pub count: usize,
    pub server_time: DateTime<Utc>,
}

/// List tracked vehicles with optional type/line/bbox filters.
#[utoipa::path(
    get,
    path = "/v1/vehicles",
    params(ListVehiclesQuery),
    responses(
        (status = 200, description = "Currently tracked vehicles", body = VehiclesResponse),
        (status = 400, description = "Invalid filter parameter", body = super::ErrorResponse)
    ),
    tag = "vehicles"
)]
pub async fn list_vehicles(
    State(state): State<VehiclesState>,
    Query(query): Query<ListVehiclesQuery>,
) -> Result<Json<VehiclesResponse>, ApiError> {
    let mut opts = ListOptions::default();

    if let Some(type_param) = &query.vehicle_type {
        let vehicle_type = type_param
            .parse::<u8>()
            .ok()
            .and_then(VehicleType::from_code)
            .ok_or_else(|| bad_request("invalid type parameter: must be 1 (bus) or 2 (tram)"))?;
        opts.vehicle_type = Some(vehicle_type);
    }

    opts.line = query.line.clone().filter(|l| !l.is_empty());

    if let Some(bbox_param) = &query.bbox {
        opts.bbox = Some(parse_bbox(bbox_param)?);
    }

    let vehicles = state.store.list(&opts).await;
    Ok(Json(VehiclesResponse {
        count: vehicles.len(),
        vehicles,
        server_time: Utc::now(),
    }))
}

/// Fetch a single vehicle by its key ("{type}:{vehicleNumber}").
#[utoipa::path(
    get,
    path = "/v1/vehicles/{key}",
    params(("key" = String, Path, description = "Vehicle key, e.g. 1:1234")),
    responses(
        (status = 200, description = "The vehicle", body = Vehicle),
        (status = 404, description = "Unknown vehicle key", body = super::ErrorResponse)
    ),
    tag = "vehicles"
)]
pub async fn get_vehicle(
    State(state): State<VehiclesState>,
    Path(key): Path<String>,
) -> Result<Json<Vehicle>, ApiError> {
    state
        .store
        .get(&key)
        .await
        .map(Json)
        .ok_or_else(|| not_found("vehicle not found"))
}

fn parse_bbox(raw: &str) -> Result<BoundingBox, ApiError> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 4 {
        return Err(bad_request(
            "invalid bbox format: expected minLat,minLon,maxLat,maxLon",
        ));
    }
    let mut values = [0f64; 4];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|e| bad_request(format!("invalid bbox values: {e}")))?;
    }
    Ok(BoundingBox {
        min_lat: values[0],
        min_lon: values[1],
        max_lat: values[2],
        max_lon: values[3],
    })
}

pub fn router(store: Arc<VehicleStore>) -> Router {
    let state = VehiclesState { store };
    Router::new()
        .route("/", get(list_vehicles))
        .route("/{key}", get(get_vehicle))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bbox_accepts_four_floats() {
        let bbox = parse_bbox("52.20,20.95,52.26,21.05").unwrap();
        assert_eq!(bbox.min_lat, 52.20);
        assert_eq!(bbox.min_lon, 20.95);
        assert_eq!(bbox.max_lat, 52.26);
        assert_eq!(bbox.max_lon, 21.05);
    }

    #[test]
    fn parse_bbox_rejects_wrong_arity_and_garbage() {
        assert!(parse_bbox("52.20,20.95,52.26").is_err());
        assert!(parse_bbox("a,b,c,d").is_err());
        assert!(parse_bbox("").is_err());
    }

    #[tokio::test]
    async fn list_and_get_round_trip() {
        let store = Arc::new(VehicleStore::new(std::time::Duration::from_secs(300)));
        store
            .update(vec![Vehicle {
                key: "1:42".into(),
                vehicle_number: "42".into(),
                vehicle_type: VehicleType::Bus,
                line: "520".into(),
                brigade: "1".into(),
                lat: 52.23,
                lon: 21.01,
                timestamp: Utc::now(),
                tile_id: "14/9148/5394".into(),
                updated_at: Utc::now(),
            }])
            .await;
        let state = VehiclesState { store };

        let response = list_vehicles(
            State(state.clone()),
            Query(ListVehiclesQuery {
                vehicle_type: Some("1".into()),
                line: None,
                bbox: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.0.count, 1);

        let vehicle = get_vehicle(State(state.clone()), Path("1:42".into()))
            .await
            .unwrap();
        assert_eq!(vehicle.0.line, "520");

        let missing = get_vehicle(State(state.clone()), Path("2:7".into())).await;
        assert!(missing.is_err());

        let invalid = list_vehicles(
            State(state),
            Query(ListVehiclesQuery {
                vehicle_type: Some("9".into()),
                line: None,
                bbox: None,
            }),
        )
        .await;
        assert!(invalid.is_err());
    }
}
