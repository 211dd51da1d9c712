use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::error::{not_found, ApiError};
use crate::models::{Route, Shape, Stop};
use crate::store::ScheduleStore;

#[derive(Clone)]
pub struct RoutesState {
    pub schedule: Arc<ScheduleStore>,
    pub timezone: chrono_tz::Tz,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoutesResponse {
    pub routes: Vec<Route>,
    pub count: usize,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ShapesResponse {
    pub shapes: Vec<Shape>,
    pub count: usize,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteStopsResponse {
    pub stops: Vec<Stop>,
    pub count: usize,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ShapeQuery {
    /// Filter shapes to trips active around this time: "HH:MM" or "now".
    pub time: Option<String>,
}

/// List all known routes.
#[utoipa::path(
    get,
    path = "/v1/routes",
    responses((status = 200, description = "All routes", body = RoutesResponse)),
    tag = "routes"
)]
pub async fn list_routes(State(state): State<RoutesState>) -> Json<RoutesResponse> {
    let routes = state.schedule.get_all_routes().await;
    Json(RoutesResponse {
        count: routes.len(),
        routes,
        server_time: Utc::now(),
    })
}

/// Look up a route by its line number.
#[utoipa::path(
    get,
    path = "/v1/routes/{line}",
    params(("line" = String, Path, description = "Line number, e.g. 520")),
    responses(
        (status = 200, description = "The route", body = Route),
        (status = 404, description = "Unknown line", body = super::ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn get_route(
    State(state): State<RoutesState>,
    Path(line): Path<String>,
) -> Result<Json<Route>, ApiError> {
    state
        .schedule
        .get_route_by_line(&line)
        .await
        .map(Json)
        .ok_or_else(|| not_found("route not found"))
}

/// Shapes of a route, optionally filtered to trips active around a
/// given time of day.
#[utoipa::path(
    get,
    path = "/v1/routes/{line}/shape",
    params(("line" = String, Path, description = "Line number"), ShapeQuery),
    responses(
        (status = 200, description = "Route shapes", body = ShapesResponse),
        (status = 404, description = "Unknown line", body = super::ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn get_route_shape(
    State(state): State<RoutesState>,
    Path(line): Path<String>,
    Query(query): Query<ShapeQuery>,
) -> Result<Json<ShapesResponse>, ApiError> {
    let route = state
        .schedule
        .get_route_by_line(&line)
        .await
        .ok_or_else(|| not_found("route not found"))?;

    let shapes = match &query.time {
        Some(time_param) => {
            let local_now = Utc::now().with_timezone(&state.timezone);
            let minutes = parse_time_to_minutes(time_param, &local_now);
            state
                .schedule
                .get_active_route_shapes(&route.id, local_now.date_naive(), minutes)
                .await
        }
        None => state.schedule.get_route_shapes(&route.id).await,
    };

    Ok(Json(ShapesResponse {
        count: shapes.len(),
        shapes,
        server_time: Utc::now(),
    }))
}

/// Stops served by a route, in travel order.
#[utoipa::path(
    get,
    path = "/v1/routes/{line}/stops",
    params(("line" = String, Path, description = "Line number")),
    responses(
        (status = 200, description = "Route stops", body = RouteStopsResponse),
        (status = 404, description = "Unknown line", body = super::ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn get_route_stops(
    State(state): State<RoutesState>,
    Path(line): Path<String>,
) -> Result<Json<RouteStopsResponse>, ApiError> {
    let route = state
        .schedule
        .get_route_by_line(&line)
        .await
        .ok_or_else(|| not_found("route not found"))?;

    let stops = state.schedule.get_route_stops(&route.id).await;
    Ok(Json(RouteStopsResponse {
        count: stops.len(),
        stops,
        server_time: Utc::now(),
    }))
}

/// Parse "HH:MM" or "now" into minutes since midnight in the feed's
/// timezone. Malformed values resolve to 0 rather than an error.
fn parse_time_to_minutes(raw: &str, local_now: &DateTime<chrono_tz::Tz>) -> i32 {
    if raw == "now" {
        return (local_now.hour() * 60 + local_now.minute()) as i32;
    }
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() < 2 {
        return 0;
    }
    let hours = parts[0].parse::<i32>().unwrap_or(0);
    let minutes = parts[1].parse::<i32>().unwrap_or(0);
    hours * 60 + minutes
}

pub fn router(schedule: Arc<ScheduleStore>, timezone: chrono_tz::Tz) -> Router {
    let state = RoutesState { schedule, timezone };
    Router::new()
        .route("/", get(list_routes))
        .route("/{line}", get(get_route))
        .route("/{line}/shape", get(get_route_shape))
        .route("/{line}/stops", get(get_route_stops))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_time_to_minutes_formats() {
        let local_now = chrono_tz::Europe::Warsaw
            .with_ymd_and_hms(2026, 3, 10, 7, 10, 0)
            .unwrap();
        assert_eq!(parse_time_to_minutes("now", &local_now), 430);
        assert_eq!(parse_time_to_minutes("08:30", &local_now), 510);
        assert_eq!(parse_time_to_minutes("00:05", &local_now), 5);
        assert_eq!(parse_time_to_minutes("garbage", &local_now), 0);
        assert_eq!(parse_time_to_minutes("", &local_now), 0);
    }
}
