use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::error::{bad_request, not_found, ApiError};
use crate::models::{Stop, StopLine, StopTime};
use crate::store::ScheduleStore;

#[derive(Clone)]
pub struct StopsState {
    pub schedule: Arc<ScheduleStore>,
    pub timezone: chrono_tz::Tz,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StopsResponse {
    pub stops: Vec<Stop>,
    pub count: usize,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StopScheduleResponse {
    pub stop_times: Vec<StopTime>,
    pub count: usize,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StopLinesResponse {
    pub lines: Vec<StopLine>,
    pub count: usize,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ScheduleQuery {
    /// Filter to services active on a day: "YYYY-MM-DD", "today" or
    /// "tomorrow". Omit for the full timetable.
    pub date: Option<String>,
}

/// List all stops.
#[utoipa::path(
    get,
    path = "/v1/stops",
    responses((status = 200, description = "All stops", body = StopsResponse)),
    tag = "stops"
)]
pub async fn list_stops(State(state): State<StopsState>) -> Json<StopsResponse> {
    let stops = state.schedule.get_all_stops().await;
    Json(StopsResponse {
        count: stops.len(),
        stops,
        server_time: Utc::now(),
    })
}

/// Fetch one stop by ID.
#[utoipa::path(
    get,
    path = "/v1/stops/{id}",
    params(("id" = String, Path, description = "Stop ID")),
    responses(
        (status = 200, description = "The stop", body = Stop),
        (status = 404, description = "Unknown stop", body = super::ErrorResponse)
    ),
    tag = "stops"
)]
pub async fn get_stop(
    State(state): State<StopsState>,
    Path(id): Path<String>,
) -> Result<Json<Stop>, ApiError> {
    state
        .schedule
        .get_stop_by_id(&id)
        .await
        .map(Json)
        .ok_or_else(|| not_found("stop not found"))
}

/// Timetable for a stop, optionally filtered to one service day.
#[utoipa::path(
    get,
    path = "/v1/stops/{id}/schedule",
    params(("id" = String, Path, description = "Stop ID"), ScheduleQuery),
    responses(
        (status = 200, description = "Stop timetable", body = StopScheduleResponse),
        (status = 400, description = "Invalid date parameter", body = super::ErrorResponse),
        (status = 404, description = "Unknown stop", body = super::ErrorResponse)
    ),
    tag = "stops"
)]
pub async fn get_stop_schedule(
    State(state): State<StopsState>,
    Path(id): Path<String>,
    Query(query): Query<ScheduleQuery>,
) -> Result<Json<StopScheduleResponse>, ApiError> {
    if state.schedule.get_stop_by_id(&id).await.is_none() {
        return Err(not_found("stop not found"));
    }

    let stop_times = match &query.date {
        Some(date_param) => {
            let date = resolve_date(date_param, state.timezone)?;
            state.schedule.get_stop_schedule_for_date(&id, date).await
        }
        None => state.schedule.get_stop_schedule(&id).await,
    };

    Ok(Json(StopScheduleResponse {
        count: stop_times.len(),
        stop_times,
        server_time: Utc::now(),
    }))
}

/// Lines serving a stop, with their headsigns.
#[utoipa::path(
    get,
    path = "/v1/stops/{id}/lines",
    params(("id" = String, Path, description = "Stop ID")),
    responses(
        (status = 200, description = "Lines serving the stop", body = StopLinesResponse),
        (status = 404, description = "Unknown stop", body = super::ErrorResponse)
    ),
    tag = "stops"
)]
pub async fn get_stop_lines(
    State(state): State<StopsState>,
    Path(id): Path<String>,
) -> Result<Json<StopLinesResponse>, ApiError> {
    if state.schedule.get_stop_by_id(&id).await.is_none() {
        return Err(not_found("stop not found"));
    }

    let lines = state.schedule.get_stop_lines(&id).await;
    Ok(Json(StopLinesResponse {
        count: lines.len(),
        lines,
        server_time: Utc::now(),
    }))
}

fn resolve_date(raw: &str, timezone: chrono_tz::Tz) -> Result<NaiveDate, ApiError> {
    let today = Utc::now().with_timezone(&timezone).date_naive();
    match raw {
        "today" => Ok(today),
        "tomorrow" => today
            .checked_add_days(Days::new(1))
            .ok_or_else(|| bad_request("date out of range")),
        _ => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| bad_request("invalid date format, use YYYY-MM-DD, 'today', or 'tomorrow'")),
    }
}

pub fn router(schedule: Arc<ScheduleStore>, timezone: chrono_tz::Tz) -> Router {
    let state = StopsState { schedule, timezone };
    Router::new()
        .route("/", get(list_stops))
        .route("/{id}", get(get_stop))
        .route("/{id}/schedule", get(get_stop_schedule))
        .route("/{id}/lines", get(get_stop_lines))
        .with_state(state)
}
