//! Full-schedule sync endpoints for clients that mirror the timetable
//! locally, plus the schedule stats endpoint.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::error::ErrorResponse;
use crate::models::{Calendar, CalendarDate, Route, Stop};
use crate::store::{ScheduleStats, ScheduleStore};

#[derive(Clone)]
pub struct SyncState {
    pub schedule: Arc<ScheduleStore>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SyncResponse {
    pub routes: Vec<Route>,
    pub stops: Vec<Stop>,
    pub calendars: Vec<Calendar>,
    pub calendar_dates: Vec<CalendarDate>,
    /// Schedule version, the date of the last successful update.
    pub version: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SyncCheckResponse {
    pub version: String,
    pub has_updates: bool,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SyncCheckQuery {
    /// Date of the client's last full sync, "YYYY-MM-DD".
    pub since: Option<String>,
}

fn not_loaded_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::RETRY_AFTER, "30")],
        Json(ErrorResponse {
            error: "schedule data is loading, please retry".to_string(),
        }),
    )
        .into_response()
}

/// Full schedule payload with ETag support keyed on the last update.
#[utoipa::path(
    get,
    path = "/v1/sync",
    responses(
        (status = 200, description = "Full schedule sync payload", body = SyncResponse),
        (status = 304, description = "Client copy is current"),
        (status = 503, description = "Schedule not loaded yet", body = ErrorResponse)
    ),
    tag = "sync"
)]
pub async fn get_sync(State(state): State<SyncState>, headers: HeaderMap) -> Response {
    let stats = state.schedule.get_stats().await;
    let Some(last_update) = stats.last_update else {
        return not_loaded_response();
    };

    let etag = format!("\"{:x}\"", last_update.timestamp());
    if headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        == Some(etag.as_str())
    {
        return StatusCode::NOT_MODIFIED.into_response();
    }

    let (calendars, calendar_dates) = state.schedule.get_calendars_and_dates().await;
    let body = SyncResponse {
        routes: state.schedule.get_all_routes().await,
        stops: state.schedule.get_all_stops().await,
        calendars,
        calendar_dates,
        version: last_update.format("%Y-%m-%d").to_string(),
        generated_at: Utc::now(),
    };

    (
        [
            (header::ETAG, etag),
            (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
        ],
        Json(body),
    )
        .into_response()
}

/// Cheap freshness probe for clients holding a synced schedule.
#[utoipa::path(
    get,
    path = "/v1/sync/check",
    params(SyncCheckQuery),
    responses(
        (status = 200, description = "Whether a newer schedule exists", body = SyncCheckResponse),
        (status = 503, description = "Schedule not loaded yet", body = ErrorResponse)
    ),
    tag = "sync"
)]
pub async fn check_sync(
    State(state): State<SyncState>,
    Query(query): Query<SyncCheckQuery>,
) -> Response {
    let stats = state.schedule.get_stats().await;
    let Some(last_update) = stats.last_update else {
        return not_loaded_response();
    };

    let has_updates = match query
        .since
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    {
        Some(since) => last_update.date_naive() > since,
        None => true,
    };

    Json(SyncCheckResponse {
        version: last_update.format("%Y-%m-%d").to_string(),
        has_updates,
        last_update,
    })
    .into_response()
}

/// Schedule ingestion stats.
#[utoipa::path(
    get,
    path = "/v1/gtfs/stats",
    responses((status = 200, description = "Schedule stats", body = ScheduleStats)),
    tag = "sync"
)]
pub async fn get_schedule_stats(State(state): State<SyncState>) -> Json<ScheduleStats> {
    Json(state.schedule.get_stats().await)
}

pub fn router(schedule: Arc<ScheduleStore>) -> Router {
    let state = SyncState { schedule };
    Router::new()
        .route("/", get(get_sync))
        .route("/check", get(check_sync))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::gtfs::ScheduleSnapshot;

    async fn loaded_state() -> SyncState {
        let schedule = Arc::new(ScheduleStore::new());
        schedule.update_all(ScheduleSnapshot::default()).await;
        SyncState { schedule }
    }

    #[tokio::test]
    async fn sync_returns_503_before_first_load() {
        let state = SyncState {
            schedule: Arc::new(ScheduleStore::new()),
        };
        let response = get_sync(State(state.clone()), HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "30"
        );

        let response = check_sync(State(state), Query(SyncCheckQuery { since: None })).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn sync_sets_etag_and_honors_if_none_match() {
        let state = loaded_state().await;

        let response = get_sync(State(state.clone()), HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let etag = response.headers().get(header::ETAG).unwrap().clone();

        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, etag);
        let response = get_sync(State(state), headers).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn check_sync_compares_against_since() {
        let state = loaded_state().await;

        let response = check_sync(
            State(state.clone()),
            Query(SyncCheckQuery {
                since: Some("2000-01-01".into()),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        // A malformed `since` counts as "no baseline": updates assumed.
        let response = check_sync(
            State(state),
            Query(SyncCheckQuery {
                since: Some("junk".into()),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
