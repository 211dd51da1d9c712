//! In-memory schedule store. Holds exactly one parsed snapshot behind a
//! reader-writer lock; `update_all` replaces it as a whole so queries
//! never observe a half-updated schedule.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use serde::Serialize;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::models::{Calendar, CalendarDate, Route, Shape, Stop, StopLine, StopTime, StopTimeCompact};
use crate::providers::gtfs::ScheduleSnapshot;

/// Minutes of slack around "now" when deciding which trips are active.
const ACTIVE_WINDOW_MINUTES: i32 = 30;
/// Minutes in a day; GTFS times past this belong to the previous
/// service day.
const MINUTES_PER_DAY: i32 = 1440;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScheduleStats {
    pub routes_count: usize,
    pub shapes_count: usize,
    pub stops_count: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub is_loaded: bool,
}

#[derive(Default)]
struct ScheduleState {
    snapshot: ScheduleSnapshot,
    /// short_name -> route_id, rebuilt on every swap. Last writer wins
    /// on duplicate short names.
    routes_by_line: BTreeMap<String, String>,
    last_update: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct ScheduleStore {
    state: RwLock<ScheduleState>,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the whole schedule.
    pub async fn update_all(&self, snapshot: ScheduleSnapshot) {
        let mut routes_by_line = BTreeMap::new();
        for route in snapshot.routes.values() {
            routes_by_line.insert(route.short_name.clone(), route.id.clone());
        }

        let mut state = self.state.write().await;
        *state = ScheduleState {
            snapshot,
            routes_by_line,
            last_update: Some(Utc::now()),
        };
    }

    pub async fn get_all_routes(&self) -> Vec<Route> {
        let state = self.state.read().await;
        state.snapshot.routes.values().cloned().collect()
    }

    pub async fn get_route_by_id(&self, id: &str) -> Option<Route> {
        self.state.read().await.snapshot.routes.get(id).cloned()
    }

    pub async fn get_route_by_line(&self, line: &str) -> Option<Route> {
        let state = self.state.read().await;
        let route_id = state.routes_by_line.get(line)?;
        state.snapshot.routes.get(route_id).cloned()
    }

    pub async fn get_route_shapes(&self, route_id: &str) -> Vec<Shape> {
        let state = self.state.read().await;
        route_shapes_locked(&state.snapshot, route_id)
    }

    /// Shapes of trips plausibly running around `now_minutes` on `date`.
    /// Yesterday's services are also considered for trips whose times
    /// spill past midnight. Falls back to all route shapes when nothing
    /// matches, so a map never goes blank because of a sparse calendar.
    pub async fn get_active_route_shapes(
        &self,
        route_id: &str,
        date: NaiveDate,
        now_minutes: i32,
    ) -> Vec<Shape> {
        let state = self.state.read().await;
        let snapshot = &state.snapshot;

        let Some(trip_times) = snapshot.route_trip_times.get(route_id) else {
            return route_shapes_locked(snapshot, route_id);
        };

        let active_today = active_services_locked(snapshot, date);
        let yesterday = date
            .checked_sub_days(Days::new(1))
            .map(|d| active_services_locked(snapshot, d))
            .unwrap_or_default();

        let mut active_shape_ids = HashSet::new();
        for tt in trip_times {
            if active_today.contains(&tt.service_id)
                && tt.start_minutes <= now_minutes + ACTIVE_WINDOW_MINUTES
                && tt.end_minutes >= now_minutes - ACTIVE_WINDOW_MINUTES
            {
                active_shape_ids.insert(tt.shape_id.as_str());
            }
            if yesterday.contains(&tt.service_id) && tt.end_minutes > MINUTES_PER_DAY {
                let adjusted = now_minutes + MINUTES_PER_DAY;
                if tt.start_minutes <= adjusted + ACTIVE_WINDOW_MINUTES
                    && tt.end_minutes >= adjusted - ACTIVE_WINDOW_MINUTES
                {
                    active_shape_ids.insert(tt.shape_id.as_str());
                }
            }
        }

        if active_shape_ids.is_empty() {
            return route_shapes_locked(snapshot, route_id);
        }

        let mut shape_ids: Vec<&str> = active_shape_ids.into_iter().collect();
        shape_ids.sort_unstable();
        shape_ids
            .into_iter()
            .filter_map(|shape_id| shape_with_direction(snapshot, shape_id))
            .collect()
    }

    pub async fn get_all_stops(&self) -> Vec<Stop> {
        let state = self.state.read().await;
        state.snapshot.stops.values().cloned().collect()
    }

    pub async fn get_stop_by_id(&self, id: &str) -> Option<Stop> {
        self.state.read().await.snapshot.stops.get(id).cloned()
    }

    pub async fn get_route_stops(&self, route_id: &str) -> Vec<Stop> {
        let state = self.state.read().await;
        state
            .snapshot
            .route_stops
            .get(route_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Full decoded timetable for a stop, in archive order.
    pub async fn get_stop_schedule(&self, stop_id: &str) -> Vec<StopTime> {
        let state = self.state.read().await;
        let snapshot = &state.snapshot;
        let Some(rows) = snapshot.stop_schedules.get(stop_id) else {
            return Vec::new();
        };
        rows.iter()
            .filter_map(|st| decode_stop_time(snapshot, st))
            .collect()
    }

    /// Timetable for a stop restricted to services active on `date`.
    pub async fn get_stop_schedule_for_date(&self, stop_id: &str, date: NaiveDate) -> Vec<StopTime> {
        let state = self.state.read().await;
        let snapshot = &state.snapshot;
        let Some(rows) = snapshot.stop_schedules.get(stop_id) else {
            return Vec::new();
        };

        let active = active_services_locked(snapshot, date);
        rows.iter()
            .filter(|st| {
                snapshot
                    .trips
                    .get(st.trip_index as usize)
                    .is_some_and(|trip| active.contains(&trip.service_id))
            })
            .filter_map(|st| decode_stop_time(snapshot, st))
            .collect()
    }

    pub async fn get_stop_lines(&self, stop_id: &str) -> Vec<StopLine> {
        let state = self.state.read().await;
        state
            .snapshot
            .stop_lines
            .get(stop_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn get_calendars_and_dates(&self) -> (Vec<Calendar>, Vec<CalendarDate>) {
        let state = self.state.read().await;
        let calendars = state.snapshot.calendars.values().cloned().collect();
        let calendar_dates = state
            .snapshot
            .calendar_dates
            .values()
            .flatten()
            .cloned()
            .collect();
        (calendars, calendar_dates)
    }

    pub async fn get_stats(&self) -> ScheduleStats {
        let state = self.state.read().await;
        ScheduleStats {
            routes_count: state.snapshot.routes.len(),
            shapes_count: state.snapshot.shapes.len(),
            stops_count: state.snapshot.stops.len(),
            last_update: state.last_update,
            is_loaded: state.last_update.is_some(),
        }
    }
}

fn route_shapes_locked(snapshot: &ScheduleSnapshot, route_id: &str) -> Vec<Shape> {
    let Some(shape_ids) = snapshot.route_shapes.get(route_id) else {
        return Vec::new();
    };
    shape_ids
        .iter()
        .filter_map(|shape_id| shape_with_direction(snapshot, shape_id))
        .collect()
}

fn shape_with_direction(snapshot: &ScheduleSnapshot, shape_id: &str) -> Option<Shape> {
    let shape = snapshot.shapes.get(shape_id)?;
    let direction = snapshot.shape_directions.get(shape_id).copied().unwrap_or(0);
    Some(Shape {
        id: shape.id.clone(),
        points: shape.points.clone(),
        direction_id: Some(direction),
    })
}

/// Resolve which service_ids run on `date`: calendars matching the
/// weekday within their date range, then calendar_dates exceptions on
/// top. An explicit removal (type 2) always wins.
fn active_services_locked(snapshot: &ScheduleSnapshot, date: NaiveDate) -> HashSet<String> {
    let date_str = date.format("%Y%m%d").to_string();
    let weekday = date.weekday();

    let mut active = HashSet::new();
    for (service_id, cal) in &snapshot.calendars {
        if date_str < cal.start_date || date_str > cal.end_date {
            continue;
        }
        if calendar_runs_on(cal, weekday) {
            active.insert(service_id.clone());
        }
    }

    for (service_id, dates) in &snapshot.calendar_dates {
        for cd in dates {
            if cd.date != date_str {
                continue;
            }
            match cd.exception_type {
                1 => {
                    active.insert(service_id.clone());
                }
                2 => {
                    active.remove(service_id);
                }
                _ => {}
            }
        }
    }

    active
}

fn calendar_runs_on(cal: &Calendar, weekday: Weekday) -> bool {
    match weekday {
        Weekday::Mon => cal.monday,
        Weekday::Tue => cal.tuesday,
        Weekday::Wed => cal.wednesday,
        Weekday::Thu => cal.thursday,
        Weekday::Fri => cal.friday,
        Weekday::Sat => cal.saturday,
        Weekday::Sun => cal.sunday,
    }
}

fn decode_stop_time(snapshot: &ScheduleSnapshot, st: &StopTimeCompact) -> Option<StopTime> {
    // Out-of-bounds indices mean a parser bug or a stale cache; clip and
    // skip rather than panic.
    let trip = snapshot.trips.get(st.trip_index as usize)?;
    let line = snapshot
        .routes
        .get(&trip.route_id)
        .map(|route| route.short_name.clone())
        .unwrap_or_default();

    Some(StopTime {
        trip_id: trip.id.clone(),
        route_id: trip.route_id.clone(),
        service_id: trip.service_id.clone(),
        line,
        headsign: trip.headsign.clone(),
        arrival_time: format_gtfs_time(st.arrival_seconds),
        departure_time: format_gtfs_time(st.departure_seconds),
        stop_sequence: st.stop_sequence as i32,
    })
}

/// Format seconds since service-day midnight as "HH:MM:SS". The hour
/// field exceeds 23 for after-midnight service.
pub fn format_gtfs_time(total_seconds: u32) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}
