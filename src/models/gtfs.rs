use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use utoipa::ToSchema;

/// GTFS route_type codes. Values outside the standard range are mapped
/// to `Bus` by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum RouteType {
    Tram = 0,
    Subway = 1,
    Rail = 2,
    Bus = 3,
    Ferry = 4,
    CableTram = 5,
    AerialLift = 6,
    Funicular = 7,
}

impl RouteType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(RouteType::Tram),
            1 => Some(RouteType::Subway),
            2 => Some(RouteType::Rail),
            3 => Some(RouteType::Bus),
            4 => Some(RouteType::Ferry),
            5 => Some(RouteType::CableTram),
            6 => Some(RouteType::AerialLift),
            7 => Some(RouteType::Funicular),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteType::Tram => "tram",
            RouteType::Subway => "subway",
            RouteType::Rail => "rail",
            RouteType::Bus => "bus",
            RouteType::Ferry => "ferry",
            RouteType::CableTram => "cable_tram",
            RouteType::AerialLift => "aerial_lift",
            RouteType::Funicular => "funicular",
        }
    }
}

/// A transit route (routes.txt). `short_name` is the user-facing line
/// number and the lookup key on the public API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Route {
    pub id: String,
    pub short_name: String,
    pub long_name: String,
    #[serde(rename = "type")]
    #[schema(value_type = u8)]
    pub route_type: RouteType,
    pub color: String,
    pub text_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShapePoint {
    pub lat: f64,
    pub lon: f64,
    pub sequence: i32,
}

/// The geographic polyline a trip travels. Points are ordered by
/// `sequence` once the archive is fully parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Shape {
    pub id: String,
    pub points: Vec<ShapePoint>,
    /// Populated on query results; None while the shape sits in the
    /// snapshot. Kept in the serialized form so the cached snapshot
    /// round-trips through bincode.
    pub direction_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Stop {
    pub id: String,
    pub code: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub zone: String,
}

/// A decoded scheduled arrival at a stop, produced on demand from the
/// compact representation.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StopTime {
    pub trip_id: String,
    pub route_id: String,
    /// Used for service-day filtering, not exposed on the API.
    #[serde(skip_serializing)]
    pub service_id: String,
    pub line: String,
    pub headsign: String,
    /// "HH:MM:SS"; the hour may exceed 23 for after-midnight service.
    pub arrival_time: String,
    pub departure_time: String,
    pub stop_sequence: i32,
}

/// Service availability by weekday within an inclusive date range.
/// Dates are kept as "YYYYMMDD" strings and compared lexicographically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Calendar {
    pub service_id: String,
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
    pub start_date: String,
    pub end_date: String,
}

/// A per-date service exception. 1 = service added, 2 = service removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CalendarDate {
    pub service_id: String,
    pub date: String,
    pub exception_type: i32,
}

/// The shape and active time range of one trip, used to filter route
/// shapes by time of day. Minutes are GTFS minutes since midnight and
/// can exceed 1440.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripTimeEntry {
    pub shape_id: String,
    pub service_id: String,
    pub direction_id: i32,
    pub start_minutes: i32,
    pub end_minutes: i32,
}

/// Compact trip metadata, addressed by `u32` index everywhere downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripMeta {
    pub id: String,
    pub route_id: String,
    pub service_id: String,
    pub shape_id: String,
    pub headsign: String,
    pub direction_id: i32,
}

/// Fixed-width stop_times row. Referencing the trip by index instead of
/// repeating trip/route/service strings per row keeps the full schedule
/// resident on small hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopTimeCompact {
    pub trip_index: u32,
    /// Seconds since the service-day midnight; may exceed 86_400.
    pub arrival_seconds: u32,
    pub departure_seconds: u32,
    pub stop_sequence: u16,
}

/// A line serving a stop, with the distinct headsigns seen for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StopLine {
    pub route_id: String,
    pub line: String,
    pub long_name: String,
    #[serde(rename = "type")]
    #[schema(value_type = u8)]
    pub route_type: RouteType,
    pub color: String,
    pub headsigns: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_type_from_code() {
        assert_eq!(RouteType::from_code(0), Some(RouteType::Tram));
        assert_eq!(RouteType::from_code(3), Some(RouteType::Bus));
        assert_eq!(RouteType::from_code(7), Some(RouteType::Funicular));
        assert_eq!(RouteType::from_code(8), None);
        assert_eq!(RouteType::from_code(-1), None);
        assert_eq!(RouteType::from_code(700), None);
    }

    #[test]
    fn route_serializes_type_as_number() {
        let route = Route {
            id: "520".into(),
            short_name: "520".into(),
            long_name: "Marysin - Metro Politechnika".into(),
            route_type: RouteType::Bus,
            color: "".into(),
            text_color: "".into(),
        };
        let json = serde_json::to_value(&route).unwrap();
        assert_eq!(json["type"], 3);
        assert_eq!(json["short_name"], "520");
    }

    #[test]
    fn stop_time_hides_service_id() {
        let st = StopTime {
            trip_id: "t1".into(),
            route_id: "r1".into(),
            service_id: "s1".into(),
            line: "520".into(),
            headsign: "Marysin".into(),
            arrival_time: "25:30:00".into(),
            departure_time: "25:30:00".into(),
            stop_sequence: 4,
        };
        let json = serde_json::to_value(&st).unwrap();
        assert!(json.get("service_id").is_none());
        assert_eq!(json["arrival_time"], "25:30:00");
    }
}
