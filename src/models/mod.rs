mod gtfs;
mod vehicle;

pub use gtfs::{
    Calendar, CalendarDate, Route, RouteType, Shape, ShapePoint, Stop, StopLine, StopTime,
    StopTimeCompact, TripMeta, TripTimeEntry,
};
pub use vehicle::{BoundingBox, Vehicle, VehicleDelta, VehicleType};
