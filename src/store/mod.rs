mod schedule;
mod vehicles;

pub use schedule::{ScheduleStats, ScheduleStore};
pub use vehicles::{ListOptions, VehicleStore};
