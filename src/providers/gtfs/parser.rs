//! GTFS archive parsing: CSV-in-ZIP into the compact in-memory
//! snapshot, plus the derived indices the query layer serves from.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Read, Seek};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use super::GtfsError;
use crate::models::{
    Calendar, CalendarDate, Route, RouteType, Shape, ShapePoint, Stop, StopLine, StopTimeCompact,
    TripMeta, TripTimeEntry,
};

/// Fully parsed schedule. This is the unit the store swaps atomically
/// and the unit the on-disk parse cache serializes. All maps are
/// ordered so that parsing the same archive twice yields an identical
/// serialization.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub routes: BTreeMap<String, Route>,
    pub shapes: BTreeMap<String, Shape>,
    pub stops: BTreeMap<String, Stop>,
    /// route_id -> shape_ids, first-seen order across trips.
    pub route_shapes: BTreeMap<String, Vec<String>>,
    /// stop_id -> compact stop times in archive file order.
    pub stop_schedules: BTreeMap<String, Vec<StopTimeCompact>>,
    /// stop_id -> lines serving it, sorted by line.
    pub stop_lines: BTreeMap<String, Vec<StopLine>>,
    /// route_id -> stops ordered by minimum observed stop_sequence.
    pub route_stops: BTreeMap<String, Vec<Stop>>,
    /// route_id -> per-trip shape/service/time-range entries.
    pub route_trip_times: BTreeMap<String, Vec<TripTimeEntry>>,
    /// Trip metadata addressed by index from StopTimeCompact.
    pub trips: Vec<TripMeta>,
    pub calendars: BTreeMap<String, Calendar>,
    pub calendar_dates: BTreeMap<String, Vec<CalendarDate>>,
    /// shape_id -> direction_id of the first trip using the shape.
    pub shape_directions: BTreeMap<String, i32>,
}

pub struct ScheduleParser;

impl ScheduleParser {
    /// Parse a GTFS zip archive. Individual malformed rows are skipped
    /// and counted; a missing file leaves its section empty.
    pub fn parse(archive_bytes: &[u8]) -> Result<ScheduleSnapshot, GtfsError> {
        let total_start = Instant::now();
        let mut archive = ZipArchive::new(Cursor::new(archive_bytes))?;
        let mut snapshot = ScheduleSnapshot::default();
        let mut trip_index: HashMap<String, u32> = HashMap::new();

        parse_routes(&mut archive, &mut snapshot)?;
        parse_shapes(&mut archive, &mut snapshot)?;
        parse_stops(&mut archive, &mut snapshot)?;
        parse_trips(&mut archive, &mut snapshot, &mut trip_index)?;
        parse_calendar(&mut archive, &mut snapshot)?;
        parse_calendar_dates(&mut archive, &mut snapshot)?;
        parse_stop_times(&mut archive, &mut snapshot, &trip_index)?;

        // Only needed to resolve stop_times rows; release before the
        // snapshot is retained.
        drop(trip_index);

        let start = Instant::now();
        build_stop_lines(&mut snapshot);
        build_route_stops(&mut snapshot);
        build_trip_time_ranges(&mut snapshot);
        debug!(
            duration_ms = start.elapsed().as_millis() as u64,
            stops_with_lines = snapshot.stop_lines.len(),
            routes_with_stops = snapshot.route_stops.len(),
            routes_with_times = snapshot.route_trip_times.len(),
            "built derived schedule indices"
        );

        info!(
            total_duration_ms = total_start.elapsed().as_millis() as u64,
            routes = snapshot.routes.len(),
            shapes = snapshot.shapes.len(),
            stops = snapshot.stops.len(),
            trips = snapshot.trips.len(),
            "schedule parsing completed"
        );

        Ok(snapshot)
    }
}

/// Parse a GTFS "HH:MM[:SS]" time into seconds since the service-day
/// midnight. Hours past 23 encode after-midnight service; negative
/// components are clamped to zero; anything unparseable contributes 0.
pub fn parse_gtfs_time(time_str: &str) -> i32 {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() < 2 {
        return 0;
    }
    let hours = parts[0].trim().parse::<i32>().unwrap_or(0).max(0);
    let minutes = parts[1].parse::<i32>().unwrap_or(0).max(0);
    let seconds = if parts.len() >= 3 {
        parts[2].parse::<i32>().unwrap_or(0).max(0)
    } else {
        0
    };
    hours * 3600 + minutes * 60 + seconds
}

/// Header-name to column-position lookup for one CSV file.
struct Columns(HashMap<String, usize>);

impl Columns {
    fn new(headers: &csv::StringRecord) -> Self {
        Columns(
            headers
                .iter()
                .enumerate()
                .map(|(i, h)| (h.trim_start_matches('\u{feff}').trim().to_string(), i))
                .collect(),
        )
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, name: &str) -> &'r str {
        self.0
            .get(name)
            .and_then(|&i| record.get(i))
            .unwrap_or("")
    }
}

macro_rules! open_file_or_return {
    ($archive:expr, $name:literal) => {
        match $archive.by_name($name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => {
                info!(file = $name, "file not present in archive");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    };
}

fn parse_routes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    snapshot: &mut ScheduleSnapshot,
) -> Result<(), GtfsError> {
    let start = Instant::now();
    let file = open_file_or_return!(archive, "routes.txt");
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = reader.headers()?.clone();
    let cols = Columns::new(&headers);

    let mut skipped = 0usize;
    for result in reader.records() {
        let Ok(record) = result else {
            skipped += 1;
            continue;
        };
        let route_id = cols.get(&record, "route_id").to_string();
        if route_id.is_empty() {
            skipped += 1;
            continue;
        }

        let route_type = cols
            .get(&record, "route_type")
            .parse::<i64>()
            .ok()
            .and_then(RouteType::from_code)
            .unwrap_or(RouteType::Bus);

        snapshot.routes.insert(
            route_id.clone(),
            Route {
                id: route_id,
                short_name: cols.get(&record, "route_short_name").to_string(),
                long_name: cols.get(&record, "route_long_name").to_string(),
                route_type,
                color: cols.get(&record, "route_color").to_string(),
                text_color: cols.get(&record, "route_text_color").to_string(),
            },
        );
    }

    if skipped > 0 {
        warn!(skipped, "skipped malformed routes.txt rows");
    }
    info!(
        count = snapshot.routes.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "parsed routes.txt"
    );
    Ok(())
}

fn parse_shapes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    snapshot: &mut ScheduleSnapshot,
) -> Result<(), GtfsError> {
    let start = Instant::now();
    let file = open_file_or_return!(archive, "shapes.txt");
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = reader.headers()?.clone();
    let cols = Columns::new(&headers);

    let mut points: HashMap<String, Vec<ShapePoint>> = HashMap::new();
    let mut skipped = 0usize;
    for result in reader.records() {
        let Ok(record) = result else {
            skipped += 1;
            continue;
        };
        let shape_id = cols.get(&record, "shape_id");
        if shape_id.is_empty() {
            skipped += 1;
            continue;
        }

        points.entry(shape_id.to_string()).or_default().push(ShapePoint {
            lat: cols.get(&record, "shape_pt_lat").parse().unwrap_or(0.0),
            lon: cols.get(&record, "shape_pt_lon").parse().unwrap_or(0.0),
            sequence: cols.get(&record, "shape_pt_sequence").parse().unwrap_or(0),
        });
    }

    let mut total_points = 0usize;
    for (shape_id, mut pts) in points {
        pts.sort_by_key(|p| p.sequence);
        total_points += pts.len();
        snapshot.shapes.insert(
            shape_id.clone(),
            Shape {
                id: shape_id,
                points: pts,
                direction_id: None,
            },
        );
    }

    if skipped > 0 {
        warn!(skipped, "skipped malformed shapes.txt rows");
    }
    info!(
        shapes_count = snapshot.shapes.len(),
        total_points,
        duration_ms = start.elapsed().as_millis() as u64,
        "parsed shapes.txt"
    );
    Ok(())
}

fn parse_stops<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    snapshot: &mut ScheduleSnapshot,
) -> Result<(), GtfsError> {
    let start = Instant::now();
    let file = open_file_or_return!(archive, "stops.txt");
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = reader.headers()?.clone();
    let cols = Columns::new(&headers);

    let mut skipped = 0usize;
    for result in reader.records() {
        let Ok(record) = result else {
            skipped += 1;
            continue;
        };
        let stop_id = cols.get(&record, "stop_id").to_string();
        if stop_id.is_empty() {
            skipped += 1;
            continue;
        }

        snapshot.stops.insert(
            stop_id.clone(),
            Stop {
                id: stop_id,
                code: cols.get(&record, "stop_code").to_string(),
                name: cols.get(&record, "stop_name").to_string(),
                lat: cols.get(&record, "stop_lat").parse().unwrap_or(0.0),
                lon: cols.get(&record, "stop_lon").parse().unwrap_or(0.0),
                zone: cols.get(&record, "zone_id").to_string(),
            },
        );
    }

    if skipped > 0 {
        warn!(skipped, "skipped malformed stops.txt rows");
    }
    info!(
        count = snapshot.stops.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "parsed stops.txt"
    );
    Ok(())
}

fn parse_trips<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    snapshot: &mut ScheduleSnapshot,
    trip_index: &mut HashMap<String, u32>,
) -> Result<(), GtfsError> {
    let start = Instant::now();
    let file = open_file_or_return!(archive, "trips.txt");
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = reader.headers()?.clone();
    let cols = Columns::new(&headers);

    let mut seen_route_shapes: HashMap<String, HashSet<String>> = HashMap::new();
    let mut skipped = 0usize;
    for result in reader.records() {
        let Ok(record) = result else {
            skipped += 1;
            continue;
        };

        let trip_id = cols.get(&record, "trip_id");
        let route_id = cols.get(&record, "route_id");
        let service_id = cols.get(&record, "service_id");
        let shape_id = cols.get(&record, "shape_id");
        let headsign = cols.get(&record, "trip_headsign");
        let direction_id = cols.get(&record, "direction_id").parse::<i32>().unwrap_or(0);

        if !trip_id.is_empty() && !route_id.is_empty() && !trip_index.contains_key(trip_id) {
            let index = snapshot.trips.len() as u32;
            trip_index.insert(trip_id.to_string(), index);
            snapshot.trips.push(TripMeta {
                id: trip_id.to_string(),
                route_id: route_id.to_string(),
                service_id: service_id.to_string(),
                shape_id: shape_id.to_string(),
                headsign: headsign.to_string(),
                direction_id,
            });
        }

        if route_id.is_empty() || shape_id.is_empty() {
            continue;
        }

        snapshot
            .shape_directions
            .entry(shape_id.to_string())
            .or_insert(direction_id);

        if seen_route_shapes
            .entry(route_id.to_string())
            .or_default()
            .insert(shape_id.to_string())
        {
            snapshot
                .route_shapes
                .entry(route_id.to_string())
                .or_default()
                .push(shape_id.to_string());
        }
    }

    if skipped > 0 {
        warn!(skipped, "skipped malformed trips.txt rows");
    }
    info!(
        trips_count = snapshot.trips.len(),
        route_shapes_count = snapshot.route_shapes.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "parsed trips.txt"
    );
    Ok(())
}

fn parse_calendar<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    snapshot: &mut ScheduleSnapshot,
) -> Result<(), GtfsError> {
    let start = Instant::now();
    let file = open_file_or_return!(archive, "calendar.txt");
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = reader.headers()?.clone();
    let cols = Columns::new(&headers);

    let mut skipped = 0usize;
    for result in reader.records() {
        let Ok(record) = result else {
            skipped += 1;
            continue;
        };
        let service_id = cols.get(&record, "service_id").to_string();
        if service_id.is_empty() {
            skipped += 1;
            continue;
        }

        snapshot.calendars.insert(
            service_id.clone(),
            Calendar {
                service_id,
                monday: cols.get(&record, "monday") == "1",
                tuesday: cols.get(&record, "tuesday") == "1",
                wednesday: cols.get(&record, "wednesday") == "1",
                thursday: cols.get(&record, "thursday") == "1",
                friday: cols.get(&record, "friday") == "1",
                saturday: cols.get(&record, "saturday") == "1",
                sunday: cols.get(&record, "sunday") == "1",
                start_date: cols.get(&record, "start_date").to_string(),
                end_date: cols.get(&record, "end_date").to_string(),
            },
        );
    }

    if skipped > 0 {
        warn!(skipped, "skipped malformed calendar.txt rows");
    }
    info!(
        services_count = snapshot.calendars.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "parsed calendar.txt"
    );
    Ok(())
}

fn parse_calendar_dates<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    snapshot: &mut ScheduleSnapshot,
) -> Result<(), GtfsError> {
    let start = Instant::now();
    let file = open_file_or_return!(archive, "calendar_dates.txt");
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = reader.headers()?.clone();
    let cols = Columns::new(&headers);

    let mut skipped = 0usize;
    let mut total = 0usize;
    for result in reader.records() {
        let Ok(record) = result else {
            skipped += 1;
            continue;
        };
        let service_id = cols.get(&record, "service_id").to_string();
        if service_id.is_empty() {
            skipped += 1;
            continue;
        }

        let exception_type = cols
            .get(&record, "exception_type")
            .parse::<i32>()
            .unwrap_or(0);

        snapshot
            .calendar_dates
            .entry(service_id.clone())
            .or_default()
            .push(CalendarDate {
                service_id,
                date: cols.get(&record, "date").to_string(),
                exception_type,
            });
        total += 1;
    }

    if skipped > 0 {
        warn!(skipped, "skipped malformed calendar_dates.txt rows");
    }
    info!(
        services_with_exceptions = snapshot.calendar_dates.len(),
        total_exceptions = total,
        duration_ms = start.elapsed().as_millis() as u64,
        "parsed calendar_dates.txt"
    );
    Ok(())
}

fn parse_stop_times<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    snapshot: &mut ScheduleSnapshot,
    trip_index: &HashMap<String, u32>,
) -> Result<(), GtfsError> {
    let start = Instant::now();
    let file = open_file_or_return!(archive, "stop_times.txt");
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = reader.headers()?.clone();
    let cols = Columns::new(&headers);

    let mut rows = 0u64;
    let mut accepted = 0u64;
    for result in reader.records() {
        let Ok(record) = result else {
            continue;
        };
        rows += 1;

        let Some(&index) = trip_index.get(cols.get(&record, "trip_id")) else {
            continue;
        };
        let stop_id = cols.get(&record, "stop_id");
        if stop_id.is_empty() {
            continue;
        }

        let arrival_seconds = parse_gtfs_time(cols.get(&record, "arrival_time")) as u32;
        let departure_seconds = parse_gtfs_time(cols.get(&record, "departure_time")) as u32;
        let stop_sequence = cols
            .get(&record, "stop_sequence")
            .parse::<i64>()
            .unwrap_or(0)
            .clamp(0, u16::MAX as i64) as u16;

        snapshot
            .stop_schedules
            .entry(stop_id.to_string())
            .or_default()
            .push(StopTimeCompact {
                trip_index: index,
                arrival_seconds,
                departure_seconds,
                stop_sequence,
            });
        accepted += 1;

        if rows % 1_000_000 == 0 {
            debug!(
                rows_read = rows,
                rows_accepted = accepted,
                unique_stops = snapshot.stop_schedules.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "stop_times.txt progress"
            );
        }
    }

    info!(
        rows_read = rows,
        rows_accepted = accepted,
        stops_with_schedules = snapshot.stop_schedules.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "parsed stop_times.txt"
    );
    Ok(())
}

fn build_stop_lines(snapshot: &mut ScheduleSnapshot) {
    let mut stop_lines = BTreeMap::new();

    for (stop_id, rows) in &snapshot.stop_schedules {
        let mut by_route: HashMap<String, StopLine> = HashMap::new();
        let mut seen_headsigns: HashMap<String, HashSet<String>> = HashMap::new();

        for st in rows {
            let Some(trip) = snapshot.trips.get(st.trip_index as usize) else {
                continue;
            };
            let route_id = &trip.route_id;

            if !by_route.contains_key(route_id) {
                let Some(route) = snapshot.routes.get(route_id) else {
                    continue;
                };
                by_route.insert(
                    route_id.clone(),
                    StopLine {
                        route_id: route_id.clone(),
                        line: route.short_name.clone(),
                        long_name: route.long_name.clone(),
                        route_type: route.route_type,
                        color: route.color.clone(),
                        headsigns: Vec::new(),
                    },
                );
                seen_headsigns.insert(route_id.clone(), HashSet::new());
            }

            if !trip.headsign.is_empty()
                && seen_headsigns
                    .get_mut(route_id)
                    .is_some_and(|seen| seen.insert(trip.headsign.clone()))
            {
                if let Some(line) = by_route.get_mut(route_id) {
                    line.headsigns.push(trip.headsign.clone());
                }
            }
        }

        let mut lines: Vec<StopLine> = by_route.into_values().collect();
        lines.sort_by(|a, b| a.line.cmp(&b.line).then_with(|| a.route_id.cmp(&b.route_id)));
        stop_lines.insert(stop_id.clone(), lines);
    }

    snapshot.stop_lines = stop_lines;
}

fn build_route_stops(snapshot: &mut ScheduleSnapshot) {
    // route_id -> stop_id -> lowest stop_sequence observed on any trip.
    let mut min_sequences: HashMap<String, HashMap<String, u16>> = HashMap::new();

    for (stop_id, rows) in &snapshot.stop_schedules {
        for st in rows {
            let Some(trip) = snapshot.trips.get(st.trip_index as usize) else {
                continue;
            };
            if trip.route_id.is_empty() {
                continue;
            }
            min_sequences
                .entry(trip.route_id.clone())
                .or_default()
                .entry(stop_id.clone())
                .and_modify(|seq| *seq = (*seq).min(st.stop_sequence))
                .or_insert(st.stop_sequence);
        }
    }

    let mut route_stops = BTreeMap::new();
    for (route_id, stop_seqs) in min_sequences {
        let mut entries: Vec<(String, u16)> = stop_seqs.into_iter().collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let stops: Vec<Stop> = entries
            .into_iter()
            .filter_map(|(stop_id, _)| snapshot.stops.get(&stop_id).cloned())
            .collect();
        route_stops.insert(route_id, stops);
    }

    snapshot.route_stops = route_stops;
}

fn build_trip_time_ranges(snapshot: &mut ScheduleSnapshot) {
    let trip_count = snapshot.trips.len();
    if trip_count == 0 {
        return;
    }

    let mut min_minutes = vec![0i32; trip_count];
    let mut max_minutes = vec![0i32; trip_count];
    let mut seen = vec![false; trip_count];

    for rows in snapshot.stop_schedules.values() {
        for st in rows {
            let index = st.trip_index as usize;
            if index >= trip_count {
                continue;
            }
            let dep = (st.departure_seconds / 60) as i32;
            let arr = (st.arrival_seconds / 60) as i32;
            if seen[index] {
                min_minutes[index] = min_minutes[index].min(dep);
                max_minutes[index] = max_minutes[index].max(arr);
            } else {
                seen[index] = true;
                min_minutes[index] = dep;
                max_minutes[index] = arr;
            }
        }
    }

    let mut route_trip_times: BTreeMap<String, Vec<TripTimeEntry>> = BTreeMap::new();
    for (index, trip) in snapshot.trips.iter().enumerate() {
        if trip.shape_id.is_empty() || !seen[index] {
            continue;
        }
        route_trip_times
            .entry(trip.route_id.clone())
            .or_default()
            .push(TripTimeEntry {
                shape_id: trip.shape_id.clone(),
                service_id: trip.service_id.clone(),
                direction_id: trip.direction_id,
                start_minutes: min_minutes[index],
                end_minutes: max_minutes[index],
            });
    }

    snapshot.route_trip_times = route_trip_times;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_archive(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn sample_archive() -> Vec<u8> {
        build_archive(&[
            (
                "routes.txt",
                "route_id,route_short_name,route_long_name,route_type,route_color,route_text_color\n\
                 R1,520,Marysin - Metro Politechnika,3,E31E24,FFFFFF\n\
                 R2,17,Tarchomin - Sluzewiec,0,007734,FFFFFF\n\
                 ,999,No id,3,,\n",
            ),
            (
                "shapes.txt",
                "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
                 SH1,52.25,21.03,2\n\
                 SH1,52.23,21.01,1\n\
                 SH2,52.26,21.04,1\n",
            ),
            (
                "stops.txt",
                "stop_id,stop_code,stop_name,stop_lat,stop_lon,zone_id\n\
                 ST1,1001,Centrum,52.23,21.01,1\n\
                 ST2,1002,Marysin,52.25,21.03,1\n",
            ),
            (
                "trips.txt",
                "route_id,service_id,trip_id,trip_headsign,direction_id,shape_id\n\
                 R1,S1,T1,Marysin,0,SH1\n\
                 R1,S2,T2,Zajezdnia,1,SH2\n\
                 R1,S1,T3,Marysin,0,SH1\n",
            ),
            (
                "calendar.txt",
                "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
                 S1,1,1,1,1,1,0,0,20260101,20261231\n\
                 S2,1,1,1,1,1,1,1,20260101,20261231\n",
            ),
            (
                "calendar_dates.txt",
                "service_id,date,exception_type\n\
                 S1,20260106,2\n\
                 S3,20260106,1\n",
            ),
            (
                "stop_times.txt",
                "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
                 T1,07:00:00,07:00:00,ST1,1\n\
                 T1,08:00:00,08:00:00,ST2,2\n\
                 T2,23:30:00,23:30:00,ST1,1\n\
                 T2,25:30:00,25:30:00,ST2,2\n\
                 GHOST,09:00:00,09:00:00,ST1,1\n",
            ),
        ])
    }

    #[test]
    fn parse_gtfs_time_handles_overflow_and_defaults() {
        assert_eq!(parse_gtfs_time("25:30:00"), 91_800);
        assert_eq!(parse_gtfs_time("08:30:00"), 30_600);
        assert_eq!(parse_gtfs_time("08:30"), 30_600);
        assert_eq!(parse_gtfs_time("24:00:00"), 86_400);
        assert_eq!(parse_gtfs_time("00:00:01"), 1);
        assert_eq!(parse_gtfs_time("-01:30:00"), 1_800);
        assert_eq!(parse_gtfs_time(""), 0);
        assert_eq!(parse_gtfs_time("invalid"), 0);
    }

    #[test]
    fn parse_builds_all_sections() {
        let snapshot = ScheduleParser::parse(&sample_archive()).unwrap();

        assert_eq!(snapshot.routes.len(), 2);
        assert_eq!(snapshot.routes["R1"].short_name, "520");
        assert_eq!(snapshot.routes["R2"].route_type, RouteType::Tram);

        // Shape points are ordered by sequence regardless of file order.
        let sh1 = &snapshot.shapes["SH1"];
        assert_eq!(sh1.points[0].sequence, 1);
        assert_eq!(sh1.points[1].sequence, 2);

        assert_eq!(snapshot.stops.len(), 2);
        assert_eq!(snapshot.trips.len(), 3);
        assert_eq!(snapshot.route_shapes["R1"], vec!["SH1", "SH2"]);
        assert_eq!(snapshot.shape_directions["SH1"], 0);
        assert_eq!(snapshot.shape_directions["SH2"], 1);

        assert_eq!(snapshot.calendars.len(), 2);
        assert!(snapshot.calendars["S1"].monday);
        assert!(!snapshot.calendars["S1"].saturday);
        assert_eq!(snapshot.calendar_dates["S1"][0].exception_type, 2);

        // The GHOST row references an unknown trip and is dropped.
        assert_eq!(snapshot.stop_schedules["ST1"].len(), 2);
        let st1 = &snapshot.stop_schedules["ST1"];
        assert_eq!(st1[0].trip_index, 0);
        assert_eq!(st1[1].trip_index, 1);
        assert_eq!(st1[1].arrival_seconds, 84_600);
        assert_eq!(snapshot.stop_schedules["ST2"][1].arrival_seconds, 91_800);
    }

    #[test]
    fn parse_builds_derived_indices() {
        let snapshot = ScheduleParser::parse(&sample_archive()).unwrap();

        let lines = &snapshot.stop_lines["ST1"];
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line, "520");
        assert_eq!(lines[0].headsigns, vec!["Marysin", "Zajezdnia"]);

        let stops = &snapshot.route_stops["R1"];
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0].id, "ST1");
        assert_eq!(stops[1].id, "ST2");

        let times = &snapshot.route_trip_times["R1"];
        assert_eq!(times.len(), 2);
        assert_eq!(times[0].shape_id, "SH1");
        assert_eq!(times[0].start_minutes, 420);
        assert_eq!(times[0].end_minutes, 480);
        assert_eq!(times[1].shape_id, "SH2");
        assert_eq!(times[1].start_minutes, 1410);
        assert_eq!(times[1].end_minutes, 1530);
    }

    #[test]
    fn parse_is_deterministic() {
        let archive = sample_archive();
        let first = ScheduleParser::parse(&archive).unwrap();
        let second = ScheduleParser::parse(&archive).unwrap();
        assert_eq!(first, second);

        let config = bincode::config::standard();
        let first_bytes = bincode::serde::encode_to_vec(&first, config).unwrap();
        let second_bytes = bincode::serde::encode_to_vec(&second, config).unwrap();
        assert_eq!(first_bytes, second_bytes);
    }

    #[test]
    fn parse_tolerates_missing_optional_files() {
        let archive = build_archive(&[(
            "routes.txt",
            "route_id,route_short_name,route_long_name,route_type\nR1,520,Long,3\n",
        )]);
        let snapshot = ScheduleParser::parse(&archive).unwrap();
        assert_eq!(snapshot.routes.len(), 1);
        assert!(snapshot.stops.is_empty());
        assert!(snapshot.trips.is_empty());
        assert!(snapshot.stop_schedules.is_empty());
    }

    #[test]
    fn parse_defaults_route_type_to_bus() {
        let archive = build_archive(&[(
            "routes.txt",
            "route_id,route_short_name,route_long_name,route_type\nR1,520,Long,abc\nR2,17,Other,900\n",
        )]);
        let snapshot = ScheduleParser::parse(&archive).unwrap();
        assert_eq!(snapshot.routes["R1"].route_type, RouteType::Bus);
        assert_eq!(snapshot.routes["R2"].route_type, RouteType::Bus);
    }

    #[test]
    fn parse_clamps_stop_sequence() {
        let archive = build_archive(&[
            (
                "routes.txt",
                "route_id,route_short_name,route_long_name,route_type\nR1,520,Long,3\n",
            ),
            (
                "trips.txt",
                "route_id,service_id,trip_id,trip_headsign,direction_id,shape_id\nR1,S1,T1,H,0,\n",
            ),
            (
                "stop_times.txt",
                "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
                 T1,07:00:00,07:00:00,ST1,-5\n\
                 T1,07:10:00,07:10:00,ST2,100000\n",
            ),
        ]);
        let snapshot = ScheduleParser::parse(&archive).unwrap();
        assert_eq!(snapshot.stop_schedules["ST1"][0].stop_sequence, 0);
        assert_eq!(snapshot.stop_schedules["ST2"][0].stop_sequence, u16::MAX);
    }

    #[test]
    fn parse_rejects_garbage_bytes() {
        assert!(ScheduleParser::parse(b"definitely not a zip").is_err());
    }
}
