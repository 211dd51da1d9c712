//! Client for the municipal open-data vehicle positions API. Each fetch
//! returns one typed vehicle list (buses or trams); the ingestor polls
//! both concurrently.

use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::models::{Vehicle, VehicleType};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status code: {0}")]
    Status(reqwest::StatusCode),
    #[error("feed error: {0}")]
    Api(String),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Upstream envelope. `result` is a vehicle array on success; the API
/// signals errors either via `error` or by putting a message string in
/// `result`, which surfaces here as a decode failure.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    result: serde_json::Value,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct ApiVehicle {
    #[serde(rename = "Lines", default)]
    lines: String,
    #[serde(rename = "Lon")]
    lon: f64,
    #[serde(rename = "VehicleNumber", default)]
    vehicle_number: String,
    #[serde(rename = "Time", default)]
    time: String,
    #[serde(rename = "Lat")]
    lat: f64,
    #[serde(rename = "Brigade", default)]
    brigade: String,
}

pub struct FeedClient {
    base_url: String,
    api_key: String,
    resource_id: String,
    timezone: chrono_tz::Tz,
    client: reqwest::Client,
}

impl FeedClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        resource_id: &str,
        timezone: chrono_tz::Tz,
    ) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("fleetmap/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            resource_id: resource_id.to_string(),
            timezone,
            client,
        })
    }

    /// Fetch the current positions for one vehicle type.
    pub async fn fetch(&self, vehicle_type: VehicleType) -> Result<Vec<Vehicle>, FeedError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("resource_id", self.resource_id.as_str()),
                ("apikey", self.api_key.as_str()),
                ("type", &vehicle_type.code().to_string()),
            ])
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FeedError::Status(response.status()));
        }

        let body: ApiResponse = response.json().await?;
        if !body.error.is_empty() {
            return Err(FeedError::Api(body.error));
        }

        let rows: Vec<ApiVehicle> = serde_json::from_value(body.result)?;
        let vehicles = to_vehicles(rows, vehicle_type, self.timezone);
        debug!(
            vehicle_type = vehicle_type.as_str(),
            count = vehicles.len(),
            "fetched vehicle positions"
        );
        Ok(vehicles)
    }
}

/// Map raw feed rows to domain vehicles. Rows without a vehicle number
/// cannot form a stable key and are skipped; unparseable timestamps are
/// replaced with "now".
fn to_vehicles(rows: Vec<ApiVehicle>, vehicle_type: VehicleType, tz: chrono_tz::Tz) -> Vec<Vehicle> {
    let now = Utc::now();
    rows.into_iter()
        .filter(|row| !row.vehicle_number.is_empty())
        .map(|row| {
            let timestamp = NaiveDateTime::parse_from_str(&row.time, "%Y-%m-%d %H:%M:%S")
                .ok()
                .and_then(|naive| naive.and_local_timezone(tz).single())
                .map(|local| local.with_timezone(&Utc))
                .unwrap_or(now);

            Vehicle {
                key: Vehicle::key_for(vehicle_type, &row.vehicle_number),
                vehicle_number: row.vehicle_number,
                vehicle_type,
                line: row.lines,
                brigade: row.brigade,
                lat: row.lat,
                lon: row.lon,
                timestamp,
                tile_id: String::new(),
                updated_at: now,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn row(number: &str, time: &str) -> ApiVehicle {
        ApiVehicle {
            lines: "520".into(),
            lon: 21.01,
            vehicle_number: number.into(),
            time: time.into(),
            lat: 52.23,
            brigade: "3".into(),
        }
    }

    #[test]
    fn rows_without_vehicle_number_are_skipped() {
        let rows = vec![row("1234", "2026-03-10 12:00:00"), row("", "2026-03-10 12:00:00")];
        let vehicles = to_vehicles(rows, VehicleType::Bus, chrono_tz::Europe::Warsaw);
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].key, "1:1234");
        assert_eq!(vehicles[0].vehicle_number, "1234");
    }

    #[test]
    fn timestamps_are_anchored_to_the_feed_timezone() {
        let rows = vec![row("1234", "2026-03-10 12:00:00")];
        let vehicles = to_vehicles(rows, VehicleType::Tram, chrono_tz::Europe::Warsaw);
        // Warsaw is UTC+1 on that date.
        assert_eq!(vehicles[0].timestamp.hour(), 11);
        assert_eq!(vehicles[0].key, "2:1234");
    }

    #[test]
    fn unparseable_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let rows = vec![row("1234", "not a timestamp")];
        let vehicles = to_vehicles(rows, VehicleType::Bus, chrono_tz::Europe::Warsaw);
        assert!(vehicles[0].timestamp >= before);
        assert!(vehicles[0].timestamp <= Utc::now());
    }

    #[test]
    fn response_envelope_decodes() {
        let json = r#"{"result":[{"Lines":"520","Lon":21.01,"VehicleNumber":"1234","Time":"2026-03-10 12:00:00","Lat":52.23,"Brigade":"3"}]}"#;
        let body: ApiResponse = serde_json::from_str(json).unwrap();
        assert!(body.error.is_empty());
        let rows: Vec<ApiVehicle> = serde_json::from_value(body.result).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vehicle_number, "1234");
    }

    #[test]
    fn error_envelope_surfaces_message() {
        let json = r#"{"result":false,"error":"api key expired"}"#;
        let body: ApiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.error, "api key expired");
    }
}
