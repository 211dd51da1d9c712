use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use utoipa::ToSchema;

/// Distinguishes buses from trams. Serialized as the upstream feed's
/// numeric code (1 = bus, 2 = tram).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum VehicleType {
    Bus = 1,
    Tram = 2,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Bus => "bus",
            VehicleType::Tram => "tram",
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(VehicleType::Bus),
            2 => Some(VehicleType::Tram),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// A single tracked bus or tram position.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    /// Stable identity: "{type}:{vehicleNumber}"
    pub key: String,
    pub vehicle_number: String,
    #[serde(rename = "type")]
    #[schema(value_type = u8)]
    pub vehicle_type: VehicleType,
    pub line: String,
    pub brigade: String,
    pub lat: f64,
    pub lon: f64,
    /// Position timestamp as reported by the upstream feed.
    pub timestamp: DateTime<Utc>,
    /// Slippy tile the vehicle currently falls into ("Z/X/Y").
    pub tile_id: String,
    /// When this record was last observed by the ingestor.
    pub updated_at: DateTime<Utc>,
}

impl Vehicle {
    pub fn key_for(vehicle_type: VehicleType, vehicle_number: &str) -> String {
        format!("{}:{}", vehicle_type.code(), vehicle_number)
    }
}

/// A change in vehicle state, tagged with its tile for fanout routing.
#[derive(Debug, Clone)]
pub enum VehicleDelta {
    Update { tile_id: String, vehicle: Vehicle },
    Remove { tile_id: String, key: String },
}

impl VehicleDelta {
    pub fn tile_id(&self) -> &str {
        match self {
            VehicleDelta::Update { tile_id, .. } => tile_id,
            VehicleDelta::Remove { tile_id, .. } => tile_id,
        }
    }
}

/// A geographic rectangle with inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_type_codes() {
        assert_eq!(VehicleType::Bus.code(), 1);
        assert_eq!(VehicleType::Tram.code(), 2);
        assert_eq!(VehicleType::from_code(1), Some(VehicleType::Bus));
        assert_eq!(VehicleType::from_code(2), Some(VehicleType::Tram));
        assert_eq!(VehicleType::from_code(0), None);
        assert_eq!(VehicleType::from_code(3), None);
    }

    #[test]
    fn vehicle_key_format() {
        assert_eq!(Vehicle::key_for(VehicleType::Bus, "1234"), "1:1234");
        assert_eq!(Vehicle::key_for(VehicleType::Tram, "42"), "2:42");
    }

    #[test]
    fn vehicle_serializes_with_camel_case_and_numeric_type() {
        let v = Vehicle {
            key: "1:1234".into(),
            vehicle_number: "1234".into(),
            vehicle_type: VehicleType::Bus,
            line: "520".into(),
            brigade: "3".into(),
            lat: 52.23,
            lon: 21.01,
            timestamp: Utc::now(),
            tile_id: "14/9148/5394".into(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["type"], 1);
        assert_eq!(json["vehicleNumber"], "1234");
        assert_eq!(json["tileId"], "14/9148/5394");
        assert!(json.get("updatedAt").is_some());
    }

    #[test]
    fn bounding_box_contains_is_inclusive() {
        let bbox = BoundingBox {
            min_lat: 52.0,
            min_lon: 20.0,
            max_lat: 53.0,
            max_lon: 22.0,
        };
        assert!(bbox.contains(52.5, 21.0));
        assert!(bbox.contains(52.0, 20.0));
        assert!(bbox.contains(53.0, 22.0));
        assert!(!bbox.contains(51.999, 21.0));
        assert!(!bbox.contains(52.5, 22.001));
    }
}
