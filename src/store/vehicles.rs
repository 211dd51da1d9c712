//! Thread-safe store of live vehicle positions with secondary indices
//! by tile, line, and vehicle type. Mutations emit deltas describing
//! exactly what changed, which the hub fans out to subscribers.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use crate::models::{BoundingBox, Vehicle, VehicleDelta, VehicleType};

/// Position change smaller than this is treated as noise.
const POSITION_EPSILON: f64 = 1e-6;

#[derive(Debug, Default, Clone)]
pub struct ListOptions {
    pub vehicle_type: Option<VehicleType>,
    pub line: Option<String>,
    pub bbox: Option<BoundingBox>,
}

#[derive(Default)]
struct Indexed {
    vehicles: HashMap<String, Vehicle>,
    by_tile: HashMap<String, HashSet<String>>,
    by_line: HashMap<String, HashSet<String>>,
    by_type: HashMap<VehicleType, HashSet<String>>,
}

pub struct VehicleStore {
    inner: RwLock<Indexed>,
    stale_after: Duration,
}

impl VehicleStore {
    pub fn new(stale_after: std::time::Duration) -> Self {
        Self {
            inner: RwLock::new(Indexed::default()),
            stale_after: Duration::from_std(stale_after).unwrap_or(Duration::minutes(5)),
        }
    }

    /// Apply a polled batch. Each vehicle is inserted or, when any
    /// observable field changed, replaced; unchanged re-observations
    /// only refresh `updated_at`. Deltas are returned in input order.
    pub async fn update(&self, vehicles: Vec<Vehicle>) -> Vec<VehicleDelta> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut deltas = Vec::with_capacity(vehicles.len());

        for mut v in vehicles {
            v.updated_at = now;

            let changed = match inner.vehicles.get_mut(&v.key) {
                Some(existing) if !has_changed(existing, &v) => {
                    existing.updated_at = now;
                    false
                }
                _ => true,
            };
            if !changed {
                continue;
            }

            // A changed line or tile must not leave the old entry behind
            // in any secondary index.
            if let Some(old) = inner.vehicles.remove(&v.key) {
                inner.remove_from_indices(&old);
            }
            inner.add_to_indices(&v);
            deltas.push(VehicleDelta::Update {
                tile_id: v.tile_id.clone(),
                vehicle: v.clone(),
            });
            inner.vehicles.insert(v.key.clone(), v);
        }

        deltas
    }

    /// Evict vehicles not observed within the staleness window and
    /// return the corresponding remove deltas.
    pub async fn prune_stale(&self) -> Vec<VehicleDelta> {
        let mut inner = self.inner.write().await;
        let cutoff = Utc::now() - self.stale_after;

        let stale: Vec<String> = inner
            .vehicles
            .values()
            .filter(|v| v.updated_at < cutoff)
            .map(|v| v.key.clone())
            .collect();

        let mut deltas = Vec::with_capacity(stale.len());
        for key in stale {
            if let Some(v) = inner.vehicles.remove(&key) {
                inner.remove_from_indices(&v);
                deltas.push(VehicleDelta::Remove {
                    tile_id: v.tile_id,
                    key,
                });
            }
        }
        deltas
    }

    pub async fn get(&self, key: &str) -> Option<Vehicle> {
        self.inner.read().await.vehicles.get(key).cloned()
    }

    pub async fn list(&self, opts: &ListOptions) -> Vec<Vehicle> {
        let inner = self.inner.read().await;
        let candidates = inner.candidates(opts);

        let mut result = Vec::with_capacity(candidates.len());
        for key in candidates {
            let Some(v) = inner.vehicles.get(&key) else {
                continue;
            };
            if let Some(bbox) = &opts.bbox {
                if !bbox.contains(v.lat, v.lon) {
                    continue;
                }
            }
            result.push(v.clone());
        }
        result
    }

    pub async fn snapshot(&self) -> Vec<Vehicle> {
        self.inner.read().await.vehicles.values().cloned().collect()
    }

    /// All vehicles in the given tiles, deduplicated.
    pub async fn snapshot_for_tiles(&self, tile_ids: &[String]) -> Vec<Vehicle> {
        let inner = self.inner.read().await;
        let mut seen = HashSet::new();
        let mut result = Vec::new();

        for tile_id in tile_ids {
            let Some(keys) = inner.by_tile.get(tile_id) else {
                continue;
            };
            for key in keys {
                if seen.insert(key.clone()) {
                    if let Some(v) = inner.vehicles.get(key) {
                        result.push(v.clone());
                    }
                }
            }
        }
        result
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.vehicles.len()
    }

    pub async fn count_by_type(&self) -> HashMap<VehicleType, usize> {
        let inner = self.inner.read().await;
        inner
            .by_type
            .iter()
            .map(|(t, keys)| (*t, keys.len()))
            .collect()
    }

    #[cfg(test)]
    async fn assert_index_consistency(&self) {
        let inner = self.inner.read().await;
        for v in inner.vehicles.values() {
            assert!(inner.by_tile[&v.tile_id].contains(&v.key));
            assert!(inner.by_line[&v.line].contains(&v.key));
            assert!(inner.by_type[&v.vehicle_type].contains(&v.key));
        }
        let total: usize = inner.by_tile.values().map(|s| s.len()).sum();
        assert_eq!(total, inner.vehicles.len());
        for (name, index) in [("tile", &inner.by_tile), ("line", &inner.by_line)] {
            for (bucket, keys) in index {
                assert!(!keys.is_empty(), "empty {name} bucket {bucket}");
                for key in keys {
                    assert!(inner.vehicles.contains_key(key));
                }
            }
        }
        for keys in inner.by_type.values() {
            assert!(!keys.is_empty());
        }
    }
}

impl Indexed {
    fn add_to_indices(&mut self, v: &Vehicle) {
        self.by_tile
            .entry(v.tile_id.clone())
            .or_default()
            .insert(v.key.clone());
        self.by_line
            .entry(v.line.clone())
            .or_default()
            .insert(v.key.clone());
        self.by_type
            .entry(v.vehicle_type)
            .or_default()
            .insert(v.key.clone());
    }

    fn remove_from_indices(&mut self, v: &Vehicle) {
        if let Some(keys) = self.by_tile.get_mut(&v.tile_id) {
            keys.remove(&v.key);
            if keys.is_empty() {
                self.by_tile.remove(&v.tile_id);
            }
        }
        if let Some(keys) = self.by_line.get_mut(&v.line) {
            keys.remove(&v.key);
            if keys.is_empty() {
                self.by_line.remove(&v.line);
            }
        }
        if let Some(keys) = self.by_type.get_mut(&v.vehicle_type) {
            keys.remove(&v.key);
            if keys.is_empty() {
                self.by_type.remove(&v.vehicle_type);
            }
        }
    }

    fn candidates(&self, opts: &ListOptions) -> HashSet<String> {
        let by_type = opts.vehicle_type.map(|t| self.by_type.get(&t));
        let by_line = opts
            .line
            .as_ref()
            .filter(|l| !l.is_empty())
            .map(|l| self.by_line.get(l));

        match (by_type, by_line) {
            (Some(a), Some(b)) => intersect(a.unwrap_or(&HashSet::new()), b.unwrap_or(&HashSet::new())),
            (Some(a), None) => a.cloned().unwrap_or_default(),
            (None, Some(b)) => b.cloned().unwrap_or_default(),
            (None, None) => self.vehicles.keys().cloned().collect(),
        }
    }
}

/// Intersection probing from the smaller set.
fn intersect(a: &HashSet<String>, b: &HashSet<String>) -> HashSet<String> {
    let (smaller, larger) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    smaller
        .iter()
        .filter(|key| larger.contains(*key))
        .cloned()
        .collect()
}

fn has_changed(old: &Vehicle, new: &Vehicle) -> bool {
    old.line != new.line
        || old.brigade != new.brigade
        || (old.lat - new.lat).abs() > POSITION_EPSILON
        || (old.lon - new.lon).abs() > POSITION_EPSILON
        || old.timestamp != new.timestamp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::tile;
    use chrono::{DateTime, TimeZone};

    fn vehicle(key: &str, line: &str, lat: f64, lon: f64, ts: DateTime<Utc>) -> Vehicle {
        let (code, number) = key.split_once(':').unwrap();
        let vehicle_type = VehicleType::from_code(code.parse().unwrap()).unwrap();
        Vehicle {
            key: key.to_string(),
            vehicle_number: number.to_string(),
            vehicle_type,
            line: line.to_string(),
            brigade: "1".to_string(),
            lat,
            lon,
            timestamp: ts,
            tile_id: tile::tile_id(lat, lon, 14),
            updated_at: ts,
        }
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn first_insert_emits_update_delta() {
        let store = VehicleStore::new(std::time::Duration::from_secs(300));
        let deltas = store
            .update(vec![vehicle("1:42", "520", 52.23, 21.01, ts())])
            .await;

        assert_eq!(deltas.len(), 1);
        match &deltas[0] {
            VehicleDelta::Update { tile_id, vehicle } => {
                assert_eq!(tile_id, "14/9148/5394");
                assert_eq!(vehicle.key, "1:42");
            }
            other => panic!("expected update delta, got {other:?}"),
        }
        assert_eq!(store.count().await, 1);
        store.assert_index_consistency().await;
    }

    #[tokio::test]
    async fn unchanged_reobservation_is_a_no_op() {
        let store = VehicleStore::new(std::time::Duration::from_secs(300));
        let v = vehicle("1:42", "520", 52.23, 21.01, ts());

        let first = store.update(vec![v.clone()]).await;
        assert_eq!(first.len(), 1);
        let before = store.get("1:42").await.unwrap().updated_at;

        let second = store.update(vec![v]).await;
        assert!(second.is_empty());
        let after = store.get("1:42").await.unwrap().updated_at;
        assert!(after >= before);
        store.assert_index_consistency().await;
    }

    #[tokio::test]
    async fn tile_change_migrates_indices() {
        let store = VehicleStore::new(std::time::Duration::from_secs(300));
        store
            .update(vec![vehicle("1:42", "520", 52.23, 21.01, ts())])
            .await;

        let deltas = store
            .update(vec![vehicle("1:42", "520", 52.30, 21.10, ts())])
            .await;
        assert_eq!(deltas.len(), 1);

        let old_tile = vec!["14/9148/5394".to_string()];
        let new_tile = vec!["14/9152/5389".to_string()];
        assert!(store.snapshot_for_tiles(&old_tile).await.is_empty());
        let in_new = store.snapshot_for_tiles(&new_tile).await;
        assert_eq!(in_new.len(), 1);
        assert_eq!(in_new[0].key, "1:42");
        store.assert_index_consistency().await;
    }

    #[tokio::test]
    async fn line_change_migrates_line_index() {
        let store = VehicleStore::new(std::time::Duration::from_secs(300));
        store
            .update(vec![vehicle("1:42", "520", 52.23, 21.01, ts())])
            .await;
        store
            .update(vec![vehicle("1:42", "N91", 52.23, 21.01, ts())])
            .await;

        let old_line = store
            .list(&ListOptions {
                line: Some("520".into()),
                ..Default::default()
            })
            .await;
        assert!(old_line.is_empty());

        let new_line = store
            .list(&ListOptions {
                line: Some("N91".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(new_line.len(), 1);
        store.assert_index_consistency().await;
    }

    #[tokio::test]
    async fn prune_stale_evicts_and_emits_remove() {
        let store = VehicleStore::new(std::time::Duration::from_millis(10));
        store
            .update(vec![vehicle("1:42", "520", 52.23, 21.01, ts())])
            .await;

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let deltas = store.prune_stale().await;

        assert_eq!(deltas.len(), 1);
        match &deltas[0] {
            VehicleDelta::Remove { tile_id, key } => {
                assert_eq!(tile_id, "14/9148/5394");
                assert_eq!(key, "1:42");
            }
            other => panic!("expected remove delta, got {other:?}"),
        }
        assert_eq!(store.count().await, 0);
        store.assert_index_consistency().await;
    }

    #[tokio::test]
    async fn fresh_vehicles_survive_prune() {
        let store = VehicleStore::new(std::time::Duration::from_secs(300));
        store
            .update(vec![vehicle("1:42", "520", 52.23, 21.01, ts())])
            .await;
        assert!(store.prune_stale().await.is_empty());
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn list_filters_by_type_line_and_bbox() {
        let store = VehicleStore::new(std::time::Duration::from_secs(300));
        store
            .update(vec![
                vehicle("1:1", "520", 52.23, 21.01, ts()),
                vehicle("1:2", "190", 52.25, 21.03, ts()),
                vehicle("2:3", "17", 52.28, 20.98, ts()),
            ])
            .await;

        let buses = store
            .list(&ListOptions {
                vehicle_type: Some(VehicleType::Bus),
                ..Default::default()
            })
            .await;
        assert_eq!(buses.len(), 2);

        let line_and_type = store
            .list(&ListOptions {
                vehicle_type: Some(VehicleType::Bus),
                line: Some("190".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(line_and_type.len(), 1);
        assert_eq!(line_and_type[0].key, "1:2");

        let boxed = store
            .list(&ListOptions {
                bbox: Some(BoundingBox {
                    min_lat: 52.22,
                    min_lon: 21.00,
                    max_lat: 52.26,
                    max_lon: 21.05,
                }),
                ..Default::default()
            })
            .await;
        assert_eq!(boxed.len(), 2);

        let mismatched = store
            .list(&ListOptions {
                vehicle_type: Some(VehicleType::Tram),
                line: Some("520".into()),
                ..Default::default()
            })
            .await;
        assert!(mismatched.is_empty());
    }

    #[tokio::test]
    async fn timestamp_change_alone_emits_delta() {
        let store = VehicleStore::new(std::time::Duration::from_secs(300));
        store
            .update(vec![vehicle("1:42", "520", 52.23, 21.01, ts())])
            .await;

        let later = ts() + Duration::seconds(10);
        let deltas = store
            .update(vec![vehicle("1:42", "520", 52.23, 21.01, later)])
            .await;
        assert_eq!(deltas.len(), 1);
    }

    #[tokio::test]
    async fn sub_epsilon_position_drift_is_ignored() {
        let store = VehicleStore::new(std::time::Duration::from_secs(300));
        store
            .update(vec![vehicle("1:42", "520", 52.23, 21.01, ts())])
            .await;
        let deltas = store
            .update(vec![vehicle("1:42", "520", 52.23 + 5e-7, 21.01, ts())])
            .await;
        assert!(deltas.is_empty());
    }

    #[tokio::test]
    async fn count_by_type_follows_index() {
        let store = VehicleStore::new(std::time::Duration::from_secs(300));
        store
            .update(vec![
                vehicle("1:1", "520", 52.23, 21.01, ts()),
                vehicle("2:2", "17", 52.25, 21.03, ts()),
                vehicle("2:3", "33", 52.26, 21.04, ts()),
            ])
            .await;
        let counts = store.count_by_type().await;
        assert_eq!(counts.get(&VehicleType::Bus), Some(&1));
        assert_eq!(counts.get(&VehicleType::Tram), Some(&2));
    }

    #[tokio::test]
    async fn snapshot_for_tiles_deduplicates() {
        let store = VehicleStore::new(std::time::Duration::from_secs(300));
        store
            .update(vec![vehicle("1:42", "520", 52.23, 21.01, ts())])
            .await;
        let tiles = vec!["14/9148/5394".to_string(), "14/9148/5394".to_string()];
        assert_eq!(store.snapshot_for_tiles(&tiles).await.len(), 1);
    }
}
