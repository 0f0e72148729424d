//! Lenient parsing of portal snapshots.
//!
//! The portal serves NGSI-style entities: every attribute is an object
//! with a `value` key, coordinates are GeoJSON `[lon, lat]`. The exact
//! paths this module reads are the external contract with the portal:
//!
//! - car park: `name.value`, `status.value`, `availableSpotNumber.value`,
//!   `totalSpotNumber.value`, `location.value.coordinates`
//! - bike station: `address.value.streetAddress`,
//!   `availableBikeNumber.value`, `freeSlotNumber.value`,
//!   `totalSlotNumber.value`, `location.value.coordinates`
//!
//! Entities with missing or unparsable fields are skipped, never fatal.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::geo::Coords;

/// One line of the raw JSONL archives: a timestamped copy of the entity
/// array exactly as the portal returned it.
#[derive(Debug, Serialize, Deserialize)]
pub struct RawSnapshot {
    pub timestamp: DateTime<Utc>,
    pub entities: Vec<Value>,
}

/// Decodes a portal response body into an entity array.
///
/// # Errors
///
/// Returns an error if the body is not a JSON array; a malformed body is
/// a failed fetch, not a snapshot with zero entities.
pub fn parse_entities(bytes: &[u8]) -> Result<Vec<Value>> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Reads a raw JSONL archive, skipping lines that do not parse.
///
/// A missing file is an empty archive, not an error.
pub fn load_raw_snapshots(path: &Path) -> Result<Vec<RawSnapshot>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut snapshots = Vec::new();
    let mut skipped = 0usize;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawSnapshot>(&line) {
            Ok(snap) => snapshots.push(snap),
            Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(path = %path.display(), skipped, "Skipped unparsable raw snapshot lines");
    }
    Ok(snapshots)
}

/// State of one open car park at one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CarParkState {
    pub name: String,
    pub free: f64,
    pub total: f64,
    pub coords: Option<Coords>,
}

impl CarParkState {
    /// Occupancy rate in `[0, 1]`. `total > 0` is guaranteed by parsing.
    pub fn occupancy(&self) -> f64 {
        (self.total - self.free) / self.total
    }
}

/// State of one bike-share station at one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct BikeStationState {
    pub name: String,
    pub bikes: f64,
    pub free_slots: f64,
    pub total: f64,
    pub coords: Option<Coords>,
}

impl BikeStationState {
    /// Slot-occupancy rate: close to 1 means the station is full of bikes.
    pub fn slot_occupancy(&self) -> f64 {
        (self.total - self.free_slots) / self.total
    }
}

/// Extracts the open car parks from a portal entity array.
pub fn parse_car_parks(entities: &[Value]) -> Vec<CarParkState> {
    let mut parks = Vec::new();
    let mut skipped = 0usize;

    for e in entities {
        if e["status"]["value"].as_str() != Some("Open") {
            continue;
        }

        let name = e["name"]["value"].as_str();
        let free = number(&e["availableSpotNumber"]["value"]);
        let total = number(&e["totalSpotNumber"]["value"]);

        match (name, free, total) {
            (Some(name), Some(free), Some(total)) if total > 0.0 => {
                parks.push(CarParkState {
                    name: name.to_string(),
                    free,
                    total,
                    coords: entity_coords(e),
                });
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        debug!(skipped, "Skipped car park entities with missing fields");
    }
    parks
}

/// Extracts the bike stations from a portal entity array.
pub fn parse_bike_stations(entities: &[Value]) -> Vec<BikeStationState> {
    let mut stations = Vec::new();
    let mut skipped = 0usize;

    for e in entities {
        let name = e["address"]["value"]["streetAddress"].as_str();
        let bikes = number(&e["availableBikeNumber"]["value"]);
        let free_slots = number(&e["freeSlotNumber"]["value"]);
        let total = number(&e["totalSlotNumber"]["value"]);

        match (name, bikes, free_slots, total) {
            (Some(name), Some(bikes), Some(free_slots), Some(total)) if total > 0.0 => {
                stations.push(BikeStationState {
                    name: name.to_string(),
                    bikes,
                    free_slots,
                    total,
                    coords: entity_coords(e),
                });
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        debug!(skipped, "Skipped bike station entities with missing fields");
    }
    stations
}

/// Reads `location.value.coordinates` as GeoJSON `[lon, lat]`.
pub fn entity_coords(entity: &Value) -> Option<Coords> {
    let coords = entity["location"]["value"]["coordinates"].as_array()?;
    if coords.len() < 2 {
        return None;
    }
    let lon = number(&coords[0])?;
    let lat = number(&coords[1])?;
    Some(Coords { lat, lon })
}

/// Some portal deployments serialize counts as strings; accept both.
fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn park(name: &str, status: &str, free: Value, total: Value) -> Value {
        json!({
            "id": format!("urn:park:{name}"),
            "name": {"value": name},
            "status": {"value": status},
            "availableSpotNumber": {"value": free},
            "totalSpotNumber": {"value": total},
            "location": {"value": {"type": "Point", "coordinates": [3.88, 43.61]}}
        })
    }

    #[test]
    fn test_parse_entities_rejects_non_array() {
        assert!(parse_entities(b"{\"not\": \"an array\"}").is_err());
        assert!(parse_entities(b"garbage").is_err());
    }

    #[test]
    fn test_parse_entities_empty_array() {
        assert!(parse_entities(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_open_park_is_parsed() {
        let entities = vec![park("Center", "Open", json!(30), json!(100))];
        let parks = parse_car_parks(&entities);

        assert_eq!(parks.len(), 1);
        assert_eq!(parks[0].name, "Center");
        assert_eq!(parks[0].occupancy(), 0.7);
        let c = parks[0].coords.unwrap();
        assert_eq!((c.lat, c.lon), (43.61, 3.88));
    }

    #[test]
    fn test_closed_park_is_skipped() {
        let entities = vec![park("Center", "Closed", json!(30), json!(100))];
        assert!(parse_car_parks(&entities).is_empty());
    }

    #[test]
    fn test_park_with_missing_or_bad_fields_is_skipped() {
        let entities = vec![
            park("NoTotal", "Open", json!(30), Value::Null),
            park("ZeroTotal", "Open", json!(30), json!(0)),
            park("BadFree", "Open", json!("n/a"), json!(100)),
            json!({"status": {"value": "Open"}}),
        ];
        assert!(parse_car_parks(&entities).is_empty());
    }

    #[test]
    fn test_stringly_typed_counts_are_accepted() {
        let entities = vec![park("Center", "Open", json!("25"), json!("100"))];
        let parks = parse_car_parks(&entities);
        assert_eq!(parks.len(), 1);
        assert_eq!(parks[0].occupancy(), 0.75);
    }

    #[test]
    fn test_bike_station_parse_and_occupancy() {
        let entities = vec![json!({
            "address": {"value": {"streetAddress": "Rue Foch"}},
            "availableBikeNumber": {"value": 8},
            "freeSlotNumber": {"value": 4},
            "totalSlotNumber": {"value": 12},
            "location": {"value": {"coordinates": [3.87, 43.60]}}
        })];
        let stations = parse_bike_stations(&entities);

        assert_eq!(stations.len(), 1);
        let s = &stations[0];
        assert_eq!(s.name, "Rue Foch");
        assert!((s.slot_occupancy() - 8.0 / 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_station_without_name_is_skipped() {
        let entities = vec![json!({
            "availableBikeNumber": {"value": 8},
            "freeSlotNumber": {"value": 4},
            "totalSlotNumber": {"value": 12}
        })];
        assert!(parse_bike_stations(&entities).is_empty());
    }

    #[test]
    fn test_load_raw_snapshots_skips_broken_lines() {
        let path = std::env::temp_dir().join("parkride_test_raw.jsonl");
        let _ = std::fs::remove_file(&path);
        std::fs::write(
            &path,
            "{\"timestamp\":\"2026-01-05T08:00:00Z\",\"entities\":[]}\n\
             not json\n\
             \n\
             {\"timestamp\":\"2026-01-05T09:00:00Z\",\"entities\":[]}\n",
        )
        .unwrap();

        let snaps = load_raw_snapshots(&path).unwrap();
        assert_eq!(snaps.len(), 2);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_raw_snapshots_missing_file_is_empty() {
        let path = std::env::temp_dir().join("parkride_test_no_such.jsonl");
        let _ = std::fs::remove_file(&path);
        assert!(load_raw_snapshots(&path).unwrap().is_empty());
    }
}
