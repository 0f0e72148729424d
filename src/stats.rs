//! Per-snapshot measurement derivation.
//!
//! Turns one portal snapshot into the rows appended to the per-day CSV
//! files, including the city-wide rate and the park-and-ride relay
//! availability check.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::snapshot::{BikeStationState, CarParkState};

/// Thresholds for the relay availability rule.
///
/// A car park counts as an available relay when it still has room for
/// incoming cars and at least one nearby station can both lend a bike
/// and take one back.
#[derive(Debug, Clone)]
pub struct RelayRules {
    /// Maximum park-to-station distance in meters.
    pub radius_m: f64,
    /// Minimum free car spots for the park side to qualify.
    pub min_free_spots: f64,
    /// Minimum bikes available at the station.
    pub min_bikes: f64,
    /// Minimum free docking slots at the station.
    pub min_free_slots: f64,
}

impl Default for RelayRules {
    fn default() -> Self {
        Self {
            radius_m: 300.0,
            min_free_spots: 30.0,
            min_bikes: 5.0,
            min_free_slots: 5.0,
        }
    }
}

/// Capacity-weighted occupancy rate over all open car parks.
///
/// Returns `None` when no park contributes capacity; an empty snapshot
/// produces no `CITY` row.
pub fn city_rate(parks: &[CarParkState]) -> Option<f64> {
    let mut total = 0.0;
    let mut free = 0.0;

    for p in parks {
        total += p.total;
        free += p.free;
    }

    if total <= 0.0 {
        return None;
    }
    Some((total - free) / total)
}

/// Mean slot-occupancy over all stations, `None` when there are none.
pub fn mean_station_rate(stations: &[BikeStationState]) -> Option<f64> {
    if stations.is_empty() {
        return None;
    }
    let sum: f64 = stations.iter().map(|s| s.slot_occupancy()).sum();
    Some(sum / stations.len() as f64)
}

/// Evaluates the relay rule for one car park against all stations.
///
/// A park without coordinates can never match a nearby station and is
/// simply not an available relay.
pub fn relay_ok(park: &CarParkState, stations: &[BikeStationState], rules: &RelayRules) -> bool {
    if park.free < rules.min_free_spots {
        return false;
    }

    let Some(park_coords) = park.coords else {
        return false;
    };

    stations.iter().any(|s| {
        s.coords.is_some_and(|c| park_coords.distance_m(c) <= rules.radius_m)
            && s.bikes >= rules.min_bikes
            && s.free_slots >= rules.min_free_slots
    })
}

/// The `date`/`time` pair stamped on every measurement row.
#[derive(Debug, Clone)]
pub struct RowStamp {
    pub date: String,
    pub time: String,
}

impl RowStamp {
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self {
            date: ts.format("%Y-%m-%d").to_string(),
            time: ts.format("%H:%M:%S").to_string(),
        }
    }
}

/// One row of `day_<n>_cars.csv`. Field order is the column order.
#[derive(Debug, Serialize)]
pub struct CarCsvRow {
    pub date: String,
    pub time: String,
    pub kind: String,
    pub name: String,
    pub free: i64,
    pub total: i64,
    pub occupancy: f64,
}

impl CarCsvRow {
    /// The city-wide aggregate row. Counts are zeroed: the rate is
    /// capacity-weighted and individual counts have no meaning here.
    pub fn city(stamp: &RowStamp, rate: f64) -> Self {
        Self {
            date: stamp.date.clone(),
            time: stamp.time.clone(),
            kind: "CITY".to_string(),
            name: "CITY".to_string(),
            free: 0,
            total: 0,
            occupancy: rate,
        }
    }

    pub fn park(stamp: &RowStamp, park: &CarParkState) -> Self {
        Self {
            date: stamp.date.clone(),
            time: stamp.time.clone(),
            kind: "PARK".to_string(),
            name: park.name.clone(),
            free: park.free as i64,
            total: park.total as i64,
            occupancy: park.occupancy(),
        }
    }
}

/// One row of `day_<n>_bikes.csv`.
#[derive(Debug, Serialize)]
pub struct BikeCsvRow {
    pub date: String,
    pub time: String,
    pub kind: String,
    pub name: String,
    pub bikes: i64,
    pub free_slots: i64,
    pub total: i64,
    pub occupancy: f64,
}

impl BikeCsvRow {
    pub fn station(stamp: &RowStamp, station: &BikeStationState) -> Self {
        Self {
            date: stamp.date.clone(),
            time: stamp.time.clone(),
            kind: "STATION".to_string(),
            name: station.name.clone(),
            bikes: station.bikes as i64,
            free_slots: station.free_slots as i64,
            total: station.total as i64,
            occupancy: station.slot_occupancy(),
        }
    }
}

/// One row of `day_<n>_relays.csv`: `relay_ok` is 0/1 per park and the
/// OK ratio on the per-snapshot `SUMMARY` row.
#[derive(Debug, Serialize)]
pub struct RelayCsvRow {
    pub date: String,
    pub time: String,
    pub car_park: String,
    pub relay_ok: f64,
}

impl RelayCsvRow {
    pub fn park(stamp: &RowStamp, name: &str, ok: bool) -> Self {
        Self {
            date: stamp.date.clone(),
            time: stamp.time.clone(),
            car_park: name.to_string(),
            relay_ok: if ok { 1.0 } else { 0.0 },
        }
    }

    pub fn summary(stamp: &RowStamp, ratio: f64) -> Self {
        Self {
            date: stamp.date.clone(),
            time: stamp.time.clone(),
            car_park: "SUMMARY".to_string(),
            relay_ok: ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coords;

    fn park(name: &str, free: f64, total: f64, coords: Option<Coords>) -> CarParkState {
        CarParkState {
            name: name.to_string(),
            free,
            total,
            coords,
        }
    }

    fn station(bikes: f64, free_slots: f64, coords: Option<Coords>) -> BikeStationState {
        BikeStationState {
            name: "s".to_string(),
            bikes,
            free_slots,
            total: bikes + free_slots,
            coords,
        }
    }

    const HERE: Coords = Coords {
        lat: 43.61,
        lon: 3.88,
    };
    // ~111 km north of HERE, far outside any relay radius.
    const FAR: Coords = Coords {
        lat: 44.61,
        lon: 3.88,
    };

    #[test]
    fn test_city_rate_empty_is_none() {
        assert_eq!(city_rate(&[]), None);
    }

    #[test]
    fn test_city_rate_is_capacity_weighted() {
        let parks = vec![
            park("a", 0.0, 100.0, None),
            park("b", 50.0, 100.0, None),
        ];
        // 150 occupied out of 200.
        assert_eq!(city_rate(&parks), Some(0.75));
    }

    #[test]
    fn test_mean_station_rate() {
        let stations = vec![station(5.0, 5.0, None), station(10.0, 0.0, None)];
        // Rates 0.5 and 1.0.
        assert_eq!(mean_station_rate(&stations), Some(0.75));
        assert_eq!(mean_station_rate(&[]), None);
    }

    #[test]
    fn test_relay_ok_requires_free_spots() {
        let rules = RelayRules::default();
        let p = park("a", 10.0, 100.0, Some(HERE));
        let s = vec![station(10.0, 10.0, Some(HERE))];
        assert!(!relay_ok(&p, &s, &rules));
    }

    #[test]
    fn test_relay_ok_requires_nearby_station() {
        let rules = RelayRules::default();
        let p = park("a", 50.0, 100.0, Some(HERE));
        assert!(relay_ok(&p, &[station(10.0, 10.0, Some(HERE))], &rules));
        assert!(!relay_ok(&p, &[station(10.0, 10.0, Some(FAR))], &rules));
        assert!(!relay_ok(&p, &[station(1.0, 10.0, Some(HERE))], &rules));
        assert!(!relay_ok(&p, &[station(10.0, 1.0, Some(HERE))], &rules));
    }

    #[test]
    fn test_relay_ok_without_coords_is_false() {
        let rules = RelayRules::default();
        let p = park("a", 50.0, 100.0, None);
        assert!(!relay_ok(&p, &[station(10.0, 10.0, Some(HERE))], &rules));
    }

    #[test]
    fn test_city_row_shape() {
        let stamp = RowStamp {
            date: "2026-01-05".to_string(),
            time: "08:00:00".to_string(),
        };
        let row = CarCsvRow::city(&stamp, 0.5);
        assert_eq!(row.kind, "CITY");
        assert_eq!(row.free, 0);
        assert_eq!(row.total, 0);
        assert_eq!(row.occupancy, 0.5);
    }
}
