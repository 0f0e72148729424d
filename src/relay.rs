//! Relevant-relay selection.
//!
//! A "relevant relay" is a car park / bike station pair that plausibly
//! works as a park-and-ride handoff: the two are within walking
//! distance and their occupancy series move in opposite directions
//! (cars accumulate while bikes leave, or the reverse). Pairs are
//! ranked distance first.

use serde::Serialize;

use crate::analyzers::correlation::{Series, align};
use crate::analyzers::utility::pearson;
use crate::geo::Coords;

/// Selection thresholds, echoed verbatim into the artifact.
#[derive(Debug, Clone)]
pub struct RelayCriteria {
    /// Maximum park-to-station distance in meters.
    pub max_distance_m: f64,
    /// Minimum exact common timestamps for a trustworthy coefficient.
    pub min_points: usize,
    /// Number of pairs kept in the artifact.
    pub top_n: usize,
    /// Correlation ceiling: a pair qualifies only at or below this
    /// (i.e. at least this negatively coupled).
    pub max_corr: f64,
}

impl Default for RelayCriteria {
    fn default() -> Self {
        Self {
            max_distance_m: 800.0,
            min_points: 12,
            top_n: 30,
            max_corr: -0.20,
        }
    }
}

/// One side of a candidate pair: an entity with coordinates, its series
/// artifact path, and its occupancy series.
#[derive(Debug, Clone)]
pub struct RelayEndpoint {
    pub name: String,
    pub coords: Coords,
    pub series_path: String,
    pub points: Series,
}

/// A qualifying pair in `relevant_relays.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RelayPair {
    pub car_park: String,
    pub station: String,
    pub distance_m: f64,
    pub correlation: f64,
    pub n_points: usize,
    pub car_park_series: String,
    pub station_series: String,
    pub car_park_lat: f64,
    pub car_park_lon: f64,
    pub station_lat: f64,
    pub station_lon: f64,
}

/// The `relevant_relays.json` artifact.
#[derive(Debug, Serialize)]
pub struct RelaySelection {
    pub max_distance_m: f64,
    pub min_points: usize,
    pub top_n: usize,
    pub only_negative: bool,
    pub min_relay_corr: f64,
    pub sort: String,
    pub count_total: usize,
    pub items: Vec<RelayPair>,
}

/// Scores every park × station pair and keeps the qualifying top N.
pub fn select_relays(
    parks: &[RelayEndpoint],
    stations: &[RelayEndpoint],
    criteria: &RelayCriteria,
) -> RelaySelection {
    let mut candidates = Vec::new();

    for park in parks {
        for station in stations {
            let distance = park.coords.distance_m(station.coords);
            if distance > criteria.max_distance_m {
                continue;
            }

            let aligned = align(&park.points, &station.points);
            if aligned.len() < criteria.min_points {
                continue;
            }

            let x: Vec<f64> = aligned.iter().map(|(_, a, _)| *a).collect();
            let y: Vec<f64> = aligned.iter().map(|(_, _, b)| *b).collect();
            let Some(r) = pearson(&x, &y) else { continue };

            // Relay coupling is inverse by definition; near-zero
            // coefficients are noise, not a relay.
            if r > criteria.max_corr {
                continue;
            }

            candidates.push(RelayPair {
                car_park: park.name.clone(),
                station: station.name.clone(),
                distance_m: distance,
                correlation: r,
                n_points: aligned.len(),
                car_park_series: park.series_path.clone(),
                station_series: station.series_path.clone(),
                car_park_lat: park.coords.lat,
                car_park_lon: park.coords.lon,
                station_lat: station.coords.lat,
                station_lon: station.coords.lon,
            });
        }
    }

    candidates.sort_by(|a, b| {
        a.distance_m
            .partial_cmp(&b.distance_m)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                a.correlation
                    .partial_cmp(&b.correlation)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| b.n_points.cmp(&a.n_points))
            .then_with(|| a.car_park.cmp(&b.car_park))
            .then_with(|| a.station.cmp(&b.station))
    });

    let count_total = candidates.len();
    candidates.truncate(criteria.top_n);

    RelaySelection {
        max_distance_m: criteria.max_distance_m,
        min_points: criteria.min_points,
        top_n: criteria.top_n,
        only_negative: true,
        min_relay_corr: criteria.max_corr,
        sort: "distance ASC, correlation ASC, n_points DESC".to_string(),
        count_total,
        items: candidates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(i: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, i % 24, 0, 0).unwrap()
    }

    fn endpoint<F: Fn(u32) -> f64>(name: &str, lat: f64, lon: f64, f: F) -> RelayEndpoint {
        RelayEndpoint {
            name: name.to_string(),
            coords: Coords { lat, lon },
            series_path: format!("series/{name}.json"),
            points: (0..20).map(|i| (ts(i), f(i))).collect(),
        }
    }

    fn rising(i: u32) -> f64 {
        i as f64 / 20.0
    }

    fn falling(i: u32) -> f64 {
        1.0 - i as f64 / 20.0
    }

    #[test]
    fn test_inverse_nearby_pair_is_selected() {
        let parks = vec![endpoint("P", 43.6100, 3.8800, rising)];
        let stations = vec![endpoint("S", 43.6110, 3.8800, falling)];

        let selection = select_relays(&parks, &stations, &RelayCriteria::default());
        assert_eq!(selection.count_total, 1);
        let pair = &selection.items[0];
        assert_eq!(pair.car_park, "P");
        assert_eq!(pair.station, "S");
        assert!(pair.correlation < -0.9);
        assert!(pair.distance_m < 200.0);
        assert_eq!(pair.n_points, 20);
    }

    #[test]
    fn test_distant_pair_is_rejected() {
        let parks = vec![endpoint("P", 43.61, 3.88, rising)];
        // ~11 km north.
        let stations = vec![endpoint("S", 43.71, 3.88, falling)];

        let selection = select_relays(&parks, &stations, &RelayCriteria::default());
        assert_eq!(selection.count_total, 0);
        assert!(selection.items.is_empty());
    }

    #[test]
    fn test_positive_and_weak_coupling_are_rejected() {
        let parks = vec![endpoint("P", 43.6100, 3.8800, rising)];
        let same_direction = vec![endpoint("S", 43.6110, 3.8800, rising)];
        let selection = select_relays(&parks, &same_direction, &RelayCriteria::default());
        assert_eq!(selection.count_total, 0);
    }

    #[test]
    fn test_too_few_common_points_is_rejected() {
        let parks = vec![endpoint("P", 43.6100, 3.8800, rising)];
        let mut stations = vec![endpoint("S", 43.6110, 3.8800, falling)];
        stations[0].points = stations[0]
            .points
            .iter()
            .take(5)
            .map(|(t, v)| (*t, *v))
            .collect();

        let selection = select_relays(&parks, &stations, &RelayCriteria::default());
        assert_eq!(selection.count_total, 0);
    }

    #[test]
    fn test_distance_wins_over_correlation() {
        let parks = vec![endpoint("P", 43.6100, 3.8800, rising)];
        // Near station with moderate inverse coupling, farther one with
        // perfect inverse coupling: the near one ranks first.
        let near = endpoint("Near", 43.6105, 3.8800, |i| {
            falling(i) + if i % 2 == 0 { 0.08 } else { -0.08 }
        });
        let far = endpoint("Far", 43.6160, 3.8800, falling);

        let selection = select_relays(&parks, &[near, far], &RelayCriteria::default());
        assert_eq!(selection.count_total, 2);
        assert_eq!(selection.items[0].station, "Near");
        assert_eq!(selection.items[1].station, "Far");
        assert!(selection.items[0].correlation > selection.items[1].correlation);
    }

    #[test]
    fn test_top_n_truncates_but_counts_all() {
        let parks: Vec<_> = (0..5)
            .map(|i| endpoint(&format!("P{i}"), 43.6100 + i as f64 * 1e-4, 3.88, rising))
            .collect();
        let stations = vec![endpoint("S", 43.6110, 3.8800, falling)];

        let criteria = RelayCriteria {
            top_n: 2,
            ..RelayCriteria::default()
        };
        let selection = select_relays(&parks, &stations, &criteria);
        assert_eq!(selection.count_total, 5);
        assert_eq!(selection.items.len(), 2);
    }
}
